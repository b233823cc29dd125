//! Shared helpers for veilbox-core integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use veilbox_core::{MemoryContent, MemoryStore, Session, Veilbox, VeilboxConfig};

pub type TestVeilbox = Veilbox<MemoryStore, MemoryContent>;
pub type TestSession = Session<MemoryStore, MemoryContent>;

/// Ten bytes, as in the owner round-trip scenario.
pub const NOTES: &[u8] = b"0123456789";

pub struct Harness {
    pub veilbox: TestVeilbox,
    pub store: Arc<MemoryStore>,
    pub content: Arc<MemoryContent>,
}

/// In-memory stores with the cheap test KDF.
pub fn harness() -> Harness {
    harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests())
}

/// Every ciphertext fetch takes `latency`, so concurrent callers overlap.
pub fn slow_harness(latency: Duration) -> Harness {
    harness_with(
        MemoryContent::with_latency(latency),
        VeilboxConfig::fast_for_tests(),
    )
}

pub fn harness_with(content: MemoryContent, config: VeilboxConfig) -> Harness {
    veilbox_core::telemetry::init_tracing("veilbox_core=debug");

    let store = Arc::new(MemoryStore::new());
    let content = Arc::new(content);
    let veilbox = Veilbox::new(config, Arc::clone(&store), Arc::clone(&content))
        .expect("test config is valid");
    Harness {
        veilbox,
        store,
        content,
    }
}

/// Registers a user whose password is `"<user>-password"`.
pub async fn register(h: &Harness, user_id: &str) -> TestSession {
    h.veilbox
        .register(user_id, &format!("{user_id}-password"))
        .await
        .expect("registration succeeds")
}
