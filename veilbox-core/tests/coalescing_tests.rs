//! Request coalescing, the decrypted-entry cache and fetch retries.
//!
//! Ciphertext fetches are slowed down so overlapping callers really overlap.

mod support;

use futures::future::join_all;
use std::time::Duration;
use support::{harness_with, register, slow_harness, NOTES};
use veilbox_core::{CoreError, MemoryContent, PipelineStats, VeilboxConfig};

const LATENCY: Duration = Duration::from_millis(100);

// ── Coalescing ──

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_simultaneous_decrypts_share_one_fetch_and_unwrap() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let handles = join_all((0..5).map(|_| alice.decrypt(&node.id))).await;

    assert_eq!(h.content.fetch_count(), 1);
    let stats = alice.pipeline().stats();
    assert_eq!(stats.unwraps, 1);
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.decrypts, 1);
    assert_eq!(stats.coalesced, 4);

    let handles: Vec<_> = handles.into_iter().map(Result::unwrap).collect();
    for handle in &handles {
        assert_eq!(handle.bytes, NOTES);
        assert_eq!(handle.name, "notes.txt");
    }
    assert_eq!(alice.pipeline().cache().holders(&node.id), 5);

    drop(handles);
    assert!(!alice.pipeline().cache().contains(&node.id));
    assert_eq!(alice.pipeline().cache().retained_bytes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_failure_reaches_every_caller() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();
    h.content.tamper(&node.id, |bytes| bytes[2] ^= 0x10).await;

    let results = join_all((0..5).map(|_| alice.decrypt(&node.id))).await;

    assert_eq!(h.content.fetch_count(), 1);
    for result in results {
        assert_eq!(result.unwrap_err(), CoreError::DecryptFailure);
    }
    assert!(!alice.pipeline().cache().contains(&node.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_files_do_not_coalesce() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let a = alice.upload_file(None, "a", None, b"aaaa").await.unwrap();
    let b = alice.upload_file(None, "b", None, b"bbbb").await.unwrap();

    let (ra, rb) = tokio::join!(alice.decrypt(&a.id), alice.decrypt(&b.id));
    assert_eq!(ra.unwrap().bytes, b"aaaa");
    assert_eq!(rb.unwrap().bytes, b"bbbb");
    assert_eq!(h.content.fetch_count(), 2);
    assert_eq!(alice.pipeline().stats().coalesced, 0);
}

// ── Cancellation ──

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn withdrawn_subscriber_owns_nothing() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let (withdrawn, kept) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(10), alice.decrypt(&node.id)),
        alice.decrypt(&node.id),
    );

    assert!(withdrawn.is_err(), "first caller gave up before the fetch landed");
    let kept = kept.unwrap();
    assert_eq!(kept.bytes, NOTES);
    assert_eq!(alice.pipeline().cache().holders(&node.id), 1);
    assert_eq!(h.content.fetch_count(), 1);

    drop(kept);
    assert!(!alice.pipeline().cache().contains(&node.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn decrypt_completes_after_every_caller_left() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let gave_up = tokio::time::timeout(Duration::from_millis(10), alice.decrypt(&node.id)).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(LATENCY * 3).await;
    let stats = alice.pipeline().stats();
    assert_eq!(stats.decrypts, 1, "background decrypt ran to completion");
    assert!(
        !alice.pipeline().cache().contains(&node.id),
        "nobody was left to hold the result"
    );
}

// ── Cache lifecycle ──

#[tokio::test]
async fn held_entry_serves_later_callers() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let first = alice.decrypt(&node.id).await.unwrap();
    let second = alice.decrypt(&node.id).await.unwrap();

    assert_eq!(second.bytes, first.bytes);
    assert_eq!(h.content.fetch_count(), 1);
    assert_eq!(
        alice.pipeline().stats(),
        PipelineStats {
            fetches: 1,
            unwraps: 1,
            decrypts: 1,
            cache_hits: 1,
            coalesced: 0,
        }
    );

    first.release();
    assert!(alice.pipeline().cache().contains(&node.id));
    second.release();
    assert!(!alice.pipeline().cache().contains(&node.id));
}

#[tokio::test]
async fn released_entry_is_decrypted_again() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    alice.decrypt(&node.id).await.unwrap().release();
    alice.decrypt(&node.id).await.unwrap().release();

    assert_eq!(h.content.fetch_count(), 2);
    assert_eq!(alice.pipeline().stats().cache_hits, 0);
}

#[tokio::test]
async fn edit_invalidates_cached_plaintext() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let stale = alice.decrypt(&node.id).await.unwrap();
    alice.update_file(&node.id, b"second draft").await.unwrap();
    assert!(!alice.pipeline().cache().contains(&node.id));

    let fresh = alice.decrypt(&node.id).await.unwrap();
    assert_eq!(fresh.bytes, b"second draft");
    assert_eq!(stale.bytes, NOTES, "existing holders keep what they had");

    drop(stale);
    assert_eq!(alice.pipeline().cache().holders(&node.id), 1);
    drop(fresh);
    assert!(!alice.pipeline().cache().contains(&node.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn decrypt_racing_an_edit_sees_one_consistent_version() {
    let h = slow_harness(LATENCY);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let (read, updated) = tokio::join!(alice.decrypt(&node.id), async {
        tokio::time::sleep(LATENCY / 4).await;
        alice.update_file(&node.id, b"second draft").await.unwrap()
    });

    assert_ne!(updated.fingerprint(), node.fingerprint());
    let read = read.unwrap();
    assert_eq!(read.bytes, NOTES, "the record read before the edit wins");
    assert_eq!(h.content.generations(&node.id).await, 2);

    drop(read);
    assert_eq!(alice.decrypt(&node.id).await.unwrap().bytes, b"second draft");
}

#[tokio::test]
async fn fingerprint_change_retires_other_sessions_entries() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let bob = register(&h, "bob").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();
    alice.share_with_user(&node.id, "bob", true).await.unwrap();

    let held_by_bob = bob.decrypt(&node.id).await.unwrap();
    alice.update_file(&node.id, b"owner edit").await.unwrap();

    let refreshed = bob.decrypt(&node.id).await.unwrap();
    assert_eq!(refreshed.bytes, b"owner edit");
    assert_eq!(held_by_bob.bytes, NOTES);
    assert_eq!(bob.pipeline().stats().cache_hits, 0);
}

#[tokio::test]
async fn oversized_result_is_served_but_not_retained() {
    let config = VeilboxConfig {
        max_cache_bytes: 4,
        ..VeilboxConfig::fast_for_tests()
    };
    let h = harness_with(MemoryContent::new(), config);
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    let file = alice.decrypt(&node.id).await.unwrap();
    assert_eq!(file.bytes, NOTES);
    assert!(!alice.pipeline().cache().contains(&node.id));
    assert_eq!(alice.pipeline().cache().retained_bytes(), 0);
}

// ── Fetch retries ──

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    h.content.fail_next_fetches(2);
    let file = alice.decrypt(&node.id).await.unwrap();

    assert_eq!(file.bytes, NOTES);
    assert_eq!(h.content.fetch_count(), 3);
    assert_eq!(alice.pipeline().stats().fetches, 3);
    assert_eq!(alice.pipeline().stats().unwraps, 1);
}

#[tokio::test]
async fn retries_stop_at_configured_attempts() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();

    h.content.fail_next_fetches(10);
    let err = alice.decrypt(&node.id).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(h.content.fetch_count(), 3);
}

#[tokio::test]
async fn tamper_failures_are_never_retried() {
    let h = harness_with(MemoryContent::new(), VeilboxConfig::fast_for_tests());
    let alice = register(&h, "alice").await;
    let node = alice.upload_file(None, "notes.txt", None, NOTES).await.unwrap();
    h.content.tamper(&node.id, |bytes| bytes[0] ^= 0xff).await;

    assert_eq!(
        alice.decrypt(&node.id).await.unwrap_err(),
        CoreError::DecryptFailure
    );
    assert_eq!(h.content.fetch_count(), 1);
}
