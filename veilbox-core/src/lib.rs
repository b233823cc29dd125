//! Client-side core for Veilbox, a zero-knowledge file store.
//!
//! The server only ever holds ciphertext, wrapped keys and public keys.
//! Everything that needs a secret happens here:
//! - Identity registration and login (Argon2id-wrapped X25519 private key)
//! - Per-node file keys, wrapped once per owner, grantee or share link
//! - Upload encryption of content, file name and mime type
//! - On-demand decryption with request coalescing and a decrypted-entry
//!   cache scoped to one session
//! - User grants, share links, revocation
//!
//! # Architecture
//!
//! ```text
//! Veilbox ──login──▶ Session ──▶ DecryptionPipeline ──▶ ContentStore
//!    │                  │               │
//!    └── ShareManager ◀─┘               └── DecryptedCache
//!             │
//!        RecordStore
//! ```
//!
//! Revoking one grant or link is one record delete. File content is never
//! re-encrypted for sharing.

mod blocking;
pub mod cache;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod file_keys;
pub mod identity;
pub mod session;
pub mod sharing;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod upload;

pub use cache::{DecryptedCache, DecryptedFile, DecryptedHandle};
pub use config::{LinkKeyPolicy, VeilboxConfig};
pub use decrypt::{DecryptionPipeline, KeyMaterial, PipelineStats};
pub use error::{CoreError, CoreResult};
pub use file_keys::FileKey;
pub use identity::IdentityManager;
pub use session::{Session, Veilbox};
pub use sharing::ShareManager;
pub use store::{ContentStore, MemoryContent, MemoryStore, RecordStore};
pub use types::{FileNode, Identity, LinkSecret, LinkShare, ShareGrant};
pub use upload::{encrypt_upload, EncryptedUpload, NodeDraft};
