//! Error taxonomy exposed to the UI boundary.
//!
//! Low-level AEAD and envelope failures are translated into these variants
//! before they leave the decrypt and sharing paths. Messages stay generic so
//! they never help an attacker tell failure causes apart.

use thiserror::Error;
use veilbox_crypto::CryptoError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
///
/// `Clone` so one coalesced decrypt failure can be handed to every waiting
/// caller.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Wrong password or corrupted wrapped private key. Indistinguishable.
    #[error("invalid credentials")]
    AuthFailure,

    /// Tampered or mismatched ciphertext/key/nonce triple.
    #[error("this file could not be decrypted")]
    DecryptFailure,

    /// The caller holds no valid unwrap path for the file key.
    #[error("no key available for this file")]
    KeyUnavailable,

    #[error("share link has expired")]
    LinkExpired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    /// Ciphertext fetch failed. Retrying is safe (the fetch is idempotent).
    #[error("content fetch failed: {0}")]
    Fetch(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Encrypt-side primitive failure (key generation, sealing).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A background task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Only content fetches are retried. Auth and tamper failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Fetch(_))
    }
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        CoreError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Internal(err.to_string())
    }
}
