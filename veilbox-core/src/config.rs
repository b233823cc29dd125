//! Core configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use veilbox_crypto::KdfParams;

/// How a link share's wrapping key is derived from its secret.
///
/// Recorded on every `LinkShare`, so changing the configured policy only
/// affects links created afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkKeyPolicy {
    /// HKDF over the link secret; a password is stretched with Argon2id and
    /// folded into the HKDF input.
    #[default]
    Hkdf,
    /// The link secret itself is also stretched with Argon2id.
    Argon2Secret,
}

/// Configuration for the Veilbox core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeilboxConfig {
    /// Argon2id cost used for new identities and password-protected links.
    pub kdf: KdfParams,

    pub link_policy: LinkKeyPolicy,

    /// Attempts for a ciphertext fetch, including the first.
    pub fetch_retry_attempts: u32,

    /// Linear backoff step between fetch attempts.
    pub fetch_retry_backoff_ms: u64,

    /// Upper bound on plaintext bytes retained by the decrypted-entry cache.
    pub max_cache_bytes: u64,
}

impl Default for VeilboxConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            link_policy: LinkKeyPolicy::default(),
            fetch_retry_attempts: 3,
            fetch_retry_backoff_ms: 250,
            max_cache_bytes: 256 * 1024 * 1024, // 256 MiB
        }
    }
}

impl VeilboxConfig {
    /// Cheap KDF and near-zero backoff so test suites stay fast.
    pub fn fast_for_tests() -> Self {
        Self {
            kdf: KdfParams::fast_for_tests(),
            fetch_retry_backoff_ms: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.kdf
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        if self.fetch_retry_attempts == 0 {
            return Err(CoreError::Config(
                "fetch_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_cache_bytes == 0 {
            return Err(CoreError::Config(
                "max_cache_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.fetch_retry_attempts,
            backoff: Duration::from_millis(self.fetch_retry_backoff_ms),
        }
    }
}

/// Retry policy for idempotent content fetches.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given (1-based) retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        assert!(VeilboxConfig::default().validate().is_ok());
        assert!(VeilboxConfig::fast_for_tests().validate().is_ok());
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }
}
