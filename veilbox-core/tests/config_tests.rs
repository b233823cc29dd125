use veilbox_core::{CoreError, LinkKeyPolicy, VeilboxConfig};
use veilbox_crypto::KdfParams;

#[test]
fn default_kdf_cost() {
    let config = VeilboxConfig::default();
    assert_eq!(config.kdf.memory_kib, 64 * 1024);
    assert_eq!(config.kdf.iterations, 3);
    assert_eq!(config.kdf.parallelism, 4);
}

#[test]
fn default_link_policy_is_hkdf() {
    assert_eq!(VeilboxConfig::default().link_policy, LinkKeyPolicy::Hkdf);
}

#[test]
fn default_retry_policy() {
    let config = VeilboxConfig::default();
    assert_eq!(config.fetch_retry_attempts, 3);
    assert_eq!(config.fetch_retry_backoff_ms, 250);
}

#[test]
fn default_cache_budget() {
    assert_eq!(VeilboxConfig::default().max_cache_bytes, 256 * 1024 * 1024);
}

#[test]
fn fast_for_tests_only_cheapens_kdf_and_backoff() {
    let fast = VeilboxConfig::fast_for_tests();
    let default = VeilboxConfig::default();
    assert_eq!(fast.kdf, KdfParams::fast_for_tests());
    assert_eq!(fast.fetch_retry_backoff_ms, 1);
    assert_eq!(fast.fetch_retry_attempts, default.fetch_retry_attempts);
    assert_eq!(fast.max_cache_bytes, default.max_cache_bytes);
}

#[test]
fn zero_attempts_rejected() {
    let config = VeilboxConfig {
        fetch_retry_attempts: 0,
        ..VeilboxConfig::default()
    };
    assert!(matches!(config.validate(), Err(CoreError::Config(_))));
}

#[test]
fn zero_cache_budget_rejected() {
    let config = VeilboxConfig {
        max_cache_bytes: 0,
        ..VeilboxConfig::default()
    };
    assert!(matches!(config.validate(), Err(CoreError::Config(_))));
}

#[test]
fn zero_cost_kdf_rejected() {
    let config = VeilboxConfig {
        kdf: KdfParams {
            memory_kib: 1024,
            iterations: 0,
            parallelism: 1,
        },
        ..VeilboxConfig::default()
    };
    assert!(matches!(config.validate(), Err(CoreError::Config(_))));
}

#[test]
fn serialization_roundtrip() {
    let config = VeilboxConfig {
        link_policy: LinkKeyPolicy::Argon2Secret,
        ..VeilboxConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"linkPolicy\":\"argon2Secret\""));
    assert!(json.contains("\"memoryKib\""));

    let deserialized: VeilboxConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.kdf, config.kdf);
    assert_eq!(deserialized.link_policy, config.link_policy);
    assert_eq!(deserialized.fetch_retry_attempts, config.fetch_retry_attempts);
    assert_eq!(deserialized.fetch_retry_backoff_ms, config.fetch_retry_backoff_ms);
    assert_eq!(deserialized.max_cache_bytes, config.max_cache_bytes);
}
