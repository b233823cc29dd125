//! Per-node file keys: creation, wrapping, unwrapping.
//!
//! Stateless. Failures are the primitive layer's `CryptoError`, surfaced
//! untouched; callers at the UI boundary translate them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use veilbox_crypto::{
    asym_decrypt, asym_encrypt, decrypt, encrypt, generate_random_key, CryptoResult, DerivedKey,
    EncryptedData, PublicKey, SealedEnvelope, SecretKey,
};

/// A node's symmetric key.
pub type FileKey = DerivedKey;

/// AAD for file keys wrapped under a link key.
const LINK_WRAP_AAD: &[u8] = b"veilbox/link-wrap/v1";

/// Generates a fresh random key for one node.
pub fn create_file_key() -> FileKey {
    generate_random_key()
}

/// Seals `key` to the owner's public key. Returns the base64 envelope.
pub fn wrap_for_owner(key: &FileKey, owner_pk: &PublicKey) -> CryptoResult<String> {
    wrap_for_recipient(key, owner_pk)
}

/// Seals `key` to any recipient's public key (owner or grantee).
pub fn wrap_for_recipient(key: &FileKey, recipient_pk: &PublicKey) -> CryptoResult<String> {
    Ok(asym_encrypt(recipient_pk, key.as_bytes())?.to_base64())
}

/// Opens a sealed file key with the holder's secret key.
pub fn unwrap(encrypted_key: &str, secret: &SecretKey) -> CryptoResult<FileKey> {
    let envelope = SealedEnvelope::from_base64(encrypted_key)?;
    let bytes = zeroize::Zeroizing::new(asym_decrypt(secret, &envelope)?);
    DerivedKey::from_slice(&bytes)
}

/// Wraps `key` under a symmetric wrapping key (link shares).
pub fn wrap_with_key(key: &FileKey, wrapping_key: &DerivedKey) -> CryptoResult<String> {
    let encrypted = encrypt(wrapping_key, key.as_bytes(), LINK_WRAP_AAD)?;
    Ok(STANDARD.encode(encrypted.to_bytes()))
}

/// Reverses [`wrap_with_key`].
pub fn unwrap_with_key(wrapped: &str, wrapping_key: &DerivedKey) -> CryptoResult<FileKey> {
    let encrypted = EncryptedData::from_bytes(&STANDARD.decode(wrapped)?)?;
    let bytes = zeroize::Zeroizing::new(decrypt(wrapping_key, &encrypted, LINK_WRAP_AAD)?);
    DerivedKey::from_slice(&bytes)
}
