//! Authenticated symmetric encryption (ChaCha20-Poly1305).
//!
//! The low-level pair [`aead_encrypt`] / [`aead_decrypt`] takes an explicit
//! nonce and associated data. [`encrypt`] / [`decrypt`] generate a fresh
//! random nonce per call and carry it in [`EncryptedData`].

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// ChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce it was produced with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Total encoded size (nonce + ciphertext + tag).
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Compact encoding: `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parses the compact encoding produced by [`EncryptedData::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(
                "ciphertext too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        Ok(Self {
            nonce: nonce_from_slice(nonce)?,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Generates a random 96-bit nonce.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Converts a slice into a nonce, checking its length.
pub fn nonce_from_slice(bytes: &[u8]) -> CryptoResult<[u8; NONCE_SIZE]> {
    bytes.try_into().map_err(|_| CryptoError::InvalidNonce {
        expected: NONCE_SIZE,
        actual: bytes.len(),
    })
}

/// Encrypts `plaintext` under `key` with an explicit nonce and AAD.
///
/// The caller is responsible for never reusing `nonce` with the same key.
pub fn aead_encrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypts and authenticates. Fails closed: a tag mismatch returns an
/// error and no plaintext.
pub fn aead_decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

/// Encrypts under a freshly generated random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedData> {
    let nonce = random_nonce();
    let ciphertext = aead_encrypt(key, &nonce, plaintext, aad)?;
    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts data produced by [`encrypt`] with the same `aad`.
pub fn decrypt(key: &DerivedKey, encrypted: &EncryptedData, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    aead_decrypt(key, &encrypted.nonce, &encrypted.ciphertext, aad)
}
