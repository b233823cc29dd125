//! Public-key envelope encryption for key wrapping.
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305. Each seal generates an
//! ephemeral keypair, so the sender stays anonymous and two seals of the
//! same key never produce the same envelope.
//!
//! Also provides password-wrapping of a long-term secret key: the caller
//! derives the wrapping key (Argon2id) and this module does the AEAD step.

use crate::cipher::{self, NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// XSalsa20 nonce size.
pub const ENVELOPE_NONCE_SIZE: usize = 24;

/// Associated data binding a password-wrapped private key to its purpose.
const PRIVATE_KEY_AAD: &[u8] = b"veilbox/identity-key/v1";

/// A user's long-term X25519 keypair.
///
/// Only the public half is persisted in clear; the secret half is stored
/// wrapped under a password-derived key. `SecretKey` wipes itself on drop.
pub struct IdentityKeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl IdentityKeyPair {
    /// Raw public key, the form kept on the identity record.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Copy of the raw secret key. The caller is responsible for the copy.
    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Rebuilds a keypair from unwrapped secret bytes and wipes the input.
    pub fn from_secret_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let secret = SecretKey::from(bytes);
        bytes.zeroize();
        Self::from(secret)
    }
}

impl From<SecretKey> for IdentityKeyPair {
    /// The public half is always recomputed, never trusted from storage.
    fn from(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }
}

impl Clone for IdentityKeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.to_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &STANDARD.encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A payload sealed to a recipient's X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Ephemeral X25519 public key (sender side of DH).
    pub ephemeral_public_key: [u8; PUBLIC_KEY_SIZE],
    /// XSalsa20 nonce.
    pub nonce: [u8; ENVELOPE_NONCE_SIZE],
    /// XSalsa20-Poly1305 ciphertext + tag.
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Compact encoding: `ephemeral_pk || nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let header = PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE;
        if bytes.len() <= header {
            return Err(CryptoError::Encoding(format!(
                "sealed envelope too short: {} bytes",
                bytes.len()
            )));
        }
        let mut ephemeral_public_key = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_public_key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut nonce = [0u8; ENVELOPE_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..header]);

        Ok(Self {
            ephemeral_public_key,
            nonce,
            ciphertext: bytes[header..].to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        Self::from_bytes(&STANDARD.decode(encoded)?)
    }
}

/// Generates a fresh identity keypair for registration.
pub fn generate_keypair() -> IdentityKeyPair {
    IdentityKeyPair::from(SecretKey::generate(&mut OsRng))
}

/// Parses a recipient public key from raw bytes.
pub fn public_key_from_slice(bytes: &[u8]) -> CryptoResult<PublicKey> {
    let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: PUBLIC_KEY_SIZE,
        actual: bytes.len(),
    })?;
    Ok(PublicKey::from(arr))
}

/// Seals `plaintext` so that only the holder of `recipient_pk`'s secret
/// half can open it.
///
/// A throwaway X25519 key is drawn per call and its public half travels in
/// the envelope, so nothing identifies the sender and sealing the same file
/// key twice yields unrelated envelopes.
pub fn asym_encrypt(recipient_pk: &PublicKey, plaintext: &[u8]) -> CryptoResult<SealedEnvelope> {
    let ephemeral = SecretKey::generate(&mut OsRng);
    let mut nonce = [0u8; ENVELOPE_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = SalsaBox::new(recipient_pk, &ephemeral)
        .encrypt(crypto_box::Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption("sealing to recipient failed".to_string()))?;

    Ok(SealedEnvelope {
        ephemeral_public_key: *ephemeral.public_key().as_bytes(),
        nonce,
        ciphertext,
    })
}

/// Opens an envelope produced by [`asym_encrypt`].
///
/// A key the envelope was not sealed to and a modified envelope fail the
/// same way.
pub fn asym_decrypt(recipient_sk: &SecretKey, envelope: &SealedEnvelope) -> CryptoResult<Vec<u8>> {
    let sender = PublicKey::from(envelope.ephemeral_public_key);
    SalsaBox::new(&sender, recipient_sk)
        .decrypt(
            crypto_box::Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_slice(),
        )
        .map_err(|_| CryptoError::Decryption("sealed envelope did not open".to_string()))
}

/// Wraps a secret key under a password-derived key with an explicit IV.
pub fn encrypt_private_key(
    sk: &SecretKey,
    wrapping_key: &DerivedKey,
    iv: &[u8; NONCE_SIZE],
) -> CryptoResult<Vec<u8>> {
    cipher::aead_encrypt(wrapping_key, iv, &sk.to_bytes(), PRIVATE_KEY_AAD)
}

/// Unwraps a secret key produced by [`encrypt_private_key`].
pub fn decrypt_private_key(
    encrypted: &[u8],
    wrapping_key: &DerivedKey,
    iv: &[u8; NONCE_SIZE],
) -> CryptoResult<SecretKey> {
    let mut plaintext = cipher::aead_decrypt(wrapping_key, iv, encrypted, PRIVATE_KEY_AAD)?;

    if plaintext.len() != KEY_SIZE {
        let actual = plaintext.len();
        plaintext.zeroize();
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual,
        });
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    let sk = SecretKey::from(bytes);
    bytes.zeroize();
    Ok(sk)
}
