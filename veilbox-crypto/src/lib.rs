//! Cryptographic primitives for Veilbox.
//!
//! Every higher-level component depends on this one substitutable set:
//! - ChaCha20-Poly1305 for authenticated symmetric encryption
//! - X25519 + XSalsa20-Poly1305 sealed envelopes for wrapping keys to a
//!   recipient's public key
//! - Argon2id for password-based key derivation, HKDF-SHA256 for subkeys
//! - Key types that zeroize on drop and redact themselves in `Debug`
//!
//! # Architecture
//!
//! 1. **Identity keypair**: long-term X25519 keypair per user. The secret
//!    half is stored only wrapped under an Argon2id-derived key.
//!
//! 2. **File key**: random 256-bit key per file or directory node. Wrapped
//!    once per recipient (owner, grantee) by sealing it to their public key,
//!    or under a link-derived symmetric key for link shares.
//!
//! Sharing with N parties is N key wraps, never N content re-encryptions.

mod cipher;
pub mod envelope;
mod error;
mod key;

pub use cipher::{
    aead_decrypt, aead_encrypt, decrypt, encrypt, nonce_from_slice, random_nonce, EncryptedData,
    NONCE_SIZE, TAG_SIZE,
};
pub use envelope::{
    asym_decrypt, asym_encrypt, decrypt_private_key, encrypt_private_key, generate_keypair,
    public_key_from_slice, IdentityKeyPair, SealedEnvelope, PUBLIC_KEY_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, derive_subkey, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE,
    SALT_SIZE,
};

pub use crypto_box::{PublicKey, SecretKey};
