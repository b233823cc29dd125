//! Persisted record shapes and session-local value types.
//!
//! Field names on the wire match the REST contract (`encryptedFileName`,
//! `encryptedKey`, `encryptedPrivateKey`, `iv`, `salt`, ...). Binary fields
//! are standard base64.

use crate::config::LinkKeyPolicy;
use crate::error::{CoreError, CoreResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use veilbox_crypto::{generate_random_key, KdfParams, NONCE_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A user's long-term identity as stored server-side.
///
/// The private key only ever appears here wrapped under a key derived from
/// the user's password and `salt`, with `iv` as the AEAD nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "b64")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// Argon2id cost the wrapping key was derived with.
    pub kdf: KdfParams,
}

/// A file or directory node.
///
/// `encrypted_key` is the node's file key sealed to the owner's public key.
/// `nonce` is the node nonce from which per-field nonces are derived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub is_directory: bool,
    #[serde(rename = "encryptedFileName", with = "b64")]
    pub encrypted_name: Vec<u8>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub encrypted_mime_type: Option<Vec<u8>>,
    pub encrypted_key: String,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub owner_id: String,
    pub uploader_id: String,
    /// Ciphertext length; `None` for directories.
    #[serde(default)]
    pub size: Option<u64>,
}

impl FileNode {
    /// Identifies one encryption generation of this node.
    ///
    /// Any edit produces a fresh nonce, so the fingerprint changes whenever
    /// content, metadata or the owner wrapping changes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.nonce);
        hasher.update(self.encrypted_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub(crate) fn node_nonce(&self) -> CoreResult<[u8; NONCE_SIZE]> {
        veilbox_crypto::nonce_from_slice(&self.nonce).map_err(|_| CoreError::DecryptFailure)
    }
}

/// A file key re-wrapped for one grantee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareGrant {
    pub file_id: String,
    pub user_id: String,
    pub encrypted_key: String,
    pub edit_permission: bool,
}

/// A file key wrapped under a key derived from a link secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkShare {
    pub link_id: String,
    pub file_id: String,
    /// `nonce || ciphertext` of the file key under the link key, base64.
    pub wrapped_key: String,
    pub password_protected: bool,
    /// Argon2id salt; present for password-protected links and for links
    /// created under [`LinkKeyPolicy::Argon2Secret`].
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
    pub key_derivation: LinkKeyPolicy,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl LinkShare {
    /// Expired links are treated as absent even if still stored.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

/// Size of a link secret.
pub const LINK_SECRET_SIZE: usize = 32;

/// The secret half of a share link. Lives in the URL fragment and is never
/// part of a persisted record.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LinkSecret([u8; LINK_SECRET_SIZE]);

impl LinkSecret {
    pub fn generate() -> Self {
        let key = generate_random_key();
        Self(*key.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; LINK_SECRET_SIZE] {
        &self.0
    }

    /// URL-safe encoding suitable for a fragment (`#...`).
    pub fn to_fragment(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parses a fragment. Malformed input means the caller has no key.
    pub fn from_fragment(fragment: &str) -> CoreResult<Self> {
        let mut decoded = URL_SAFE_NO_PAD
            .decode(fragment.trim_start_matches('#'))
            .map_err(|_| CoreError::KeyUnavailable)?;
        let result = <[u8; LINK_SECRET_SIZE]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| CoreError::KeyUnavailable);
        decoded.zeroize();
        result
    }
}

impl std::fmt::Debug for LinkSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LinkSecret([REDACTED])")
    }
}

/// Base64 (standard alphabet) serde adapter for byte vectors.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Base64 serde adapter for optional byte vectors.
pub(crate) mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
