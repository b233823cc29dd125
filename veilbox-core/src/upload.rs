//! Upload-side encryption of content and metadata.
//!
//! Nonce convention: each node stores one random 12-byte node nonce `N`.
//! Content, name and mime type are encrypted as three separate AEAD calls
//! under the node's file key. Field `f` uses nonce
//! `SHA-256("veilbox/nonce/v1" || tag(f) || N)[..12]` and AAD
//! `"veilbox/<f>/v1"`. Every upload or edit draws a fresh `N`, so no
//! (key, nonce) pair repeats, and the AAD stops a ciphertext from being
//! moved into another field's slot.

use crate::error::{CoreError, CoreResult};
use crate::file_keys::FileKey;
use crate::types::FileNode;
use sha2::{Digest, Sha256};
use veilbox_crypto::{aead_decrypt, aead_encrypt, random_nonce, CryptoResult, NONCE_SIZE};

/// The independently encrypted parts of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Content,
    Name,
    MimeType,
}

impl Field {
    fn tag(self) -> u8 {
        match self {
            Field::Content => 0x01,
            Field::Name => 0x02,
            Field::MimeType => 0x03,
        }
    }

    fn aad(self) -> &'static [u8] {
        match self {
            Field::Content => b"veilbox/content/v1",
            Field::Name => b"veilbox/name/v1",
            Field::MimeType => b"veilbox/mime/v1",
        }
    }
}

/// Derives the AEAD nonce for `field` from the stored node nonce.
pub fn field_nonce(node_nonce: &[u8; NONCE_SIZE], field: Field) -> [u8; NONCE_SIZE] {
    let digest = Sha256::new()
        .chain_update(b"veilbox/nonce/v1")
        .chain_update([field.tag()])
        .chain_update(node_nonce)
        .finalize();
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    nonce
}

pub(crate) fn encrypt_field(
    key: &FileKey,
    node_nonce: &[u8; NONCE_SIZE],
    field: Field,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    aead_encrypt(key, &field_nonce(node_nonce, field), plaintext, field.aad())
}

pub(crate) fn decrypt_field(
    key: &FileKey,
    node_nonce: &[u8; NONCE_SIZE],
    field: Field,
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    aead_decrypt(key, &field_nonce(node_nonce, field), ciphertext, field.aad())
}

/// Output of [`encrypt_upload`].
#[derive(Clone, Debug)]
pub struct EncryptedUpload {
    /// `None` for directories.
    pub ciphertext: Option<Vec<u8>>,
    pub encrypted_name: Vec<u8>,
    pub encrypted_mime_type: Option<Vec<u8>>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Record-level fields supplied by the caller when building a node.
#[derive(Clone, Debug)]
pub struct NodeDraft {
    pub id: String,
    pub parent_id: Option<String>,
    pub owner_id: String,
    pub uploader_id: String,
    /// Owner-wrapped file key.
    pub encrypted_key: String,
}

/// Encrypts content (if any), name and mime type under `key`.
///
/// `content == None` is a directory: only the metadata is encrypted.
pub fn encrypt_upload(
    content: Option<&[u8]>,
    name: &str,
    mime_type: Option<&str>,
    key: &FileKey,
) -> CoreResult<EncryptedUpload> {
    let nonce = random_nonce();

    let ciphertext = content
        .map(|bytes| encrypt_field(key, &nonce, Field::Content, bytes))
        .transpose()?;
    let encrypted_name = encrypt_field(key, &nonce, Field::Name, name.as_bytes())?;
    let encrypted_mime_type = mime_type
        .map(|mime| encrypt_field(key, &nonce, Field::MimeType, mime.as_bytes()))
        .transpose()?;

    Ok(EncryptedUpload {
        ciphertext,
        encrypted_name,
        encrypted_mime_type,
        nonce,
    })
}

impl EncryptedUpload {
    /// Splits into the node record and the ciphertext to upload.
    pub fn into_node(self, draft: NodeDraft) -> (FileNode, Option<Vec<u8>>) {
        let node = FileNode {
            id: draft.id,
            is_directory: self.ciphertext.is_none(),
            encrypted_name: self.encrypted_name,
            encrypted_mime_type: self.encrypted_mime_type,
            encrypted_key: draft.encrypted_key,
            nonce: self.nonce.to_vec(),
            parent_id: draft.parent_id,
            owner_id: draft.owner_id,
            uploader_id: draft.uploader_id,
            size: self.ciphertext.as_ref().map(|c| c.len() as u64),
        };
        (node, self.ciphertext)
    }
}

/// Decrypts a node's name and mime type. Any failure is `DecryptFailure`.
pub(crate) fn decrypt_metadata(
    key: &FileKey,
    node: &FileNode,
) -> CoreResult<(String, Option<String>)> {
    let nonce = node.node_nonce()?;

    let name = decrypt_utf8(key, &nonce, Field::Name, &node.encrypted_name)?;
    let mime_type = node
        .encrypted_mime_type
        .as_ref()
        .map(|ct| decrypt_utf8(key, &nonce, Field::MimeType, ct))
        .transpose()?;
    Ok((name, mime_type))
}

fn decrypt_utf8(
    key: &FileKey,
    nonce: &[u8; NONCE_SIZE],
    field: Field,
    ciphertext: &[u8],
) -> CoreResult<String> {
    let bytes =
        decrypt_field(key, nonce, field, ciphertext).map_err(|_| CoreError::DecryptFailure)?;
    String::from_utf8(bytes).map_err(|_| CoreError::DecryptFailure)
}
