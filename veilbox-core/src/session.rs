//! Session facade.
//!
//! [`Veilbox`] wires the managers to a record store and a content store.
//! Logging in yields a [`Session`], which owns the unlocked keypair and a
//! session-scoped decrypt pipeline. The keypair never leaves memory and is
//! zeroized when the session is dropped.

use crate::blocking::offload;
use crate::cache::DecryptedHandle;
use crate::config::VeilboxConfig;
use crate::decrypt::{DecryptionPipeline, KeyMaterial};
use crate::error::{CoreError, CoreResult};
use crate::file_keys::{self, create_file_key, FileKey};
use crate::identity::IdentityManager;
use crate::sharing::ShareManager;
use crate::store::{ContentStore, RecordStore};
use crate::types::{FileNode, Identity, LinkSecret, LinkShare, ShareGrant};
use crate::upload::{decrypt_metadata, encrypt_upload, NodeDraft};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use veilbox_crypto::{IdentityKeyPair, PublicKey};
use zeroize::Zeroizing;

/// Entry point: registration, login, anonymous link access.
pub struct Veilbox<S: RecordStore, C: ContentStore> {
    config: VeilboxConfig,
    store: Arc<S>,
    content: Arc<C>,
    identities: IdentityManager,
    shares: ShareManager<S>,
    link_pipeline: DecryptionPipeline<C>,
}

impl<S: RecordStore, C: ContentStore> Veilbox<S, C> {
    pub fn new(config: VeilboxConfig, store: Arc<S>, content: Arc<C>) -> CoreResult<Self> {
        config.validate()?;
        let identities = IdentityManager::new(config.kdf.clone());
        let shares = ShareManager::new(Arc::clone(&store), config.kdf.clone(), config.link_policy);
        let link_pipeline = DecryptionPipeline::new(
            Arc::clone(&content),
            config.retry_policy(),
            config.max_cache_bytes,
        );

        Ok(Self {
            config,
            store,
            content,
            identities,
            shares,
            link_pipeline,
        })
    }

    pub fn config(&self) -> &VeilboxConfig {
        &self.config
    }

    /// Creates a new identity and returns a session for it.
    pub async fn register(&self, user_id: &str, password: &str) -> CoreResult<Session<S, C>> {
        match self.store.get_identity(user_id).await {
            Ok(_) => return Err(CoreError::Conflict(format!("identity {user_id}"))),
            Err(CoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let (identity, keypair) = self.identities.register(user_id, password).await?;
        self.store.put_identity(identity.clone()).await?;
        Ok(self.session(identity, keypair))
    }

    /// Unlocks an existing identity. Unknown users are `AuthFailure`, the
    /// same as a wrong password.
    pub async fn login(&self, user_id: &str, password: &str) -> CoreResult<Session<S, C>> {
        let identity = match self.store.get_identity(user_id).await {
            Ok(identity) => identity,
            Err(CoreError::NotFound(_)) => return Err(CoreError::AuthFailure),
            Err(e) => return Err(e),
        };

        let keypair = self.identities.login(password, &identity).await?;
        info!(user_id, "session opened");
        Ok(self.session(identity, keypair))
    }

    /// Decrypts the node behind a share link without any identity.
    ///
    /// The link's file key is opened before the shared link pipeline is
    /// consulted, so a cached or in-flight result is only reachable with
    /// the right secret and password.
    pub async fn open_link(
        &self,
        link_id: &str,
        secret: &LinkSecret,
        password: Option<&str>,
    ) -> CoreResult<DecryptedHandle> {
        let (link, file_key) = self
            .shares
            .open_link(link_id, secret, password, Utc::now())
            .await?;
        let node = self.store.get_node(&link.file_id).await?;

        self.link_pipeline
            .decrypt(&node, KeyMaterial::Link { file_key })
            .await
    }

    fn session(&self, identity: Identity, keypair: IdentityKeyPair) -> Session<S, C> {
        Session {
            user_id: identity.user_id.clone(),
            identity,
            keypair: Arc::new(keypair),
            store: Arc::clone(&self.store),
            content: Arc::clone(&self.content),
            identities: self.identities.clone(),
            shares: self.shares.clone(),
            pipeline: DecryptionPipeline::new(
                Arc::clone(&self.content),
                self.config.retry_policy(),
                self.config.max_cache_bytes,
            ),
        }
    }
}

/// One authenticated user.
pub struct Session<S: RecordStore, C: ContentStore> {
    user_id: String,
    identity: Identity,
    keypair: Arc<IdentityKeyPair>,
    store: Arc<S>,
    content: Arc<C>,
    identities: IdentityManager,
    shares: ShareManager<S>,
    pipeline: DecryptionPipeline<C>,
}

impl<S: RecordStore, C: ContentStore> std::fmt::Debug for Session<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("keypair", &self.keypair)
            .finish_non_exhaustive()
    }
}

impl<S: RecordStore, C: ContentStore> Session<S, C> {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    /// The stored identity record as of the last password change.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn pipeline(&self) -> &DecryptionPipeline<C> {
        &self.pipeline
    }

    /// Encrypts and stores a file owned by this user.
    pub async fn upload_file(
        &self,
        parent_id: Option<&str>,
        name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> CoreResult<FileNode> {
        self.store_new_node(parent_id, name, mime_type, Some(bytes)).await
    }

    pub async fn create_directory(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> CoreResult<FileNode> {
        self.store_new_node(parent_id, name, None, None).await
    }

    async fn store_new_node(
        &self,
        parent_id: Option<&str>,
        name: &str,
        mime_type: Option<&str>,
        bytes: Option<&[u8]>,
    ) -> CoreResult<FileNode> {
        if let Some(parent_id) = parent_id {
            let parent = self.store.get_node(parent_id).await?;
            if !parent.is_directory {
                return Err(CoreError::Conflict(format!("{parent_id} is not a directory")));
            }
        }

        let keypair = Arc::clone(&self.keypair);
        let content = bytes.map(|b| Zeroizing::new(b.to_vec()));
        let name = Zeroizing::new(name.to_string());
        let mime_type = mime_type.map(str::to_string);

        let (upload, encrypted_key) = offload(move || {
            let key = create_file_key();
            let upload = encrypt_upload(
                content.as_ref().map(|c| c.as_slice()),
                &name,
                mime_type.as_deref(),
                &key,
            )?;
            let encrypted_key = file_keys::wrap_for_owner(&key, &keypair.public)?;
            Ok((upload, encrypted_key))
        })
        .await?;

        let (node, ciphertext) = upload.into_node(NodeDraft {
            id: uuid::Uuid::now_v7().to_string(),
            parent_id: parent_id.map(str::to_string),
            owner_id: self.user_id.clone(),
            uploader_id: self.user_id.clone(),
            encrypted_key,
        });

        if let Some(ciphertext) = ciphertext {
            self.content
                .put(&node.id, &node.fingerprint(), ciphertext)
                .await?;
        }
        self.store.put_node(node.clone()).await?;

        info!(
            file_id = %node.id,
            is_directory = node.is_directory,
            size = ?node.size,
            "stored new node"
        );
        Ok(node)
    }

    /// Replaces a file's content.
    ///
    /// The file key and every wrapping of it stay as they are; content and
    /// metadata are re-encrypted under a fresh node nonce, which changes the
    /// node's fingerprint and retires cached plaintext. The new ciphertext
    /// is stored as a new generation before the record switches to it, so
    /// a decrypt that read the previous record still opens the previous
    /// content.
    pub async fn update_file(&self, file_id: &str, bytes: &[u8]) -> CoreResult<FileNode> {
        let node = self.store.get_node(file_id).await?;
        if node.is_directory {
            return Err(CoreError::Conflict(format!("{file_id} is a directory")));
        }

        let material = self.key_material(&node).await?;
        let bytes = Zeroizing::new(bytes.to_vec());
        let current = node.clone();

        let upload = offload(move || {
            let key = material.unwrap_file_key()?;
            let (name, mime_type) = decrypt_metadata(&key, &current)?;
            encrypt_upload(Some(bytes.as_slice()), &name, mime_type.as_deref(), &key)
        })
        .await?;

        let (updated, ciphertext) = upload.into_node(NodeDraft {
            id: node.id,
            parent_id: node.parent_id,
            owner_id: node.owner_id,
            uploader_id: self.user_id.clone(),
            encrypted_key: node.encrypted_key,
        });

        if let Some(ciphertext) = ciphertext {
            self.content
                .put(&updated.id, &updated.fingerprint(), ciphertext)
                .await?;
        }
        self.store.put_node(updated.clone()).await?;
        self.pipeline.invalidate(file_id);

        info!(file_id, size = ?updated.size, "updated file content");
        Ok(updated)
    }

    /// Decrypts a node this user owns or has been granted.
    pub async fn decrypt(&self, file_id: &str) -> CoreResult<DecryptedHandle> {
        let node = self.store.get_node(file_id).await?;
        let material = self.key_material(&node).await?;
        self.pipeline.decrypt(&node, material).await
    }

    /// Unwraps the node's file key through this user's access path.
    pub async fn file_key(&self, file_id: &str) -> CoreResult<FileKey> {
        let node = self.store.get_node(file_id).await?;
        let material = self.key_material(&node).await?;
        offload(move || material.unwrap_file_key()).await
    }

    /// Owner reads the node's own wrapping; anyone else needs a grant.
    async fn key_material(&self, node: &FileNode) -> CoreResult<KeyMaterial> {
        let encrypted_key = if node.owner_id == self.user_id {
            node.encrypted_key.clone()
        } else {
            match self.store.get_grant(&node.id, &self.user_id).await {
                Ok(grant) => grant.encrypted_key,
                Err(CoreError::NotFound(_)) => {
                    debug!(file_id = %node.id, user_id = %self.user_id, "no grant for caller");
                    return Err(CoreError::KeyUnavailable);
                }
                Err(e) => return Err(e),
            }
        };

        Ok(KeyMaterial::Private {
            keypair: Arc::clone(&self.keypair),
            encrypted_key,
        })
    }

    pub async fn share_with_user(
        &self,
        file_id: &str,
        grantee_id: &str,
        edit_permission: bool,
    ) -> CoreResult<ShareGrant> {
        let key = self.file_key(file_id).await?;
        self.shares
            .share_with_user(file_id, grantee_id, &key, edit_permission)
            .await
    }

    pub async fn create_link(
        &self,
        file_id: &str,
        password: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<(LinkShare, LinkSecret)> {
        let key = self.file_key(file_id).await?;
        self.shares
            .create_link(file_id, &key, password, expires_at)
            .await
    }

    pub async fn revoke_user_share(&self, file_id: &str, user_id: &str) -> CoreResult<()> {
        self.shares.revoke_user_share(file_id, user_id).await
    }

    pub async fn revoke_link(&self, link_id: &str) -> CoreResult<()> {
        self.shares.revoke_link(link_id).await
    }

    pub async fn update_share_permission(
        &self,
        file_id: &str,
        user_id: &str,
        edit_permission: bool,
    ) -> CoreResult<ShareGrant> {
        self.shares
            .update_share_permission(file_id, user_id, edit_permission)
            .await
    }

    pub async fn list_grants(&self, file_id: &str) -> CoreResult<Vec<ShareGrant>> {
        self.shares.list_grants(file_id).await
    }

    pub async fn list_links(&self, file_id: &str) -> CoreResult<Vec<LinkShare>> {
        self.shares.list_links(file_id).await
    }

    /// Re-wraps this user's private key under `new_password` and persists
    /// the new identity record.
    pub async fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
    ) -> CoreResult<()> {
        let identity = self
            .identities
            .change_password(old_password, new_password, &self.identity)
            .await?;
        self.store.put_identity(identity.clone()).await?;
        self.identity = identity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryContent, MemoryStore};

    async fn veilbox() -> Veilbox<MemoryStore, MemoryContent> {
        Veilbox::new(
            VeilboxConfig::fast_for_tests(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryContent::new()),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = VeilboxConfig {
            fetch_retry_attempts: 0,
            ..VeilboxConfig::fast_for_tests()
        };
        let result = Veilbox::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryContent::new()),
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn register_twice_conflicts() {
        let vb = veilbox().await;
        vb.register("alice", "pw").await.unwrap();
        assert!(matches!(
            vb.register("alice", "pw").await,
            Err(CoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_login_is_auth_failure() {
        let vb = veilbox().await;
        assert_eq!(
            vb.login("nobody", "pw").await.unwrap_err(),
            CoreError::AuthFailure
        );
    }

    #[tokio::test]
    async fn parent_must_be_a_directory() {
        let vb = veilbox().await;
        let alice = vb.register("alice", "pw").await.unwrap();
        let file = alice.upload_file(None, "a.txt", None, b"a").await.unwrap();

        let err = alice
            .upload_file(Some(&file.id), "b.txt", None, b"b")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn directory_cannot_be_updated() {
        let vb = veilbox().await;
        let alice = vb.register("alice", "pw").await.unwrap();
        let dir = alice.create_directory(None, "Photos").await.unwrap();

        let err = alice.update_file(&dir.id, b"x").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
