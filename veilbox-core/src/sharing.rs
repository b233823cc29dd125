//! Share workflow: user grants, links, revocation, permission updates.
//!
//! Sharing re-wraps an already-unwrapped file key; it never touches file
//! content. Revocation deletes the grant or link record and leaves every
//! other access path intact.

use crate::blocking::offload;
use crate::config::LinkKeyPolicy;
use crate::error::{CoreError, CoreResult};
use crate::file_keys::{self, FileKey};
use crate::store::RecordStore;
use crate::types::{LinkSecret, LinkShare, ShareGrant};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use veilbox_crypto::{
    derive_key, derive_subkey, public_key_from_slice, DerivedKey, KdfParams, Salt,
};
use zeroize::Zeroizing;

const LINK_INFO: &[u8] = b"veilbox/link/v1";
const LINK_PASSWORD_INFO: &[u8] = b"veilbox/link+pw/v1";

/// Derives a link's wrapping key.
///
/// Without a password the key depends only on the link secret. With one,
/// the Argon2id-stretched password is folded in, so the secret alone is not
/// enough. Blocking; run through the offload helper from async code.
pub fn derive_link_key(
    secret: &LinkSecret,
    password: Option<&str>,
    salt: Option<&Salt>,
    kdf: &KdfParams,
    policy: LinkKeyPolicy,
) -> CoreResult<DerivedKey> {
    let base = match policy {
        LinkKeyPolicy::Hkdf => Zeroizing::new(secret.as_bytes().to_vec()),
        LinkKeyPolicy::Argon2Secret => {
            let salt = salt.ok_or(CoreError::KeyUnavailable)?;
            let stretched = derive_key(&secret.to_fragment(), salt, kdf)?;
            Zeroizing::new(stretched.as_bytes().to_vec())
        }
    };

    match password {
        None => Ok(derive_subkey(&base, LINK_INFO)?),
        Some(password) => {
            let salt = salt.ok_or(CoreError::KeyUnavailable)?;
            let password_key = derive_key(password, salt, kdf)?;

            let mut ikm = Zeroizing::new(Vec::with_capacity(base.len() + 32));
            ikm.extend_from_slice(&base);
            ikm.extend_from_slice(password_key.as_bytes());
            Ok(derive_subkey(&ikm, LINK_PASSWORD_INFO)?)
        }
    }
}

/// Orchestrates grants and link shares against the record store.
pub struct ShareManager<S: RecordStore> {
    store: Arc<S>,
    kdf: KdfParams,
    policy: LinkKeyPolicy,
}

impl<S: RecordStore> Clone for ShareManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            kdf: self.kdf.clone(),
            policy: self.policy,
        }
    }
}

impl<S: RecordStore> ShareManager<S> {
    pub fn new(store: Arc<S>, kdf: KdfParams, policy: LinkKeyPolicy) -> Self {
        Self { store, kdf, policy }
    }

    /// Wraps `file_key` for `grantee_id` and persists the grant.
    ///
    /// Re-sharing with the same user replaces their grant.
    pub async fn share_with_user(
        &self,
        file_id: &str,
        grantee_id: &str,
        file_key: &FileKey,
        edit_permission: bool,
    ) -> CoreResult<ShareGrant> {
        self.store.get_node(file_id).await?;
        let grantee = self.store.get_identity(grantee_id).await?;
        let grantee_pk = public_key_from_slice(&grantee.public_key)?;

        let key = file_key.clone();
        let encrypted_key =
            offload(move || Ok(file_keys::wrap_for_recipient(&key, &grantee_pk)?)).await?;

        let grant = ShareGrant {
            file_id: file_id.to_string(),
            user_id: grantee_id.to_string(),
            encrypted_key,
            edit_permission,
        };
        self.store.put_grant(grant.clone()).await?;

        info!(file_id, grantee_id, edit_permission, "created share grant");
        Ok(grant)
    }

    /// Creates a link share. The returned secret belongs in the URL fragment
    /// and is not stored anywhere.
    pub async fn create_link(
        &self,
        file_id: &str,
        file_key: &FileKey,
        password: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<(LinkShare, LinkSecret)> {
        self.store.get_node(file_id).await?;

        let policy = self.policy;
        let needs_salt = password.is_some() || policy == LinkKeyPolicy::Argon2Secret;
        let salt = needs_salt.then(Salt::random);
        let kdf = self.kdf.clone();
        let secret = LinkSecret::generate();
        let password = password.map(|p| Zeroizing::new(p.to_string()));
        let password_protected = password.is_some();
        let key = file_key.clone();

        let (wrapped_key, secret) = offload(move || {
            let password = password.as_deref().map(String::as_str);
            let link_key = derive_link_key(&secret, password, salt.as_ref(), &kdf, policy)?;
            Ok((file_keys::wrap_with_key(&key, &link_key)?, secret))
        })
        .await?;

        let link = LinkShare {
            link_id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            wrapped_key,
            password_protected,
            salt: salt.map(|s| s.as_bytes().to_vec()),
            kdf: needs_salt.then(|| self.kdf.clone()),
            key_derivation: policy,
            expires_at,
        };
        self.store.put_link(link.clone()).await?;

        info!(
            file_id,
            link_id = %link.link_id,
            password_protected,
            expires = ?link.expires_at,
            "created share link"
        );
        Ok((link, secret))
    }

    /// Looks up a link and opens its file key.
    ///
    /// Expired links are `LinkExpired` even though the record still exists.
    /// A missing or wrong password, a wrong secret and undecodable
    /// parameters are all `KeyUnavailable`. The file key is only returned
    /// once the link key has opened the link's wrapped key.
    pub async fn open_link(
        &self,
        link_id: &str,
        secret: &LinkSecret,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<(LinkShare, FileKey)> {
        let link = self.store.get_link(link_id).await?;
        if link.is_expired_at(now) {
            warn!(link_id, "rejected expired share link");
            return Err(CoreError::LinkExpired);
        }
        if link.password_protected && password.is_none() {
            return Err(CoreError::KeyUnavailable);
        }

        let salt = link
            .salt
            .as_deref()
            .map(Salt::from_slice)
            .transpose()
            .map_err(|_| CoreError::KeyUnavailable)?;
        let kdf = link.kdf.clone().unwrap_or_else(|| self.kdf.clone());
        let policy = link.key_derivation;
        let secret = secret.clone();
        let password = link
            .password_protected
            .then(|| password.map(|p| Zeroizing::new(p.to_string())))
            .flatten();
        let wrapped_key = link.wrapped_key.clone();

        let opened = offload(move || {
            let password = password.as_deref().map(String::as_str);
            let link_key = derive_link_key(&secret, password, salt.as_ref(), &kdf, policy)
                .map_err(|_| CoreError::KeyUnavailable)?;
            file_keys::unwrap_with_key(&wrapped_key, &link_key)
                .map_err(|_| CoreError::KeyUnavailable)
        })
        .await;

        match opened {
            Ok(file_key) => Ok((link, file_key)),
            Err(e) => {
                warn!(link_id, "share link key did not open");
                Err(e)
            }
        }
    }

    /// Deletes a user's grant. Other grants and the owner wrapping remain.
    pub async fn revoke_user_share(&self, file_id: &str, user_id: &str) -> CoreResult<()> {
        self.store.delete_grant(file_id, user_id).await?;
        info!(file_id, user_id, "revoked share grant");
        Ok(())
    }

    pub async fn revoke_link(&self, link_id: &str) -> CoreResult<()> {
        self.store.delete_link(link_id).await?;
        info!(link_id, "revoked share link");
        Ok(())
    }

    /// Changes a grant's edit permission. No key material is touched.
    pub async fn update_share_permission(
        &self,
        file_id: &str,
        user_id: &str,
        edit_permission: bool,
    ) -> CoreResult<ShareGrant> {
        let mut grant = self.store.get_grant(file_id, user_id).await?;
        grant.edit_permission = edit_permission;
        self.store.put_grant(grant.clone()).await?;
        info!(file_id, user_id, edit_permission, "updated share permission");
        Ok(grant)
    }

    pub async fn list_grants(&self, file_id: &str) -> CoreResult<Vec<ShareGrant>> {
        self.store.list_grants(file_id).await
    }

    pub async fn list_links(&self, file_id: &str) -> CoreResult<Vec<LinkShare>> {
        self.store.list_links(file_id).await
    }
}
