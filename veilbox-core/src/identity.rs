//! Identity lifecycle: register, login, change password.
//!
//! The long-term X25519 private key is wrapped under an Argon2id key derived
//! from the user's password. Login re-derives that key; it never creates a
//! new keypair. A password change re-wraps the same private key bytes.

use crate::blocking::offload;
use crate::error::{CoreError, CoreResult};
use crate::types::Identity;
use tracing::{debug, info, warn};
use veilbox_crypto::{
    decrypt_private_key, derive_key, encrypt_private_key, generate_keypair, nonce_from_slice,
    random_nonce, IdentityKeyPair, KdfParams, Salt,
};
use zeroize::Zeroizing;

/// Creates and unlocks identities. Holds only the configured KDF cost.
#[derive(Clone, Debug)]
pub struct IdentityManager {
    kdf: KdfParams,
}

impl IdentityManager {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Generates a keypair and wraps its private half under `password`.
    ///
    /// Returns the public record for persistence plus the unlocked keypair
    /// for immediate use.
    pub async fn register(
        &self,
        user_id: &str,
        password: &str,
    ) -> CoreResult<(Identity, IdentityKeyPair)> {
        let user_id = user_id.to_string();
        let password = Zeroizing::new(password.to_string());
        let kdf = self.kdf.clone();

        let (identity, keypair) = offload(move || {
            let keypair = generate_keypair();
            let identity = wrap_identity(&user_id, &keypair, &password, &kdf)?;
            Ok((identity, keypair))
        })
        .await?;

        info!(user_id = %identity.user_id, "registered identity");
        Ok((identity, keypair))
    }

    /// Unlocks the private key stored in `identity`.
    ///
    /// Wrong password, tampered ciphertext and malformed fields all report
    /// `AuthFailure`; they are deliberately indistinguishable.
    pub async fn login(&self, password: &str, identity: &Identity) -> CoreResult<IdentityKeyPair> {
        let password = Zeroizing::new(password.to_string());
        let identity_owned = identity.clone();

        let result = offload(move || unwrap_identity(&password, &identity_owned)).await;
        match &result {
            Ok(_) => debug!(user_id = %identity.user_id, "identity unlocked"),
            Err(_) => warn!(user_id = %identity.user_id, "identity unlock failed"),
        }
        result
    }

    /// Re-wraps the existing private key under `new_password`.
    ///
    /// Requires `old_password` to unlock first. The private and public key
    /// bytes are unchanged; salt and IV are fresh. New cost parameters apply.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        identity: &Identity,
    ) -> CoreResult<Identity> {
        let keypair = self.login(old_password, identity).await?;

        let user_id = identity.user_id.clone();
        let new_password = Zeroizing::new(new_password.to_string());
        let kdf = self.kdf.clone();

        let rewrapped =
            offload(move || wrap_identity(&user_id, &keypair, &new_password, &kdf)).await?;

        info!(user_id = %rewrapped.user_id, "identity re-wrapped under new password");
        Ok(rewrapped)
    }
}

fn wrap_identity(
    user_id: &str,
    keypair: &IdentityKeyPair,
    password: &str,
    kdf: &KdfParams,
) -> CoreResult<Identity> {
    let salt = Salt::random();
    let iv = random_nonce();
    let wrapping_key = derive_key(password, &salt, kdf)?;
    let encrypted_private_key = encrypt_private_key(&keypair.secret, &wrapping_key, &iv)?;

    Ok(Identity {
        user_id: user_id.to_string(),
        public_key: keypair.public_bytes().to_vec(),
        encrypted_private_key,
        salt: salt.as_bytes().to_vec(),
        iv: iv.to_vec(),
        kdf: kdf.clone(),
    })
}

fn unwrap_identity(password: &str, identity: &Identity) -> CoreResult<IdentityKeyPair> {
    let salt = Salt::from_slice(&identity.salt).map_err(|_| CoreError::AuthFailure)?;
    let iv = nonce_from_slice(&identity.iv).map_err(|_| CoreError::AuthFailure)?;
    let wrapping_key =
        derive_key(password, &salt, &identity.kdf).map_err(|_| CoreError::AuthFailure)?;

    let secret = decrypt_private_key(&identity.encrypted_private_key, &wrapping_key, &iv)
        .map_err(|_| CoreError::AuthFailure)?;
    let keypair = IdentityKeyPair::from(secret);

    // The stored public key must belong to the unwrapped secret.
    if keypair.public_bytes().as_slice() != identity.public_key.as_slice() {
        return Err(CoreError::AuthFailure);
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> IdentityManager {
        IdentityManager::new(KdfParams::fast_for_tests())
    }

    #[tokio::test]
    async fn mismatched_public_key_is_auth_failure() {
        let mgr = manager();
        let (mut identity, _) = mgr.register("alice", "pw").await.unwrap();
        identity.public_key = generate_keypair().public_bytes().to_vec();

        assert_eq!(
            mgr.login("pw", &identity).await.unwrap_err(),
            CoreError::AuthFailure
        );
    }

    #[tokio::test]
    async fn malformed_salt_is_auth_failure() {
        let mgr = manager();
        let (mut identity, _) = mgr.register("alice", "pw").await.unwrap();
        identity.salt.truncate(3);

        assert_eq!(
            mgr.login("pw", &identity).await.unwrap_err(),
            CoreError::AuthFailure
        );
    }

    #[tokio::test]
    async fn login_uses_stored_kdf_params() {
        let (identity, kp) = manager().register("alice", "pw").await.unwrap();

        // A manager configured with different cost can still unlock.
        let other = IdentityManager::new(KdfParams {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        });
        let unlocked = other.login("pw", &identity).await.unwrap();
        assert_eq!(unlocked.secret_bytes(), kp.secret_bytes());
    }
}
