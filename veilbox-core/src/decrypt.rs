//! On-demand decrypt pipeline.
//!
//! One decrypt is: unwrap the file key with whatever key material the
//! caller holds, fetch ciphertext, open content, open name and mime type.
//! Concurrent requests for the same node generation share a single run of
//! that sequence. The run is a spawned task, so it finishes for the callers
//! still waiting even when the one that started it goes away.

use crate::blocking::offload;
use crate::cache::{Admission, DecryptedCache, DecryptedFile, DecryptedHandle, DecryptOutcome};
use crate::config::RetryPolicy;
use crate::error::{CoreError, CoreResult};
use crate::file_keys::{self, FileKey};
use crate::store::ContentStore;
use crate::types::FileNode;
use crate::upload::{decrypt_field, decrypt_metadata, Field};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use veilbox_crypto::IdentityKeyPair;

/// Key material a caller can present to open a node's file key.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Owner or grantee: their keypair plus the envelope sealed to it.
    Private {
        keypair: Arc<IdentityKeyPair>,
        encrypted_key: String,
    },
    /// Link share: the file key, already opened with the link key.
    Link { file_key: FileKey },
}

impl KeyMaterial {
    /// Opens the file key. Any failure means this caller has no valid path.
    pub(crate) fn unwrap_file_key(&self) -> CoreResult<FileKey> {
        match self {
            KeyMaterial::Private {
                keypair,
                encrypted_key,
            } => file_keys::unwrap(encrypted_key, &keypair.secret)
                .map_err(|_| CoreError::KeyUnavailable),
            KeyMaterial::Link { file_key } => Ok(file_key.clone()),
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Private { .. } => f.write_str("KeyMaterial::Private"),
            KeyMaterial::Link { .. } => f.write_str("KeyMaterial::Link"),
        }
    }
}

/// Counters for observing pipeline behaviour.
#[derive(Debug, Default)]
struct PipelineCounters {
    fetches: AtomicU64,
    unwraps: AtomicU64,
    decrypts: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
}

/// Point-in-time copy of pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Ciphertext fetch attempts, including retries.
    pub fetches: u64,
    /// File key unwrap operations.
    pub unwraps: u64,
    /// Decrypt runs that completed, successfully or not.
    pub decrypts: u64,
    /// Requests answered from the decrypted-entry cache.
    pub cache_hits: u64,
    /// Requests that joined an already running decrypt.
    pub coalesced: u64,
}

/// Decrypts nodes for one session.
pub struct DecryptionPipeline<C: ContentStore> {
    content: Arc<C>,
    cache: DecryptedCache,
    counters: Arc<PipelineCounters>,
    retry: RetryPolicy,
}

impl<C: ContentStore> Clone for DecryptionPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            content: Arc::clone(&self.content),
            cache: self.cache.clone(),
            counters: Arc::clone(&self.counters),
            retry: self.retry,
        }
    }
}

impl<C: ContentStore> DecryptionPipeline<C> {
    pub(crate) fn new(content: Arc<C>, retry: RetryPolicy, max_cache_bytes: u64) -> Self {
        Self {
            content,
            cache: DecryptedCache::new(max_cache_bytes),
            counters: Arc::new(PipelineCounters::default()),
            retry,
        }
    }

    /// Decrypts `node` using `material`.
    ///
    /// Returns a handle to the plaintext. Callers for the same node
    /// generation that overlap in time share one unwrap, one fetch and one
    /// decrypt, and all see the same outcome.
    pub async fn decrypt(
        &self,
        node: &FileNode,
        material: KeyMaterial,
    ) -> CoreResult<DecryptedHandle> {
        let fingerprint = node.fingerprint();

        let admission = self.cache.admit(&node.id, &fingerprint, |generation| {
            let cache = self.cache.clone();
            let content = Arc::clone(&self.content);
            let counters = Arc::clone(&self.counters);
            let retry = self.retry;
            let node = node.clone();

            let task = tokio::spawn(async move {
                let outcome = run_decrypt(&*content, &counters, retry, &node, material).await;
                counters.decrypts.fetch_add(1, Ordering::Relaxed);
                cache.complete(&node.id, generation, &outcome);
                outcome
            });

            task.map(|joined| joined.unwrap_or_else(|e| Err(CoreError::from(e))))
                .boxed()
                .shared()
        });

        match admission {
            Admission::Cached(handle) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(file_id = %node.id, "decrypt served from cache");
                Ok(handle)
            }
            Admission::Pending {
                ticket,
                future,
                coalesced,
            } => {
                if coalesced {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(file_id = %node.id, "joined in-flight decrypt");
                }
                let outcome = future.await;
                ticket.redeem(outcome)
            }
        }
    }

    /// Drops any cached plaintext for `file_id` (e.g. after an edit).
    pub fn invalidate(&self, file_id: &str) -> bool {
        self.cache.invalidate(file_id)
    }

    pub fn cache(&self) -> &DecryptedCache {
        &self.cache
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            unwraps: self.counters.unwraps.load(Ordering::Relaxed),
            decrypts: self.counters.decrypts.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }
}

async fn run_decrypt<C: ContentStore>(
    content: &C,
    counters: &PipelineCounters,
    retry: RetryPolicy,
    node: &FileNode,
    material: KeyMaterial,
) -> DecryptOutcome {
    // 1. File key.
    counters.unwraps.fetch_add(1, Ordering::Relaxed);
    let file_key = offload(move || material.unwrap_file_key()).await?;

    // 2. Ciphertext.
    let ciphertext = if node.is_directory {
        None
    } else {
        Some(fetch_with_retry(content, counters, retry, node).await?)
    };

    // 3 + 4. Content and metadata.
    let node_owned = node.clone();
    let file = offload(move || open_node(&file_key, &node_owned, ciphertext)).await?;

    debug!(file_id = %node.id, size = file.size_bytes(), "decrypted node");
    Ok(Arc::new(file))
}

fn open_node(
    key: &FileKey,
    node: &FileNode,
    ciphertext: Option<Vec<u8>>,
) -> CoreResult<DecryptedFile> {
    let nonce = node.node_nonce()?;
    let bytes = match ciphertext {
        Some(ct) => decrypt_field(key, &nonce, Field::Content, &ct)
            .map_err(|_| CoreError::DecryptFailure)?,
        None => Vec::new(),
    };
    let (name, mime_type) = decrypt_metadata(key, node)?;

    Ok(DecryptedFile {
        file_id: node.id.clone(),
        name,
        mime_type,
        is_directory: node.is_directory,
        bytes,
    })
}

async fn fetch_with_retry<C: ContentStore>(
    content: &C,
    counters: &PipelineCounters,
    retry: RetryPolicy,
    node: &FileNode,
) -> CoreResult<Vec<u8>> {
    let file_id = node.id.as_str();
    let generation = node.fingerprint();
    let mut attempt = 1;
    loop {
        counters.fetches.fetch_add(1, Ordering::Relaxed);
        match content.fetch(file_id, &generation).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < retry.attempts => {
                warn!(file_id, attempt, "ciphertext fetch failed, retrying: {e}");
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
