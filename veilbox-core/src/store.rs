//! Seams to the REST/transport layer.
//!
//! The core never talks to the network directly. It consumes record CRUD
//! through [`RecordStore`] and ciphertext bytes through [`ContentStore`].
//! [`MemoryStore`] and [`MemoryContent`] are in-process implementations for
//! embedding and tests.

use crate::error::{CoreError, CoreResult};
use crate::types::{FileNode, Identity, LinkShare, ShareGrant};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// CRUD over the persisted records. Absent records are `CoreError::NotFound`.
pub trait RecordStore: Send + Sync + 'static {
    fn put_identity(&self, identity: Identity) -> impl Future<Output = CoreResult<()>> + Send;

    fn get_identity(&self, user_id: &str) -> impl Future<Output = CoreResult<Identity>> + Send;

    fn put_node(&self, node: FileNode) -> impl Future<Output = CoreResult<()>> + Send;

    fn get_node(&self, file_id: &str) -> impl Future<Output = CoreResult<FileNode>> + Send;

    fn put_grant(&self, grant: ShareGrant) -> impl Future<Output = CoreResult<()>> + Send;

    fn get_grant(
        &self,
        file_id: &str,
        user_id: &str,
    ) -> impl Future<Output = CoreResult<ShareGrant>> + Send;

    fn delete_grant(
        &self,
        file_id: &str,
        user_id: &str,
    ) -> impl Future<Output = CoreResult<()>> + Send;

    fn list_grants(&self, file_id: &str)
    -> impl Future<Output = CoreResult<Vec<ShareGrant>>> + Send;

    fn put_link(&self, link: LinkShare) -> impl Future<Output = CoreResult<()>> + Send;

    fn get_link(&self, link_id: &str) -> impl Future<Output = CoreResult<LinkShare>> + Send;

    fn delete_link(&self, link_id: &str) -> impl Future<Output = CoreResult<()>> + Send;

    fn list_links(&self, file_id: &str) -> impl Future<Output = CoreResult<Vec<LinkShare>>> + Send;
}

/// Byte storage for ciphertext, keyed by file id and node generation.
///
/// The generation is the fingerprint of the node record the ciphertext was
/// written for. Storing a new generation must leave the previous one
/// readable, so a reader holding the older record still gets matching bytes.
pub trait ContentStore: Send + Sync + 'static {
    fn put(
        &self,
        file_id: &str,
        generation: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = CoreResult<()>> + Send;

    /// Fetches ciphertext. Transient failures should be `CoreError::Fetch`.
    fn fetch(
        &self,
        file_id: &str,
        generation: &str,
    ) -> impl Future<Output = CoreResult<Vec<u8>>> + Send;
}

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<String, Identity>>,
    nodes: RwLock<HashMap<String, FileNode>>,
    grants: RwLock<HashMap<(String, String), ShareGrant>>,
    links: RwLock<HashMap<String, LinkShare>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    async fn put_identity(&self, identity: Identity) -> CoreResult<()> {
        self.identities
            .write()
            .await
            .insert(identity.user_id.clone(), identity);
        Ok(())
    }

    async fn get_identity(&self, user_id: &str) -> CoreResult<Identity> {
        self.identities
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("identity {user_id}")))
    }

    async fn put_node(&self, node: FileNode) -> CoreResult<()> {
        self.nodes.write().await.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, file_id: &str) -> CoreResult<FileNode> {
        self.nodes
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("file {file_id}")))
    }

    async fn put_grant(&self, grant: ShareGrant) -> CoreResult<()> {
        let key = (grant.file_id.clone(), grant.user_id.clone());
        self.grants.write().await.insert(key, grant);
        Ok(())
    }

    async fn get_grant(&self, file_id: &str, user_id: &str) -> CoreResult<ShareGrant> {
        self.grants
            .read()
            .await
            .get(&(file_id.to_string(), user_id.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("grant {file_id}/{user_id}")))
    }

    async fn delete_grant(&self, file_id: &str, user_id: &str) -> CoreResult<()> {
        self.grants
            .write()
            .await
            .remove(&(file_id.to_string(), user_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("grant {file_id}/{user_id}")))
    }

    async fn list_grants(&self, file_id: &str) -> CoreResult<Vec<ShareGrant>> {
        let mut grants: Vec<ShareGrant> = self
            .grants
            .read()
            .await
            .values()
            .filter(|g| g.file_id == file_id)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(grants)
    }

    async fn put_link(&self, link: LinkShare) -> CoreResult<()> {
        self.links.write().await.insert(link.link_id.clone(), link);
        Ok(())
    }

    async fn get_link(&self, link_id: &str) -> CoreResult<LinkShare> {
        self.links
            .read()
            .await
            .get(link_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("link {link_id}")))
    }

    async fn delete_link(&self, link_id: &str) -> CoreResult<()> {
        self.links
            .write()
            .await
            .remove(link_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("link {link_id}")))
    }

    async fn list_links(&self, file_id: &str) -> CoreResult<Vec<LinkShare>> {
        let mut links: Vec<LinkShare> = self
            .links
            .read()
            .await
            .values()
            .filter(|l| l.file_id == file_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.link_id.cmp(&b.link_id));
        Ok(links)
    }
}

/// Generations kept per file: the current one and the one before it.
const RETAINED_GENERATIONS: usize = 2;

/// In-memory [`ContentStore`] that can simulate a slow or flaky network.
#[derive(Default)]
pub struct MemoryContent {
    /// Newest generation at the back.
    blobs: RwLock<HashMap<String, VecDeque<(String, Vec<u8>)>>>,
    fetches: AtomicUsize,
    failures_remaining: AtomicU32,
    latency: Option<Duration>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The next `count` fetches fail with a transient `CoreError::Fetch`.
    pub fn fail_next_fetches(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of fetch attempts served so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Overwrites the newest stored ciphertext without going through the core.
    pub async fn tamper(&self, file_id: &str, f: impl FnOnce(&mut Vec<u8>)) {
        let mut blobs = self.blobs.write().await;
        if let Some((_, bytes)) = blobs.get_mut(file_id).and_then(|g| g.back_mut()) {
            f(bytes);
        }
    }

    /// Number of generations currently held for `file_id`.
    pub async fn generations(&self, file_id: &str) -> usize {
        self.blobs.read().await.get(file_id).map_or(0, VecDeque::len)
    }
}

impl ContentStore for MemoryContent {
    async fn put(&self, file_id: &str, generation: &str, bytes: Vec<u8>) -> CoreResult<()> {
        let mut blobs = self.blobs.write().await;
        let generations = blobs.entry(file_id.to_string()).or_default();
        generations.retain(|(g, _)| g != generation);
        generations.push_back((generation.to_string(), bytes));
        while generations.len() > RETAINED_GENERATIONS {
            generations.pop_front();
        }
        Ok(())
    }

    async fn fetch(&self, file_id: &str, generation: &str) -> CoreResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoreError::Fetch(format!("simulated outage for {file_id}")));
        }

        self.blobs
            .read()
            .await
            .get(file_id)
            .and_then(|generations| generations.iter().find(|(g, _)| g == generation))
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| CoreError::NotFound(format!("content {file_id}")))
    }
}
