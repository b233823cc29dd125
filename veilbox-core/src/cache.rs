//! Decrypted-entry cache and in-flight decrypt table.
//!
//! Both tables live behind one mutex so "is it cached / is it in flight /
//! start it" is a single atomic step. The lock is never held across an
//! await point.
//!
//! Every in-flight decrypt gets a generation number. Waiting callers hold a
//! [`Ticket`] for that generation; when the decrypt lands, the entry is
//! inserted with one holder per outstanding ticket. A ticket dropped before
//! it is redeemed gives its slot back, so a caller that walked away never
//! owns anything. Dropping the last [`DecryptedHandle`] evicts the entry.

use crate::error::{CoreError, CoreResult};
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use zeroize::Zeroize;

/// Plaintext of one node, held only in volatile memory.
#[derive(Debug)]
pub struct DecryptedFile {
    pub file_id: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub is_directory: bool,
    pub bytes: Vec<u8>,
}

impl DecryptedFile {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl Drop for DecryptedFile {
    fn drop(&mut self) {
        self.bytes.zeroize();
        self.name.zeroize();
    }
}

/// Output of one coalesced decrypt, shared by every waiting caller.
pub(crate) type DecryptOutcome = CoreResult<Arc<DecryptedFile>>;
pub(crate) type SharedDecrypt = Shared<BoxFuture<'static, DecryptOutcome>>;

struct CacheEntry {
    generation: u64,
    fingerprint: String,
    file: Arc<DecryptedFile>,
    holders: usize,
}

struct InFlight {
    generation: u64,
    fingerprint: String,
    future: SharedDecrypt,
    waiting: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    inflight: HashMap<String, InFlight>,
    retained_bytes: u64,
    next_generation: u64,
}

impl CacheState {
    fn evict(&mut self, file_id: &str) -> bool {
        match self.entries.remove(file_id) {
            Some(entry) => {
                self.retained_bytes = self.retained_bytes.saturating_sub(entry.file.size_bytes());
                debug!(file_id, "evicted decrypted entry");
                true
            }
            None => false,
        }
    }

    /// Drops one holder of `generation`, wherever it currently lives.
    fn release(&mut self, file_id: &str, generation: u64) {
        if let Some(flight) = self.inflight.get_mut(file_id) {
            if flight.generation == generation {
                flight.waiting = flight.waiting.saturating_sub(1);
                return;
            }
        }
        let now_unused = match self.entries.get_mut(file_id) {
            Some(entry) if entry.generation == generation => {
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders == 0
            }
            _ => false,
        };
        if now_unused {
            self.evict(file_id);
        }
    }
}

/// Result of [`DecryptedCache::admit`].
pub(crate) enum Admission {
    /// Already decrypted for this fingerprint.
    Cached(DecryptedHandle),
    /// Wait on `future`, then redeem `ticket`.
    Pending {
        ticket: Ticket,
        future: SharedDecrypt,
        coalesced: bool,
    },
}

/// Session-scoped table of decrypted entries and in-flight decrypts.
#[derive(Clone)]
pub struct DecryptedCache {
    state: Arc<Mutex<CacheState>>,
    max_bytes: u64,
}

impl DecryptedCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    /// Returns a cached handle, joins an in-flight decrypt, or starts one.
    ///
    /// `start` is called with the new generation while the lock is held and
    /// must only spawn work, never block.
    pub(crate) fn admit(
        &self,
        file_id: &str,
        fingerprint: &str,
        start: impl FnOnce(u64) -> SharedDecrypt,
    ) -> Admission {
        let mut state = self.lock();

        let cached = match state.entries.get_mut(file_id) {
            Some(entry) if entry.fingerprint == fingerprint => {
                entry.holders += 1;
                Some((entry.generation, Arc::clone(&entry.file)))
            }
            Some(_) => None,
            None => None,
        };
        if let Some((generation, file)) = cached {
            return Admission::Cached(DecryptedHandle::attached(
                file,
                Arc::clone(&self.state),
                generation,
            ));
        }
        // Anything left under this id belongs to an older generation of
        // the node.
        state.evict(file_id);

        if let Some(flight) = state.inflight.get_mut(file_id) {
            if flight.fingerprint == fingerprint {
                flight.waiting += 1;
                let ticket = Ticket::new(Arc::clone(&self.state), file_id, flight.generation);
                return Admission::Pending {
                    ticket,
                    future: flight.future.clone(),
                    coalesced: true,
                };
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let future = start(generation);
        state.inflight.insert(
            file_id.to_string(),
            InFlight {
                generation,
                fingerprint: fingerprint.to_string(),
                future: future.clone(),
                waiting: 1,
            },
        );
        Admission::Pending {
            ticket: Ticket::new(Arc::clone(&self.state), file_id, generation),
            future,
            coalesced: false,
        }
    }

    /// Called by the decrypt task when it finishes.
    ///
    /// Moves a successful result into the entry table with one holder per
    /// still-waiting ticket. Results over budget, failures, and results for
    /// superseded generations are not retained.
    pub(crate) fn complete(&self, file_id: &str, generation: u64, outcome: &DecryptOutcome) {
        let mut state = self.lock();

        let waiting = match state.inflight.get(file_id) {
            Some(flight) if flight.generation == generation => flight.waiting,
            _ => return,
        };
        let fingerprint = state
            .inflight
            .remove(file_id)
            .map(|flight| flight.fingerprint)
            .unwrap_or_default();

        let Ok(file) = outcome else {
            return;
        };
        if waiting == 0 {
            debug!(file_id, "decrypt finished with no remaining subscribers");
            return;
        }
        if state.retained_bytes + file.size_bytes() > self.max_bytes {
            debug!(
                file_id,
                size = file.size_bytes(),
                "decrypted entry over cache budget, not retained"
            );
            return;
        }

        state.retained_bytes += file.size_bytes();
        state.entries.insert(
            file_id.to_string(),
            CacheEntry {
                generation,
                fingerprint,
                file: Arc::clone(file),
                holders: waiting,
            },
        );
        debug!(file_id, holders = waiting, "cached decrypted entry");
    }

    /// Drops the cached entry and any in-flight decrypt for `file_id`.
    ///
    /// Outstanding handles keep their plaintext until dropped but no longer
    /// count toward the cache.
    pub fn invalidate(&self, file_id: &str) -> bool {
        let mut state = self.lock();
        let in_flight = state.inflight.remove(file_id).is_some();
        state.evict(file_id) || in_flight
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.lock().entries.contains_key(file_id)
    }

    pub fn retained_bytes(&self) -> u64 {
        self.lock().retained_bytes
    }

    /// Number of callers currently attached to the cached entry.
    pub fn holders(&self, file_id: &str) -> usize {
        self.lock()
            .entries
            .get(file_id)
            .map(|entry| entry.holders)
            .unwrap_or(0)
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    // A panic while holding the lock cannot leave the maps half-updated.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A reserved place in an in-flight decrypt.
pub(crate) struct Ticket {
    state: Arc<Mutex<CacheState>>,
    file_id: String,
    generation: u64,
    armed: bool,
}

impl Ticket {
    fn new(state: Arc<Mutex<CacheState>>, file_id: &str, generation: u64) -> Self {
        Self {
            state,
            file_id: file_id.to_string(),
            generation,
            armed: true,
        }
    }

    /// Turns the shared outcome into this caller's handle.
    pub fn redeem(mut self, outcome: DecryptOutcome) -> CoreResult<DecryptedHandle> {
        match outcome {
            Ok(file) => {
                self.armed = false;
                Ok(DecryptedHandle::attached(
                    file,
                    Arc::clone(&self.state),
                    self.generation,
                ))
            }
            Err(err) => {
                // Covers a task that died before reporting completion.
                let mut state = lock_state(&self.state);
                if state
                    .inflight
                    .get(&self.file_id)
                    .is_some_and(|f| f.generation == self.generation)
                {
                    state.inflight.remove(&self.file_id);
                }
                drop(state);
                self.armed = false;
                Err(err)
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.armed {
            lock_state(&self.state).release(&self.file_id, self.generation);
        }
    }
}

/// A caller's hold on decrypted plaintext.
///
/// Dereferences to [`DecryptedFile`]. Dropping it (or calling
/// [`DecryptedHandle::release`]) gives up the hold; the last one out evicts
/// the cache entry.
pub struct DecryptedHandle {
    file: Arc<DecryptedFile>,
    state: Arc<Mutex<CacheState>>,
    generation: u64,
}

impl DecryptedHandle {
    fn attached(file: Arc<DecryptedFile>, state: Arc<Mutex<CacheState>>, generation: u64) -> Self {
        Self {
            file,
            state,
            generation,
        }
    }

    /// Explicitly releases the hold.
    pub fn release(self) {}

    pub fn file(&self) -> &DecryptedFile {
        &self.file
    }
}

impl Deref for DecryptedHandle {
    type Target = DecryptedFile;

    fn deref(&self) -> &DecryptedFile {
        &self.file
    }
}

impl std::fmt::Debug for DecryptedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedHandle")
            .field("file_id", &self.file.file_id)
            .field("size", &self.file.size_bytes())
            .finish()
    }
}

impl Drop for DecryptedHandle {
    fn drop(&mut self) {
        let file_id = self.file.file_id.clone();
        lock_state(&self.state).release(&file_id, self.generation);
    }
}
