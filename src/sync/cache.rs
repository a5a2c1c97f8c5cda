//! Per-process snapshot cache keyed by `did`.
//!
//! Bounded by capacity (least recently used goes first) and by age. Entries
//! are dropped early when the [`ChangeBus`](super::notifier::ChangeBus)
//! reports a change for their user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::notifier::Invalidation;
use crate::queue::{HydratedSnapshot, Revision};

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: HydratedSnapshot,
    inserted_at: Instant,
    last_used: u64,
}

impl CacheEntry {
    fn revision(&self) -> Revision {
        self.snapshot.revision
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

pub struct QueueCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl QueueCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fresh snapshot for `did`, if any. Expired entries are removed.
    pub fn get(&self, did: &str) -> Option<HydratedSnapshot> {
        let mut inner = self.lock();
        inner.clock += 1;
        let now_tick = inner.clock;

        let expired = match inner.entries.get_mut(did) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_used = now_tick;
                return Some(entry.snapshot.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(did);
        }
        None
    }

    /// Store `snapshot` unless a newer revision is already cached.
    pub fn insert(&self, did: &str, snapshot: HydratedSnapshot) {
        let mut inner = self.lock();
        if let Some(existing) = inner.entries.get(did) {
            if existing.revision() > snapshot.revision {
                log::debug!(
                    "[cache] kept revision {} for {did}, ignoring older {}",
                    existing.revision(),
                    snapshot.revision
                );
                return;
            }
        }
        inner.clock += 1;
        let tick = inner.clock;

        if !inner.entries.contains_key(did) && inner.entries.len() >= self.capacity {
            let ttl = self.ttl;
            inner.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if inner.entries.len() >= self.capacity {
                let lru = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone());
                if let Some(key) = lru {
                    inner.entries.remove(&key);
                }
            }
        }

        inner.entries.insert(
            did.to_string(),
            CacheEntry {
                snapshot,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn invalidate(&self, did: &str) -> bool {
        self.lock().entries.remove(did).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision of the cached entry for `did`, ignoring age.
    pub fn cached_revision(&self, did: &str) -> Option<Revision> {
        self.lock().entries.get(did).map(CacheEntry::revision)
    }

    fn apply(&self, event: Invalidation) {
        match event {
            Invalidation::Queue(change) => {
                if self.invalidate(&change.did) {
                    log::debug!(
                        "[cache] evicted {} (revision {})",
                        change.did,
                        change.revision
                    );
                }
            }
            Invalidation::Resync => {
                log::info!("[cache] resync requested, clearing {} entries", self.len());
                self.clear();
            }
        }
    }
}

impl Default for QueueCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

/// Apply invalidations from the bus until it closes.
pub fn spawn_invalidation_task(
    cache: Arc<QueueCache>,
    mut events: broadcast::Receiver<Invalidation>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => cache.apply(event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("[cache] missed {missed} invalidations, clearing");
                    cache.clear();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
