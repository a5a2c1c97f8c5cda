//! Request-facing queue operations: cached reads with revision short-circuit,
//! compare-and-swap writes, and positional hydration against the catalog.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    catalog::{Preferences, TrackCatalog},
    db::store::{QueueStore, UpsertOutcome},
    error::QueueError,
    queue::{HydratedSnapshot, QueueState, Revision, Track},
    sync::cache::QueueCache,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The caller's revision is current; no body.
    NotModified(Revision),
    Snapshot(HydratedSnapshot),
}

pub struct QueueService {
    store: Arc<dyn QueueStore>,
    catalog: Arc<dyn TrackCatalog>,
    preferences: Arc<dyn Preferences>,
    cache: Arc<QueueCache>,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        catalog: Arc<dyn TrackCatalog>,
        preferences: Arc<dyn Preferences>,
        cache: Arc<QueueCache>,
    ) -> Self {
        Self {
            store,
            catalog,
            preferences,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<QueueCache> {
        &self.cache
    }

    /// Current snapshot for `did`, or `NotModified` when `if_none_match`
    /// contains the current revision.
    pub async fn get_queue(
        &self,
        did: &str,
        if_none_match: &[Revision],
    ) -> Result<ReadOutcome, QueueError> {
        let snapshot = self.load(did).await?;
        if if_none_match.contains(&snapshot.revision) {
            return Ok(ReadOutcome::NotModified(snapshot.revision));
        }
        Ok(ReadOutcome::Snapshot(snapshot))
    }

    /// Replace the queue for `did` if the stored revision is `expected`
    /// (`None` accepts any). Conflicts are surfaced, never merged.
    pub async fn update_queue(
        &self,
        did: &str,
        mut state: QueueState,
        expected: Option<Revision>,
    ) -> Result<HydratedSnapshot, QueueError> {
        let requested_index = state.current_index;
        if state.repair_index() {
            log::info!(
                "[queue] repaired current_index for {did}: {requested_index} -> {} of {}",
                state.current_index,
                state.len()
            );
        }

        let revision = match self.store.upsert(did, &state, expected.into()).await? {
            UpsertOutcome::Committed { revision, .. } => revision,
            UpsertOutcome::Conflict => return Err(QueueError::Conflict),
        };

        let (tracks, complete) = self.hydrate(did, &state.track_ids).await;
        let snapshot = HydratedSnapshot {
            state,
            revision,
            tracks,
        };
        if complete {
            self.cache.insert(did, snapshot.clone());
        }
        Ok(snapshot)
    }

    async fn load(&self, did: &str) -> Result<HydratedSnapshot, QueueError> {
        if let Some(hit) = self.cache.get(did) {
            log::debug!("[cache] hit for {did} (revision {})", hit.revision);
            return Ok(hit);
        }

        let (snapshot, complete) = match self.store.get(did).await? {
            Some(stored) => {
                let (tracks, complete) = self.hydrate(did, &stored.state.track_ids).await;
                let snapshot = HydratedSnapshot {
                    state: stored.state,
                    revision: stored.revision,
                    tracks,
                };
                (snapshot, complete)
            }
            None => (HydratedSnapshot::empty(self.default_auto_advance(did).await), true),
        };

        if complete {
            self.cache.insert(did, snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Resolve `track_ids` positionally with one catalog call. Duplicates
    /// hydrate independently; unresolved ids are dropped and the list closes
    /// up around them. The `bool` is false when the catalog itself failed, in
    /// which case the result must not be cached.
    pub async fn hydrate(&self, did: &str, track_ids: &[String]) -> (Vec<Track>, bool) {
        if track_ids.is_empty() {
            return (Vec::new(), true);
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = track_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let found = match self.catalog.tracks_by_file_id(&unique).await {
            Ok(found) => found,
            Err(e) => {
                log::error!("[queue] catalog lookup failed for {did}: {e}");
                return (Vec::new(), false);
            }
        };

        let tracks: Vec<Track> = track_ids
            .iter()
            .filter_map(|id| found.get(id).cloned())
            .collect();

        let missing = track_ids.len() - tracks.len();
        if missing > 0 {
            log::warn!("[queue] {missing} queued tracks for {did} no longer resolve, dropped from response");
        }
        (tracks, true)
    }

    async fn default_auto_advance(&self, did: &str) -> bool {
        match self.preferences.auto_advance(did).await {
            Ok(value) => value.unwrap_or(true),
            Err(e) => {
                log::warn!("[queue] preferences lookup failed for {did}: {e}");
                true
            }
        }
    }

    pub fn shutdown(&self) {
        log::info!("[queue] shutting down queue service");
        self.cache.clear();
    }
}
