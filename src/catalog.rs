//! Collaborators the queue consumes but does not own: the track catalog
//! (batch metadata lookup by file id) and per-user preferences.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::db::store::StoreError;
use crate::queue::Track;

#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Resolve a batch of file ids in one round trip. Unknown ids are simply
    /// absent from the result.
    async fn tracks_by_file_id(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, Track>, StoreError>;
}

#[async_trait]
pub trait Preferences: Send + Sync {
    /// `None` when the user has no stored preference.
    async fn auto_advance(&self, did: &str) -> Result<Option<bool>, StoreError>;
}

/// In-memory catalog for embedding and tests.
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: RwLock<HashMap<String, Track>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let catalog = Self::new();
        for track in tracks {
            catalog.insert(track);
        }
        catalog
    }

    pub fn insert(&self, track: Track) {
        let mut tracks = self.tracks.write().unwrap_or_else(|p| p.into_inner());
        tracks.insert(track.file_id.clone(), track);
    }

    pub fn remove(&self, file_id: &str) -> Option<Track> {
        let mut tracks = self.tracks.write().unwrap_or_else(|p| p.into_inner());
        tracks.remove(file_id)
    }
}

#[async_trait]
impl TrackCatalog for MemoryCatalog {
    async fn tracks_by_file_id(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, Track>, StoreError> {
        let tracks = self.tracks.read().unwrap_or_else(|p| p.into_inner());
        Ok(file_ids
            .iter()
            .filter_map(|id| tracks.get(id).map(|t| (id.clone(), t.clone())))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    auto_advance: RwLock<HashMap<String, bool>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_auto_advance(&self, did: &str, value: bool) {
        let mut prefs = self.auto_advance.write().unwrap_or_else(|p| p.into_inner());
        prefs.insert(did.to_string(), value);
    }
}

#[async_trait]
impl Preferences for MemoryPreferences {
    async fn auto_advance(&self, did: &str) -> Result<Option<bool>, StoreError> {
        let prefs = self.auto_advance.read().unwrap_or_else(|p| p.into_inner());
        Ok(prefs.get(did).copied())
    }
}
