use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Optimistic-lock token for a user's queue row. Also served as the HTTP ETag.
pub type Revision = i64;

/// Revision reported for a user that has never written a queue.
/// A write expecting this revision against an absent row creates it at 1.
pub const INITIAL_REVISION: Revision = 0;

// ── Queue state ──────────────────────────────────────────────────────────────

/// Persisted per-user playback queue.
///
/// `track_ids` may hold the same id more than once; each position is
/// independent. `current_track_id` mirrors `track_ids[current_index]` and is
/// used to re-anchor the position when the index is out of range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueState {
    pub track_ids: Vec<String>,
    /// Negative values from clients read as out of range and get repaired.
    #[serde(deserialize_with = "lenient_index")]
    pub current_index: usize,
    pub current_track_id: Option<String>,
    pub shuffle: bool,
    pub original_order_ids: Vec<String>,
    pub auto_advance: bool,
    /// Seconds into the current track. Opaque to the server.
    pub playback_position: f64,
    pub is_paused: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            track_ids: Vec::new(),
            current_index: 0,
            current_track_id: None,
            shuffle: false,
            original_order_ids: Vec::new(),
            auto_advance: true,
            playback_position: 0.0,
            is_paused: true,
        }
    }
}

impl QueueState {
    pub fn empty(auto_advance: bool) -> Self {
        Self {
            auto_advance,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.track_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty()
    }

    pub fn current(&self) -> Option<&str> {
        self.track_ids.get(self.current_index).map(String::as_str)
    }

    /// Entries strictly after the current position.
    pub fn up_next(&self) -> &[String] {
        let start = self.current_index.saturating_add(1).min(self.track_ids.len());
        &self.track_ids[start..]
    }

    pub(crate) fn sync_current_track_id(&mut self) {
        self.current_track_id = self.track_ids.get(self.current_index).cloned();
    }
}

fn lenient_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(usize::try_from(raw).unwrap_or(usize::MAX))
}

// ── Catalog records ──────────────────────────────────────────────────────────

/// Display metadata for one track file, as returned by the track catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub file_id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
}

// ── Snapshots ────────────────────────────────────────────────────────────────

/// A queue row as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQueue {
    pub state: QueueState,
    pub revision: Revision,
    pub updated_at: DateTime<Utc>,
}

/// `{state, revision, tracks}` as returned to callers. `tracks` is aligned
/// with `state.track_ids` minus any ids the catalog could not resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedSnapshot {
    pub state: QueueState,
    pub revision: Revision,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl HydratedSnapshot {
    pub fn empty(auto_advance: bool) -> Self {
        Self {
            state: QueueState::empty(auto_advance),
            revision: INITIAL_REVISION,
            tracks: Vec::new(),
        }
    }
}

// ── ETag helpers ─────────────────────────────────────────────────────────────

/// `7` → `"7"` (strong ETag).
pub fn format_etag(revision: Revision) -> String {
    format!("\"{revision}\"")
}

/// Parse a single entity tag into a revision. Accepts quoted, unquoted and
/// weak (`W/"7"`) forms.
pub fn parse_etag(value: &str) -> Option<Revision> {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    value.trim_matches('"').parse().ok()
}

/// Parse an `If-None-Match` list. Unparseable members are skipped.
pub fn parse_etag_list(value: &str) -> Vec<Revision> {
    value.split(',').filter_map(parse_etag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_index_reads_as_out_of_range() {
        let mut state: QueueState = serde_json::from_str(
            r#"{"track_ids":["a","b","c"],"current_index":-1,"current_track_id":"b"}"#,
        )
        .unwrap();
        assert!(state.current_index >= state.len());
        assert!(state.up_next().is_empty());

        assert!(state.repair_index());
        assert_eq!(state.current_index, 1);
        assert_eq!(state.current(), Some("b"));
    }

    #[test]
    fn partial_payload_fills_defaults() {
        let state: QueueState =
            serde_json::from_str(r#"{"track_ids":["a","b"],"current_index":1}"#).unwrap();
        assert_eq!(state.track_ids, vec!["a", "b"]);
        assert_eq!(state.current_index, 1);
        assert!(state.auto_advance);
        assert!(state.is_paused);
        assert_eq!(state.playback_position, 0.0);
        assert!(state.original_order_ids.is_empty());
    }

    #[test]
    fn up_next_excludes_current() {
        let state = QueueState {
            track_ids: vec!["a".into(), "b".into(), "c".into()],
            current_index: 1,
            ..Default::default()
        };
        assert_eq!(state.up_next(), &["c".to_string()]);
        assert_eq!(state.current(), Some("b"));
    }

    #[test]
    fn etag_forms() {
        assert_eq!(format_etag(12), "\"12\"");
        assert_eq!(parse_etag("\"12\""), Some(12));
        assert_eq!(parse_etag("W/\"3\""), Some(3));
        assert_eq!(parse_etag(" 5 "), Some(5));
        assert_eq!(parse_etag("\"abc\""), None);
        assert_eq!(parse_etag_list("\"1\", junk, \"4\""), vec![1, 4]);
    }
}
