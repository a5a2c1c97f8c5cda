use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::queue::{QueueState, Revision, StoredQueue, INITIAL_REVISION};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// What the caller believes the stored revision to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedRevision {
    /// Accept whatever is stored (no `If-Match`). Still a single atomic
    /// increment.
    Any,
    /// Succeed only if the stored revision equals this value.
    /// [`INITIAL_REVISION`] matches an absent row.
    Exactly(Revision),
}

impl ExpectedRevision {
    pub fn as_option(self) -> Option<Revision> {
        match self {
            ExpectedRevision::Any => None,
            ExpectedRevision::Exactly(rev) => Some(rev),
        }
    }

    /// Whether this expectation may create a missing row.
    pub fn allows_insert(self) -> bool {
        matches!(
            self,
            ExpectedRevision::Any | ExpectedRevision::Exactly(INITIAL_REVISION)
        )
    }

    pub fn matches(self, stored: Revision) -> bool {
        match self {
            ExpectedRevision::Any => true,
            ExpectedRevision::Exactly(rev) => rev == stored,
        }
    }
}

impl From<Option<Revision>> for ExpectedRevision {
    fn from(value: Option<Revision>) -> Self {
        value.map_or(ExpectedRevision::Any, ExpectedRevision::Exactly)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Committed {
        revision: Revision,
        updated_at: DateTime<Utc>,
    },
    /// Stored revision did not match; nothing was written.
    Conflict,
}

/// Durable per-user queue rows.
///
/// `upsert` is the only write path and must be a single atomic
/// compare-and-swap: on success the row holds `state`, its revision is the
/// previous one plus one, and a change notification has been raised.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get(&self, did: &str) -> Result<Option<StoredQueue>, StoreError>;

    async fn upsert(
        &self,
        did: &str,
        state: &QueueState,
        expected: ExpectedRevision,
    ) -> Result<UpsertOutcome, StoreError>;
}
