//! Process-local queue store. The mutex critical section is the atomic
//! compare-and-swap. Used for ephemeral servers and in-process embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::store::{ExpectedRevision, QueueStore, StoreError, UpsertOutcome};
use crate::{
    queue::{QueueState, StoredQueue, INITIAL_REVISION},
    sync::notifier::ChangeBus,
};

pub struct MemoryQueueStore {
    rows: Mutex<HashMap<String, StoredQueue>>,
    events: ChangeBus,
}

impl MemoryQueueStore {
    pub fn new(events: ChangeBus) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            events,
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn get(&self, did: &str) -> Result<Option<StoredQueue>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        Ok(rows.get(did).cloned())
    }

    async fn upsert(
        &self,
        did: &str,
        state: &QueueState,
        expected: ExpectedRevision,
    ) -> Result<UpsertOutcome, StoreError> {
        let (revision, updated_at) = {
            let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
            let current = rows.get(did).map(|r| r.revision);
            let accepted = match current {
                Some(stored) => expected.matches(stored),
                None => expected.allows_insert(),
            };
            if !accepted {
                log::warn!(
                    "[queue] update conflict for {did}: expected {expected:?}, stored {current:?}"
                );
                return Ok(UpsertOutcome::Conflict);
            }

            let revision = current.unwrap_or(INITIAL_REVISION) + 1;
            let updated_at = Utc::now();
            rows.insert(
                did.to_string(),
                StoredQueue {
                    state: state.clone(),
                    revision,
                    updated_at,
                },
            );
            (revision, updated_at)
        };

        self.events.queue_changed(did, revision);
        Ok(UpsertOutcome::Committed {
            revision,
            updated_at,
        })
    }
}
