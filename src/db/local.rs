//! SQLite backend: queue rows, a local track catalog and user preferences in
//! one file. Suited to single-process deployments, where the store itself can
//! publish change events on the process bus.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    QueryBuilder, Row, Sqlite,
};

use super::store::{ExpectedRevision, QueueStore, StoreError, UpsertOutcome};
use crate::{
    catalog::{Preferences, TrackCatalog},
    queue::{QueueState, StoredQueue, Track},
    sync::notifier::ChangeBus,
};

/// Open (or create) the SQLite database at `url` and run migrations.
/// Accepts a bare path or a `sqlite:` URL.
pub async fn init_db(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = if url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite:{url}?mode=rwc")
    };
    let pool = SqlitePool::connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Private in-memory database. One connection, so every query sees the same
/// database.
pub async fn init_memory_db() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_state (
            did         TEXT    PRIMARY KEY,
            state_json  TEXT    NOT NULL,
            revision    INTEGER NOT NULL DEFAULT 1,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS ix_queue_state_updated_at ON queue_state (updated_at);

        -- Track catalog (read-only from the queue's point of view)
        CREATE TABLE IF NOT EXISTS tracks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id     TEXT    NOT NULL UNIQUE,
            title       TEXT    NOT NULL,
            artist      TEXT    NOT NULL DEFAULT '',
            album       TEXT,
            duration    INTEGER,
            image_url   TEXT
        );

        CREATE TABLE IF NOT EXISTS user_preferences (
            did          TEXT    PRIMARY KEY,
            auto_advance INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ── queue_state ──────────────────────────────────────────────────────────────

pub struct SqliteQueueStore {
    pool: SqlitePool,
    events: ChangeBus,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool, events: ChangeBus) -> Self {
        Self { pool, events }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn get(&self, did: &str) -> Result<Option<StoredQueue>, StoreError> {
        let row = sqlx::query("SELECT state_json, revision, updated_at FROM queue_state WHERE did = ?")
            .bind(did)
            .fetch_optional(&self.pool)
            .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        let state: QueueState = serde_json::from_str(r.get::<&str, _>("state_json"))?;
        Ok(Some(StoredQueue {
            state,
            revision: r.get("revision"),
            updated_at: millis_to_utc(r.get("updated_at")),
        }))
    }

    async fn upsert(
        &self,
        did: &str,
        state: &QueueState,
        expected: ExpectedRevision,
    ) -> Result<UpsertOutcome, StoreError> {
        let state_json = serde_json::to_string(state)?;
        let now_ms = Utc::now().timestamp_millis();
        let expected_rev = expected.as_option();

        // Same compare-and-swap as `PgQueueStore::upsert`; keep them in step.
        // A candidate row is produced when the caller expects no row or the
        // row already exists, so a missing row is only created for `Any` or
        // the initial revision. The update fires only on a revision match.
        // No returned row means conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO queue_state (did, state_json, revision, updated_at)
            SELECT ?1, ?2, 1, ?3
            WHERE ?4 IS NULL OR ?4 = 0
               OR EXISTS (SELECT 1 FROM queue_state WHERE did = ?1)
            ON CONFLICT(did) DO UPDATE SET
                state_json = excluded.state_json,
                revision   = queue_state.revision + 1,
                updated_at = excluded.updated_at
            WHERE ?4 IS NULL OR queue_state.revision = ?4
            RETURNING revision, updated_at
            "#,
        )
        .bind(did)
        .bind(&state_json)
        .bind(now_ms)
        .bind(expected_rev)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let revision: i64 = r.get("revision");
                self.events.queue_changed(did, revision);
                Ok(UpsertOutcome::Committed {
                    revision,
                    updated_at: millis_to_utc(r.get("updated_at")),
                })
            }
            None => {
                log::warn!("[queue] update conflict for {did}: expected {expected:?}");
                Ok(UpsertOutcome::Conflict)
            }
        }
    }
}

// ── tracks ───────────────────────────────────────────────────────────────────

pub struct SqliteTrackCatalog {
    pool: SqlitePool,
}

impl SqliteTrackCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a catalog entry, keyed by `file_id`.
    pub async fn upsert_track(&self, track: &Track) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracks (file_id, title, artist, album, duration, image_url)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                title     = excluded.title,
                artist    = excluded.artist,
                album     = excluded.album,
                duration  = excluded.duration,
                image_url = excluded.image_url
            RETURNING id
            "#,
        )
        .bind(&track.file_id)
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.album)
        .bind(track.duration)
        .bind(&track.image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    pub async fn delete_track(&self, file_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tracks WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TrackCatalog for SqliteTrackCatalog {
    async fn tracks_by_file_id(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, Track>, StoreError> {
        if file_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, file_id, title, artist, album, duration, image_url FROM tracks WHERE file_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in file_ids {
            sep.push_bind(id);
        }
        sep.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|r| {
                let track = Track {
                    id: r.get("id"),
                    file_id: r.get("file_id"),
                    title: r.get("title"),
                    artist: r.get("artist"),
                    album: r.get("album"),
                    duration: r.get("duration"),
                    image_url: r.get("image_url"),
                };
                (track.file_id.clone(), track)
            })
            .collect())
    }
}

// ── user_preferences ─────────────────────────────────────────────────────────

pub struct SqlitePreferences {
    pool: SqlitePool,
}

impl SqlitePreferences {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set_auto_advance(&self, did: &str, auto_advance: bool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (did, auto_advance) VALUES (?, ?)
            ON CONFLICT(did) DO UPDATE SET auto_advance = excluded.auto_advance
            "#,
        )
        .bind(did)
        .bind(auto_advance as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Preferences for SqlitePreferences {
    async fn auto_advance(&self, did: &str) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query("SELECT auto_advance FROM user_preferences WHERE did = ?")
            .bind(did)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("auto_advance") != 0))
    }
}
