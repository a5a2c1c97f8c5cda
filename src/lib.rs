pub mod api;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod service;
pub mod state;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;

use auth::JwtAuthenticator;
use catalog::{MemoryCatalog, MemoryPreferences, Preferences, TrackCatalog};
use config::{Backend, ServerConfig};
use db::{
    local::{SqlitePreferences, SqliteQueueStore, SqliteTrackCatalog},
    memory::MemoryQueueStore,
    postgres::{PgPreferences, PgQueueStore, PgTrackCatalog},
    store::QueueStore,
};
use service::QueueService;
use state::AppState;
use sync::{
    cache::{spawn_invalidation_task, QueueCache},
    notifier::{spawn_pg_listener, ChangeBus},
};

type Backends = (Arc<dyn QueueStore>, Arc<dyn TrackCatalog>, Arc<dyn Preferences>);

/// Run the queue API until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    // ── Storage ──────────────────────────────────────────────────────────────
    //
    // SQLite and in-memory stores see every write in this process and publish
    // on the bus themselves. Postgres writers may live elsewhere, so changes
    // arrive through LISTEN instead.

    let bus = ChangeBus::default();
    let mut pg_listener = None;

    let (store, catalog, preferences): Backends = match &config.backend {
        Backend::Sqlite(url) => {
            let pool = db::local::init_db(url)
                .await
                .with_context(|| format!("failed to open SQLite database {url}"))?;
            log::info!("[startup] using SQLite at {url}");
            (
                Arc::new(SqliteQueueStore::new(pool.clone(), bus.clone())),
                Arc::new(SqliteTrackCatalog::new(pool.clone())),
                Arc::new(SqlitePreferences::new(pool)),
            )
        }
        Backend::Postgres(url) => {
            let pool = db::postgres::connect(url, config.max_connections)
                .await
                .context("failed to connect to Postgres")?;
            log::info!("[startup] using Postgres, notify channel '{}'", config.notifier.channel);
            pg_listener = Some(spawn_pg_listener(
                url.clone(),
                config.notifier.clone(),
                bus.clone(),
            ));
            (
                Arc::new(PgQueueStore::new(pool.clone(), config.notifier.channel.clone())),
                Arc::new(PgTrackCatalog::new(pool.clone())),
                Arc::new(PgPreferences::new(pool)),
            )
        }
        Backend::Memory => {
            log::warn!("[startup] using in-memory store, queues will not survive a restart");
            (
                Arc::new(MemoryQueueStore::new(bus.clone())),
                Arc::new(MemoryCatalog::new()),
                Arc::new(MemoryPreferences::new()),
            )
        }
    };

    // ── Service ──────────────────────────────────────────────────────────────

    let cache = Arc::new(QueueCache::new(config.cache_capacity, config.cache_ttl));
    let invalidations = spawn_invalidation_task(cache.clone(), bus.subscribe());
    let service = Arc::new(QueueService::new(store, catalog, preferences, cache));
    let state = AppState::new(
        service.clone(),
        Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
    );

    // ── HTTP ─────────────────────────────────────────────────────────────────

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("[startup] listening on {addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // ── Teardown ─────────────────────────────────────────────────────────────

    if let Some(task) = pg_listener {
        task.abort();
    }
    invalidations.abort();
    service.shutdown();
    log::info!("[startup] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[startup] failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("[startup] shutdown requested");
}
