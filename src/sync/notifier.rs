//! Cross-process cache invalidation.
//!
//! Every process keeps one [`ChangeBus`]. Stores that can see all writers
//! (SQLite, in-memory) publish straight onto it. With Postgres, writers raise
//! `pg_notify` inside the compare-and-swap statement and each process runs a
//! LISTEN loop ([`spawn_pg_listener`]) that forwards payloads onto its bus.
//!
//! Delivery is best effort. Cache TTL is the backstop, so a missed or late
//! event only delays convergence.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};

use crate::queue::Revision;

/// Payload carried on the notification channel: `{"did": ..., "revision": N}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub did: String,
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// One user's queue changed.
    Queue(ChangeEvent),
    /// Events may have been missed; drop everything.
    Resync,
}

/// In-process fan-out of invalidation events.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<Invalidation>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Invalidation) {
        // no subscribers is fine: nothing cached yet
        let _ = self.tx.send(event);
    }

    pub fn queue_changed(&self, did: &str, revision: Revision) {
        self.publish(Invalidation::Queue(ChangeEvent {
            did: did.to_string(),
            revision,
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ── Postgres LISTEN loop ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub channel: String,
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_max: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel: "queue_changes".to_string(),
            heartbeat: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ListenError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("connection lost")]
    ConnectionLost,

    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),
}

/// Run the LISTEN loop until the returned handle is aborted.
pub fn spawn_pg_listener(
    database_url: String,
    config: NotifierConfig,
    bus: ChangeBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = config.reconnect_delay;
        let mut connected_before = false;

        loop {
            match connect_listener(&database_url, &config.channel).await {
                Ok(mut listener) => {
                    log::info!("[notifier] listening on '{}'", config.channel);
                    if connected_before {
                        // anything sent while we were away is lost
                        bus.publish(Invalidation::Resync);
                    }
                    connected_before = true;
                    delay = config.reconnect_delay;

                    if let Err(e) = pump(&mut listener, &config, &bus).await {
                        log::warn!("[notifier] {e}, reconnecting in {delay:?}");
                    }
                }
                Err(e) => {
                    log::warn!("[notifier] connect failed: {e}, retrying in {delay:?}");
                }
            }

            sleep(delay).await;
            delay = next_backoff(delay, config.reconnect_max);
        }
    })
}

async fn connect_listener(url: &str, channel: &str) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect(url).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

/// Forward notifications until the connection dies or a heartbeat fails.
async fn pump(
    listener: &mut PgListener,
    config: &NotifierConfig,
    bus: &ChangeBus,
) -> Result<(), ListenError> {
    let mut heartbeat = interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        let beat = tokio::select! {
            received = listener.try_recv() => {
                match received? {
                    Some(notification) => handle_payload(notification.payload(), bus),
                    None => return Err(ListenError::ConnectionLost),
                }
                false
            }
            _ = heartbeat.tick() => true,
        };

        if beat {
            // zombie connections accept nothing and never error; bound the ping
            timeout(config.heartbeat, sqlx::query("SELECT 1").execute(&mut *listener))
                .await
                .map_err(|_| ListenError::HeartbeatTimeout(config.heartbeat))??;
        }
    }
}

fn handle_payload(payload: &str, bus: &ChangeBus) {
    match serde_json::from_str::<ChangeEvent>(payload) {
        Ok(event) => {
            log::debug!(
                "[notifier] queue change for {} (revision {})",
                event.did,
                event.revision
            );
            bus.publish(Invalidation::Queue(event));
        }
        Err(e) => log::error!("[notifier] bad payload {payload:?}: {e}"),
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
