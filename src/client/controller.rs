//! Client-side owner of one user's queue.
//!
//! Mutations apply to the local copy immediately and are pushed to the server
//! after a short quiet period. The server's answer replaces the local copy.
//! A rejected push (another writer got there first) drops the local edits and
//! refetches. Pulls never overwrite edits that have not been pushed yet, and a
//! snapshot is only applied if it is newer than the one already held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    debounce::Debouncer,
    tab_bus::{TabBus, TabMessage},
    transport::{FetchOutcome, HttpTransport, PushOutcome, QueueTransport, TransportError},
};
use crate::{
    config::ControllerConfig,
    queue::{AddPosition, HydratedSnapshot, PreviousAction, QueueState, Revision, Track},
};

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueView {
    pub state: QueueState,
    pub tracks: Vec<Track>,
    /// `None` until the first snapshot arrives.
    pub revision: Option<Revision>,
    /// Local edits not yet accepted by the server.
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Default)]
struct LocalQueue {
    state: QueueState,
    revision: Option<Revision>,
    tracks: HashMap<String, Track>,
    dirty: bool,
    edit_seq: u64,
    in_flight: bool,
}

impl LocalQueue {
    fn remember(&mut self, tracks: impl IntoIterator<Item = Track>) {
        for track in tracks {
            self.tracks.insert(track.file_id.clone(), track);
        }
    }

    fn is_newer(&self, revision: Revision) -> bool {
        self.revision.map_or(true, |held| revision > held)
    }

    fn apply(&mut self, snapshot: HydratedSnapshot) -> bool {
        if !self.is_newer(snapshot.revision) {
            return false;
        }
        self.state = snapshot.state;
        self.revision = Some(snapshot.revision);
        self.remember(snapshot.tracks);
        true
    }

    fn view(&self) -> QueueView {
        QueueView {
            state: self.state.clone(),
            tracks: self
                .state
                .track_ids
                .iter()
                .filter_map(|id| self.tracks.get(id).cloned())
                .collect(),
            revision: self.revision,
            pending: self.dirty,
        }
    }
}

struct Inner {
    transport: Arc<dyn QueueTransport>,
    config: ControllerConfig,
    tab_id: Uuid,
    tab_bus: Option<TabBus>,
    local: Mutex<LocalQueue>,
    // serialises pushes so revisions are sent in order
    push_lock: tokio::sync::Mutex<()>,
    debouncer: Debouncer,
    view: watch::Sender<QueueView>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn local(&self) -> MutexGuard<'_, LocalQueue> {
        self.local.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self) {
        let view = self.local().view();
        self.view.send_replace(view);
    }

    fn schedule_push(self: &Arc<Self>) {
        let inner = self.clone();
        self.debouncer
            .schedule(move || async move { inner.push_pending().await });
    }

    /// Push local state if it has unsent edits.
    async fn push_pending(self: &Arc<Self>) {
        let _guard = self.push_lock.lock().await;

        let (state, revision, seq) = {
            let mut local = self.local();
            if !local.dirty {
                return;
            }
            local.in_flight = true;
            (local.state.clone(), local.revision, local.edit_seq)
        };

        let result = self.transport.push(&state, revision).await;
        self.local().in_flight = false;

        match result {
            Ok(PushOutcome::Applied(snapshot)) => {
                let revision = snapshot.revision;
                let edited_meanwhile = {
                    let mut local = self.local();
                    if local.edit_seq == seq {
                        local.apply(snapshot);
                        local.dirty = false;
                        false
                    } else {
                        // keep the newer local edits, based on the new revision
                        local.revision = Some(revision);
                        local.remember(snapshot.tracks);
                        true
                    }
                };
                self.emit();
                if edited_meanwhile {
                    self.schedule_push();
                }
                log::debug!("[client] pushed revision {revision}");
                if let Some(bus) = &self.tab_bus {
                    bus.publish(TabMessage {
                        revision,
                        source_tab_id: self.tab_id,
                    });
                }
            }
            Ok(PushOutcome::Conflict) => {
                log::info!(
                    "[client] push based on revision {revision:?} was rejected, refetching"
                );
                self.local().dirty = false;
                if let Err(e) = self.force_refresh().await {
                    log::warn!("[client] refetch after conflict failed: {e}");
                }
                self.emit();
            }
            Err(e) => {
                log::warn!("[client] push failed, keeping local edits: {e}");
            }
        }
    }

    fn is_suppressed(&self) -> bool {
        if self.debouncer.is_pending() {
            return true;
        }
        let local = self.local();
        local.dirty || local.in_flight
    }

    /// Conditional pull. Skipped while local edits are waiting.
    async fn refresh(&self) -> Result<bool, TransportError> {
        if self.is_suppressed() {
            log::debug!("[client] refresh suppressed, local edits pending");
            return Ok(false);
        }
        let held = self.local().revision;
        match self.transport.fetch(held).await? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Snapshot(snapshot) => Ok(self.accept(snapshot)),
        }
    }

    /// Unconditional pull, ignoring the held revision.
    async fn force_refresh(&self) -> Result<bool, TransportError> {
        match self.transport.fetch(None).await? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Snapshot(snapshot) => Ok(self.accept(snapshot)),
        }
    }

    fn accept(&self, snapshot: HydratedSnapshot) -> bool {
        let applied = {
            let mut local = self.local();
            if local.dirty {
                // the pending push will settle it
                false
            } else {
                local.apply(snapshot)
            }
        };
        if applied {
            self.emit();
        }
        applied
    }

    async fn on_tab_message(&self, message: TabMessage) {
        if message.source_tab_id == self.tab_id {
            return;
        }
        if !self.local().is_newer(message.revision) {
            return;
        }
        log::debug!("[client] another tab wrote revision {}", message.revision);
        if let Err(e) = self.force_refresh().await {
            log::warn!("[client] refetch after tab update failed: {e}");
        }
    }

    async fn flush(self: &Arc<Self>) {
        self.debouncer.cancel();
        self.push_pending().await;
        // edits made while that push was in flight were rescheduled
        if self.debouncer.cancel() {
            self.push_pending().await;
        }
    }
}

/// Owner of one user's queue on the client. Cheap to clone.
#[derive(Clone)]
pub struct ClientQueueController {
    inner: Arc<Inner>,
}

impl ClientQueueController {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        config: ControllerConfig,
        tab_bus: Option<TabBus>,
    ) -> Self {
        let (view, _) = watch::channel(QueueView::default());
        let debouncer = Debouncer::new(config.debounce());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                tab_id: Uuid::new_v4(),
                tab_bus,
                local: Mutex::new(LocalQueue::default()),
                push_lock: tokio::sync::Mutex::new(()),
                debouncer,
                view,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Controller talking HTTP to `config.base_url` with a bearer token.
    pub fn connect(
        config: ControllerConfig,
        token: impl Into<String>,
        tab_bus: Option<TabBus>,
    ) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.base_url, token)?;
        Ok(Self::new(Arc::new(transport), config, tab_bus))
    }

    pub fn tab_id(&self) -> Uuid {
        self.inner.tab_id
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> QueueView {
        self.inner.local().view()
    }

    pub fn state(&self) -> QueueState {
        self.inner.local().state.clone()
    }

    pub fn revision(&self) -> Option<Revision> {
        self.inner.local().revision
    }

    pub fn is_pending(&self) -> bool {
        self.inner.local().dirty
    }

    /// Initial fetch, then follow other tabs.
    pub async fn start(&self) -> Result<(), TransportError> {
        if let Some(bus) = &self.inner.tab_bus {
            let mut messages = bus.subscribe();
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let handle = tokio::spawn(async move {
                loop {
                    let received = messages.recv().await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    match received {
                        Ok(message) => inner.on_tab_message(message).await,
                        Err(RecvError::Lagged(_)) => {
                            if let Err(e) = inner.force_refresh().await {
                                log::warn!("[client] refetch after missed tab updates failed: {e}");
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            let previous = self
                .inner
                .listener
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
        }

        self.inner.force_refresh().await?;
        Ok(())
    }

    /// Flush pending edits and stop following other tabs.
    pub async fn shutdown(&self) {
        self.inner.flush().await;
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }

    /// Pull the latest snapshot unless local edits are waiting. Returns
    /// whether anything was applied.
    pub async fn refresh(&self) -> Result<bool, TransportError> {
        self.inner.refresh().await
    }

    pub async fn force_refresh(&self) -> Result<bool, TransportError> {
        self.inner.force_refresh().await
    }

    /// Apply a snapshot if it is newer than what is held.
    pub fn apply_snapshot(&self, snapshot: HydratedSnapshot) -> bool {
        self.inner.accept(snapshot)
    }

    /// Push pending edits now instead of waiting out the debounce.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    pub async fn on_visibility_change(&self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => self.flush().await,
            Visibility::Visible => {
                if let Err(e) = self.refresh().await {
                    log::warn!("[client] refresh on focus failed: {e}");
                }
            }
        }
    }

    pub async fn on_page_unload(&self) {
        self.flush().await;
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    fn mutate<R>(&self, edit: impl FnOnce(&mut QueueState) -> R) -> R {
        let (result, changed) = {
            let mut local = self.inner.local();
            let before = local.state.clone();
            let result = edit(&mut local.state);
            let changed = local.state != before;
            if changed {
                local.dirty = true;
                local.edit_seq += 1;
            }
            (result, changed)
        };
        if changed {
            self.inner.emit();
            self.inner.schedule_push();
        }
        result
    }

    fn remember(&self, tracks: &[Track]) {
        self.inner.local().remember(tracks.iter().cloned());
    }

    pub fn add_tracks(&self, tracks: Vec<Track>, position: AddPosition) {
        self.remember(&tracks);
        let ids = tracks.into_iter().map(|t| t.file_id);
        self.mutate(|s| s.add_tracks(ids, position));
    }

    pub fn set_queue(&self, tracks: Vec<Track>, start_index: usize) {
        self.remember(&tracks);
        let ids = tracks.into_iter().map(|t| t.file_id).collect();
        self.mutate(|s| s.set_queue(ids, start_index));
    }

    pub fn play_now(&self, track: Track) {
        self.remember(std::slice::from_ref(&track));
        self.mutate(|s| s.play_now(track.file_id));
    }

    pub fn go_to(&self, index: usize) -> bool {
        self.mutate(|s| s.go_to(index))
    }

    pub fn next(&self) -> bool {
        self.mutate(QueueState::next)
    }

    pub fn previous(&self, position_secs: f64) -> PreviousAction {
        let threshold = self.inner.config.restart_threshold_secs;
        self.mutate(|s| s.previous_with_threshold(position_secs, threshold))
    }

    pub fn move_track(&self, from: usize, to: usize) -> bool {
        self.mutate(|s| s.move_track(from, to))
    }

    pub fn remove_track(&self, index: usize) -> Option<String> {
        self.mutate(|s| s.remove_track(index))
    }

    pub fn clear_up_next(&self) {
        self.mutate(QueueState::clear_up_next);
    }

    pub fn toggle_shuffle_once(&self) -> bool {
        let attempts = self.inner.config.shuffle_attempts;
        self.mutate(|s| s.shuffle_up_next(&mut rand::thread_rng(), attempts))
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.mutate(|s| s.auto_advance = enabled);
    }

    pub fn set_playback(&self, position_secs: f64, paused: bool) {
        self.mutate(|s| {
            s.playback_position = position_secs;
            s.is_paused = paused;
        });
    }
}
