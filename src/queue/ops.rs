//! Pure queue transformations.
//!
//! Every mutation leaves `current_index` in range (or `0` when empty) and
//! re-derives `current_track_id` from it. The client controller applies these
//! optimistically; the server only uses [`QueueState::repair_index`].

use rand::seq::SliceRandom;
use rand::Rng;

use super::model::QueueState;

/// `previous()` restarts the current track instead of stepping back once
/// playback is past this many seconds.
pub const RESTART_THRESHOLD_SECS: f64 = 3.0;

/// Re-shuffle attempts when a shuffle reproduces the original up-next order.
pub const MAX_SHUFFLE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPosition {
    /// Append to the end of the queue.
    End,
    /// Insert directly after the current track.
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousAction {
    Restarted,
    SteppedBack,
}

impl QueueState {
    /// Bring `current_index` back in range for the current `track_ids`.
    ///
    /// An out-of-range index is re-anchored on `current_track_id` (first
    /// occurrence), falling back to `0`. Returns `true` if the index moved.
    pub fn repair_index(&mut self) -> bool {
        let before = self.current_index;
        if self.track_ids.is_empty() {
            self.current_index = 0;
        } else if self.current_index >= self.track_ids.len() {
            self.current_index = self
                .current_track_id
                .as_ref()
                .and_then(|id| self.track_ids.iter().position(|t| t == id))
                .unwrap_or(0);
        }
        self.sync_current_track_id();
        self.current_index != before
    }

    pub fn add_tracks<I>(&mut self, ids: I, position: AddPosition)
    where
        I: IntoIterator<Item = String>,
    {
        let ids: Vec<String> = ids.into_iter().collect();
        if ids.is_empty() {
            return;
        }
        let was_empty = self.track_ids.is_empty();
        match position {
            AddPosition::End => self.track_ids.extend(ids.iter().cloned()),
            AddPosition::Next => {
                let at = if was_empty { 0 } else { self.current_index.saturating_add(1) };
                self.track_ids.splice(at..at, ids.iter().cloned());
            }
        }
        if self.shuffle {
            self.original_order_ids.extend(ids);
        }
        if was_empty {
            self.current_index = 0;
        }
        self.after_edit();
    }

    /// Replace the whole queue and start at `start_index` (clamped).
    pub fn set_queue(&mut self, ids: Vec<String>, start_index: usize) {
        self.current_index = start_index.min(ids.len().saturating_sub(1));
        self.original_order_ids = ids.clone();
        self.track_ids = ids;
        self.shuffle = false;
        self.playback_position = 0.0;
        self.after_edit();
    }

    /// Insert `id` after the current track and make it current.
    pub fn play_now(&mut self, id: String) {
        if self.track_ids.is_empty() {
            self.track_ids.push(id.clone());
            self.current_index = 0;
        } else {
            let at = self.current_index.saturating_add(1);
            self.track_ids.insert(at, id.clone());
            self.current_index = at;
        }
        if self.shuffle {
            self.original_order_ids.push(id);
        }
        self.playback_position = 0.0;
        self.after_edit();
    }

    pub fn go_to(&mut self, index: usize) -> bool {
        if index >= self.track_ids.len() {
            return false;
        }
        self.current_index = index;
        self.playback_position = 0.0;
        self.after_edit();
        true
    }

    pub fn next(&mut self) -> bool {
        if self.current_index.saturating_add(1) >= self.track_ids.len() {
            return false;
        }
        self.current_index += 1;
        self.playback_position = 0.0;
        self.after_edit();
        true
    }

    /// Step back one entry, or restart the current one when playback is past
    /// [`RESTART_THRESHOLD_SECS`] or there is nothing before it.
    pub fn previous(&mut self, position_secs: f64) -> PreviousAction {
        self.previous_with_threshold(position_secs, RESTART_THRESHOLD_SECS)
    }

    pub fn previous_with_threshold(&mut self, position_secs: f64, threshold: f64) -> PreviousAction {
        self.playback_position = 0.0;
        if position_secs > threshold || self.current_index == 0 {
            return PreviousAction::Restarted;
        }
        self.current_index -= 1;
        self.after_edit();
        PreviousAction::SteppedBack
    }

    /// Move the entry at `from` to `to`. The current entry stays current.
    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        let len = self.track_ids.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let id = self.track_ids.remove(from);
        self.track_ids.insert(to, id);

        let cur = self.current_index;
        self.current_index = if from == cur {
            to
        } else if from < cur && to >= cur {
            cur - 1
        } else if from > cur && to <= cur {
            cur + 1
        } else {
            cur
        };
        self.after_edit();
        true
    }

    /// Remove the entry at `index`. Removing the current entry leaves the
    /// following one current (or the new last entry).
    pub fn remove_track(&mut self, index: usize) -> Option<String> {
        if index >= self.track_ids.len() {
            return None;
        }
        let removed = self.track_ids.remove(index);
        if index < self.current_index {
            self.current_index -= 1;
        } else if index == self.current_index {
            self.playback_position = 0.0;
        }
        if self.shuffle {
            if let Some(pos) = self.original_order_ids.iter().position(|t| *t == removed) {
                self.original_order_ids.remove(pos);
            }
        }
        self.after_edit();
        Some(removed)
    }

    /// Drop everything after the current entry.
    pub fn clear_up_next(&mut self) {
        if self.track_ids.is_empty() {
            return;
        }
        let keep = self.current_index.saturating_add(1);
        let dropped: Vec<String> = self.track_ids.drain(keep..).collect();
        if self.shuffle {
            for id in dropped {
                if let Some(pos) = self.original_order_ids.iter().position(|t| *t == id) {
                    self.original_order_ids.remove(pos);
                }
            }
        }
        self.after_edit();
    }

    /// Shuffle the up-next entries in place. Entries at or before the current
    /// index are untouched. Retries up to `attempts` times while the result
    /// equals the pre-shuffle order. Returns `false` when there is nothing to
    /// shuffle.
    pub fn shuffle_up_next<R: Rng + ?Sized>(&mut self, rng: &mut R, attempts: usize) -> bool {
        if self.track_ids.is_empty() {
            return false;
        }
        let start = self.current_index.saturating_add(1);
        if self.track_ids.len().saturating_sub(start) < 2 {
            return false;
        }
        if !self.shuffle {
            self.original_order_ids = self.track_ids.clone();
        }

        let before = self.track_ids[start..].to_vec();
        for _ in 0..attempts.max(1) {
            self.track_ids[start..].shuffle(rng);
            if self.track_ids[start..] != before[..] {
                break;
            }
        }
        self.shuffle = true;
        self.after_edit();
        true
    }

    fn after_edit(&mut self) {
        if !self.shuffle {
            self.original_order_ids = self.track_ids.clone();
        }
        if self.track_ids.is_empty() {
            self.current_index = 0;
        } else if self.current_index >= self.track_ids.len() {
            self.current_index = self.track_ids.len() - 1;
        }
        self.sync_current_track_id();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn queue(ids: &[&str], current: usize) -> QueueState {
        let mut state = QueueState::default();
        state.set_queue(ids.iter().map(|s| s.to_string()).collect(), current);
        state
    }

    fn ids(state: &QueueState) -> Vec<&str> {
        state.track_ids.iter().map(String::as_str).collect()
    }

    #[test]
    fn next_twice_then_previous_steps_back_once() {
        let mut q = queue(&["A", "B", "C"], 0);
        assert!(q.next());
        assert!(q.next());
        assert_eq!(q.current_index, 2);
        assert!(!q.next());
        assert_eq!(q.previous(0.0), PreviousAction::SteppedBack);
        assert_eq!(q.current_index, 1);
        assert_eq!(q.current_track_id.as_deref(), Some("B"));
    }

    #[test]
    fn previous_past_threshold_restarts() {
        let mut q = queue(&["A", "B"], 1);
        q.playback_position = 42.0;
        assert_eq!(q.previous(RESTART_THRESHOLD_SECS + 0.5), PreviousAction::Restarted);
        assert_eq!(q.current_index, 1);
        assert_eq!(q.playback_position, 0.0);
        assert_eq!(q.previous(1.0), PreviousAction::SteppedBack);
        assert_eq!(q.previous(1.0), PreviousAction::Restarted);
        assert_eq!(q.current_index, 0);
    }

    #[test]
    fn shuffle_leaves_played_and_current_in_place() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut q = queue(&["A", "B", "C", "D"], 1);
            assert!(q.shuffle_up_next(&mut rng, MAX_SHUFFLE_ATTEMPTS));
            assert_eq!(&q.track_ids[..2], &["A".to_string(), "B".to_string()]);
            let mut rest = q.track_ids[2..].to_vec();
            rest.sort();
            assert_eq!(rest, vec!["C", "D"]);
            assert_eq!(q.original_order_ids, vec!["A", "B", "C", "D"]);
            assert!(q.shuffle);
        }
    }

    #[test]
    fn shuffle_retries_until_order_changes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut changed = 0;
        for _ in 0..50 {
            let mut q = queue(&["A", "B", "C"], 0);
            q.shuffle_up_next(&mut rng, MAX_SHUFFLE_ATTEMPTS);
            if ids(&q) == ["A", "C", "B"] {
                changed += 1;
            }
        }
        // two up-next entries: a visible shuffle can only be the swap
        assert!(changed >= 40, "only {changed} of 50 shuffles were visible");
    }

    #[test]
    fn shuffle_needs_two_up_next_entries() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut q = queue(&["A", "B"], 0);
        assert!(!q.shuffle_up_next(&mut rng, MAX_SHUFFLE_ATTEMPTS));
        assert!(!q.shuffle);
    }

    #[test]
    fn repeated_shuffle_keeps_first_original_order() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut q = queue(&["A", "B", "C", "D", "E"], 0);
        q.shuffle_up_next(&mut rng, MAX_SHUFFLE_ATTEMPTS);
        q.shuffle_up_next(&mut rng, MAX_SHUFFLE_ATTEMPTS);
        assert_eq!(q.original_order_ids, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn repair_out_of_range_index_uses_current_track_id() {
        let mut q = QueueState {
            track_ids: vec!["A".into(), "B".into(), "C".into()],
            current_index: 7,
            current_track_id: Some("B".into()),
            ..Default::default()
        };
        assert!(q.repair_index());
        assert_eq!(q.current_index, 1);

        q.current_index = 9;
        q.current_track_id = Some("Z".into());
        assert!(q.repair_index());
        assert_eq!(q.current_index, 0);
        assert_eq!(q.current_track_id.as_deref(), Some("A"));
    }

    #[test]
    fn repair_empty_queue_resets_to_zero() {
        let mut q = QueueState {
            current_index: 3,
            current_track_id: Some("A".into()),
            ..Default::default()
        };
        q.repair_index();
        assert_eq!(q.current_index, 0);
        assert_eq!(q.current_track_id, None);
    }

    #[test]
    fn add_next_inserts_after_current_and_keeps_duplicates() {
        let mut q = queue(&["A", "B", "C"], 0);
        q.add_tracks(vec!["A".to_string()], AddPosition::Next);
        assert_eq!(ids(&q), ["A", "A", "B", "C"]);
        assert_eq!(q.current_index, 0);

        q.add_tracks(vec!["Z".to_string()], AddPosition::End);
        assert_eq!(ids(&q), ["A", "A", "B", "C", "Z"]);
    }

    #[test]
    fn add_to_empty_queue_makes_first_current() {
        let mut q = QueueState::default();
        q.add_tracks(vec!["X".to_string(), "Y".to_string()], AddPosition::Next);
        assert_eq!(q.current_index, 0);
        assert_eq!(q.current_track_id.as_deref(), Some("X"));
    }

    #[test]
    fn play_now_jumps_to_inserted_track() {
        let mut q = queue(&["A", "B"], 0);
        q.play_now("N".into());
        assert_eq!(ids(&q), ["A", "N", "B"]);
        assert_eq!(q.current_index, 1);
        assert_eq!(q.current_track_id.as_deref(), Some("N"));
    }

    #[test]
    fn move_track_follows_current_entry() {
        let mut q = queue(&["A", "B", "C", "D"], 1);
        assert!(q.move_track(1, 3));
        assert_eq!(ids(&q), ["A", "C", "D", "B"]);
        assert_eq!(q.current_index, 3);

        let mut q = queue(&["A", "B", "C", "D"], 2);
        assert!(q.move_track(0, 3));
        assert_eq!(q.current_track_id.as_deref(), Some("C"));
        assert_eq!(q.current_index, 1);

        let mut q = queue(&["A", "B", "C", "D"], 1);
        assert!(q.move_track(3, 0));
        assert_eq!(q.current_track_id.as_deref(), Some("B"));
        assert_eq!(q.current_index, 2);

        assert!(!q.move_track(0, 9));
    }

    #[test]
    fn remove_adjusts_index() {
        let mut q = queue(&["A", "B", "C"], 2);
        assert_eq!(q.remove_track(0).as_deref(), Some("A"));
        assert_eq!(q.current_index, 1);
        assert_eq!(q.current_track_id.as_deref(), Some("C"));

        assert_eq!(q.remove_track(1).as_deref(), Some("C"));
        assert_eq!(q.current_index, 0);
        assert_eq!(q.current_track_id.as_deref(), Some("B"));

        assert_eq!(q.remove_track(0).as_deref(), Some("B"));
        assert!(q.is_empty());
        assert_eq!(q.current_track_id, None);
        assert_eq!(q.remove_track(0), None);
    }

    #[test]
    fn clear_up_next_keeps_history_and_current() {
        let mut q = queue(&["A", "B", "C", "D"], 1);
        q.clear_up_next();
        assert_eq!(ids(&q), ["A", "B"]);
        assert_eq!(q.current_index, 1);
    }
}
