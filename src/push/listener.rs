//! Push channel listener.
//!
//! Matches inbound task updates to cached results by hash and applies the
//! reconciler, enforcing per-hash monotonicity. Updates for hashes that are
//! not cached (or that ask for it) are queued for a full re-fetch instead.
//!
//! # Ordering
//!
//! No ordering is assumed across hashes. For one hash, progress as seen by the
//! client never regresses: an update is stale if its percent is lower than the
//! last applied one, or equal without moving the task state forward. Once a
//! hash is terminal, nothing further is applied for it; a new job has a new hash.
//!
//! # Reconnects
//!
//! The channel is not assumed ordered, durable or at-least-once across
//! reconnects. [`PushListener::on_resubscribe`] returns every active hash so
//! the controller can re-fetch current state instead of replaying.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::store::ResultCache;
use crate::types::{ResultEntity, ResultRef, TaskHash, TaskState};

use super::events::TaskUpdate;

/// Default retention for finished entries in the active map (24 hours).
pub const DEFAULT_ACTIVE_TTL_HOURS: i64 = 24;

/// Last applied progress for one hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub percent: u8,
    pub state: TaskState,
    pub last_seen: DateTime<Utc>,
}

impl ActiveTask {
    fn new(percent: u8, state: TaskState) -> Self {
        ActiveTask {
            percent,
            state,
            last_seen: Utc::now(),
        }
    }

    /// Returns true if `update` would move this task forward.
    fn accepts(&self, update: &TaskUpdate) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if update.state.is_terminal() {
            return true;
        }
        update.percent > self.percent
            || (update.percent == self.percent && update.state.rank() > self.state.rank())
    }
}

/// What the listener did with one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// The cached entity was reconciled.
    Applied {
        key: ResultRef,
        /// The update moved the task into a terminal state.
        became_terminal: bool,
    },

    /// The update was a duplicate or arrived out of order; dropped.
    Stale,

    /// The hash was queued for a full re-fetch.
    ReloadQueued,
}

/// Session-scoped listener state for one authenticated user's channel.
#[derive(Debug, Default, Clone)]
pub struct PushListener {
    active: HashMap<TaskHash, ActiveTask>,
    pending_reload: BTreeSet<TaskHash>,
}

impl PushListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one task update against the result cache.
    pub fn handle(&mut self, cache: &mut ResultCache, update: TaskUpdate) -> ListenOutcome {
        if update.reload || !cache.contains_hash(&update.hash) {
            debug!(
                hash = %update.hash.short(),
                reload = update.reload,
                "Queueing result re-fetch"
            );
            if let Some(active) = self.active.get_mut(&update.hash) {
                active.last_seen = Utc::now();
            }
            self.pending_reload.insert(update.hash);
            return ListenOutcome::ReloadQueued;
        }

        let baseline = match self.active.get(&update.hash) {
            Some(active) => active.clone(),
            None => match cache.find_by_hash(&update.hash) {
                Some(entity) => ActiveTask::new(entity.task.percent, entity.task.state),
                None => ActiveTask::new(0, TaskState::Pending),
            },
        };

        if !baseline.accepts(&update) {
            trace!(
                hash = %update.hash.short(),
                percent = update.percent,
                applied = baseline.percent,
                "Dropping stale task update"
            );
            return ListenOutcome::Stale;
        }

        // A terminal update may carry a lower percent than already shown.
        let update = TaskUpdate {
            percent: update.percent.max(baseline.percent),
            ..update
        };

        let Some(key) = cache.apply_task(&update) else {
            self.pending_reload.insert(update.hash);
            return ListenOutcome::ReloadQueued;
        };

        let became_terminal = update.is_terminal();
        self.active
            .insert(update.hash, ActiveTask::new(update.percent, update.state));

        ListenOutcome::Applied {
            key,
            became_terminal,
        }
    }

    /// Handles a batch of updates, returning each outcome in order.
    pub fn handle_all(
        &mut self,
        cache: &mut ResultCache,
        updates: impl IntoIterator<Item = TaskUpdate>,
    ) -> Vec<ListenOutcome> {
        updates
            .into_iter()
            .map(|update| self.handle(cache, update))
            .collect()
    }

    /// Starts tracking a freshly submitted task.
    pub fn track(&mut self, hash: TaskHash) {
        self.active
            .entry(hash)
            .or_insert_with(|| ActiveTask::new(0, TaskState::Pending));
    }

    /// Drains the hashes queued for re-fetch.
    pub fn take_reloads(&mut self) -> Vec<TaskHash> {
        std::mem::take(&mut self.pending_reload).into_iter().collect()
    }

    /// Queues `hash` for re-fetch, e.g. after a fetch for it failed.
    pub fn queue_reload(&mut self, hash: TaskHash) {
        self.pending_reload.insert(hash);
    }

    /// Re-baselines a hash from an authoritative entity after a re-fetch.
    ///
    /// Subsequent updates are compared against the fetched progress.
    pub fn acknowledge_reload(&mut self, entity: &ResultEntity) {
        self.pending_reload.remove(entity.hash());
        self.active.insert(
            entity.hash().clone(),
            ActiveTask::new(entity.task.percent, entity.task.state),
        );
    }

    /// Hashes to re-fetch after the channel reconnects: every non-terminal
    /// active hash plus everything already queued.
    pub fn on_resubscribe(&mut self) -> Vec<TaskHash> {
        let mut hashes: BTreeSet<TaskHash> = self
            .active
            .iter()
            .filter(|(_, task)| !task.state.is_terminal())
            .map(|(hash, _)| hash.clone())
            .collect();
        hashes.extend(std::mem::take(&mut self.pending_reload));
        debug!(count = hashes.len(), "Resubscribed; re-fetching active tasks");
        hashes.into_iter().collect()
    }

    pub fn active(&self, hash: &TaskHash) -> Option<&ActiveTask> {
        self.active.get(hash)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drops terminal entries not seen for longer than `ttl_hours`.
    ///
    /// Returns the number of entries pruned.
    pub fn prune_finished(&mut self, ttl_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(ttl_hours);
        let before_len = self.active.len();
        self.active
            .retain(|_, task| !task.state.is_terminal() || task.last_seen > cutoff);
        before_len - self.active.len()
    }
}
