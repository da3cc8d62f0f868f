//! Session-lifetime state store.
//!
//! Two disjoint mutable stores, each with exactly one writer:
//! - [`ResultCache`]: patched only through [`ResultCache::apply_task`] (the
//!   reconciler); authoritative re-fetches replace whole entries.
//! - [`IterationStore`]: written only through [`IterationStore::commit`],
//!   with iterations returned by the backend for a state-machine effect.
//!
//! The [`Store`] is passed explicitly by `&mut`; the controller owns it.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::push::events::TaskUpdate;
use crate::state::reconcile::reconcile;
use crate::types::{Iteration, IterationId, Project, ResultEntity, ResultRef, TaskHash};

/// Read access to cached results, used by the state machine.
pub trait ResultLookup {
    fn result(&self, key: ResultRef) -> Option<&ResultEntity>;
}

/// Cache of result entities, indexed by key and by producing-task hash.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    entries: HashMap<ResultRef, ResultEntity>,
    by_hash: HashMap<TaskHash, ResultRef>,
}

impl ResultLookup for ResultCache {
    fn result(&self, key: ResultRef) -> Option<&ResultEntity> {
        self.entries.get(&key)
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ResultRef) -> Option<&ResultEntity> {
        self.entries.get(&key)
    }

    /// Finds the cached entity produced by the task with `hash`.
    pub fn find_by_hash(&self, hash: &TaskHash) -> Option<&ResultEntity> {
        self.by_hash.get(hash).and_then(|key| self.entries.get(key))
    }

    pub fn contains_hash(&self, hash: &TaskHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a task update to the entity with the matching hash.
    ///
    /// Returns the key of the patched entity, or `None` when no cached entity
    /// has that hash.
    pub fn apply_task(&mut self, update: &TaskUpdate) -> Option<ResultRef> {
        let key = *self.by_hash.get(&update.hash)?;
        let updated = reconcile(self.entries.get(&key), Some(update))?;
        trace!(
            key = %key,
            state = %updated.state,
            progress = updated.progress,
            "Reconciled task update"
        );
        self.entries.insert(key, updated);
        Some(key)
    }

    /// Stores an entity fetched from the backend, replacing any cached copy.
    ///
    /// A fresh entity is authoritative, so `need_reload` is cleared.
    pub fn replace(&mut self, mut entity: ResultEntity) -> ResultRef {
        entity.need_reload = false;
        let key = entity.key();
        self.index(key, entity.hash().clone());
        self.entries.insert(key, entity);
        key
    }

    /// Inserts the placeholder for a newly submitted task.
    ///
    /// Rebinding a key to a new task (a retry) drops the old hash from the
    /// index: the last bind wins.
    pub fn insert_placeholder(&mut self, entity: ResultEntity) -> ResultRef {
        let key = entity.key();
        if self
            .entries
            .get(&key)
            .is_some_and(|existing| existing.hash() == entity.hash())
        {
            return key;
        }
        debug!(key = %key, hash = %entity.hash().short(), "Inserting result placeholder");
        self.index(key, entity.hash().clone());
        self.entries.insert(key, entity);
        key
    }

    /// Hashes of entities flagged for a full re-fetch.
    pub fn needing_reload(&self) -> Vec<TaskHash> {
        let mut hashes: Vec<TaskHash> = self
            .entries
            .values()
            .filter(|e| e.need_reload)
            .map(|e| e.hash().clone())
            .collect();
        hashes.sort();
        hashes
    }

    fn index(&mut self, key: ResultRef, hash: TaskHash) {
        self.by_hash.retain(|h, k| *k != key || *h == hash);
        self.by_hash.insert(hash, key);
    }
}

/// Iterations seen this session. The latest round is current.
#[derive(Debug, Default, Clone)]
pub struct IterationStore {
    iterations: BTreeMap<IterationId, Iteration>,
    current: Option<IterationId>,
}

impl IterationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current (latest-round) iteration.
    pub fn current(&self) -> Option<&Iteration> {
        self.current.and_then(|id| self.iterations.get(&id))
    }

    pub fn get(&self, id: IterationId) -> Option<&Iteration> {
        self.iterations.get(&id)
    }

    /// Records an iteration returned by the backend.
    ///
    /// The iteration becomes current unless an iteration of a later round is
    /// already current; superseded rounds are kept for lookup.
    pub fn commit(&mut self, iteration: Iteration) {
        let becomes_current = match self.current() {
            Some(current) => iteration.round >= current.round,
            None => true,
        };
        let id = iteration.id;
        debug!(
            iteration = %id,
            round = iteration.round,
            stage = %iteration.current_stage,
            becomes_current,
            "Committing iteration"
        );
        self.iterations.insert(id, iteration);
        if becomes_current {
            self.current = Some(id);
        }
    }

    /// Follows `prev_iteration` links from the current round back to round 1.
    ///
    /// Stops at the first iteration already visited, so a malformed link
    /// cannot loop.
    pub fn history(&self) -> Vec<&Iteration> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.current;
        while let Some(id) = next {
            if !seen.insert(id) {
                warn!(iteration = %id, "Iteration history links back on itself");
                break;
            }
            let Some(it) = self.iterations.get(&id) else {
                break;
            };
            out.push(it);
            next = (!it.prev_iteration.is_none()).then_some(it.prev_iteration);
        }
        out
    }
}

/// The session store passed to the listener and the state machine.
#[derive(Debug, Default, Clone)]
pub struct Store {
    pub project: Option<Project>,
    pub results: ResultCache,
    pub iterations: IterationStore,
}

impl Store {
    pub fn new(project: Project) -> Self {
        Store {
            project: Some(project),
            ..Default::default()
        }
    }
}
