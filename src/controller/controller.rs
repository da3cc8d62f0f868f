//! The loop controller: owns the session store and drives effects.
//!
//! The controller is the only place where pure decisions meet the backend.
//! Push payloads go through the parser and listener into the result cache;
//! stage events go through the reducer, and the resulting effects are
//! executed against the collaborator traits. Iterations returned by the
//! backend are committed to the iteration store.
//!
//! # Event Loop
//!
//! [`LoopController::run`] handles:
//! - Incoming messages via the message channel
//! - Periodic pruning of finished push entries
//! - Graceful shutdown via cancellation token

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoopConfig;
use crate::effects::{
    CreatedTask, Effect, IterationService, ProjectService, ResultService, TaskService,
};
use crate::push::{ListenOutcome, ParseError, PushListener, parse_push_message};
use crate::state::{
    PreparationError, StageEvent, StartPlan, TransitionError, bound_outputs, plan_start, reduce,
    task_request,
};
use crate::store::Store;
use crate::types::{
    DatasetId, GroupId, Iteration, NewIteration, Project, ProjectId, ProjectSlots, ProjectUpdate,
    ResultEntity, ResultRef, ResultState, TaskHash,
};

use super::message::{LoopMessage, LoopNotice};

/// Errors that can occur while handling a controller message.
#[derive(Debug, Error)]
pub enum LoopError {
    /// A stage action was rejected by the state machine.
    #[error(transparent)]
    Rejected(#[from] TransitionError),

    /// Round 1 cannot start with the given slots.
    #[error(transparent)]
    Preparation(#[from] PreparationError),

    /// A push payload failed validation and was dropped.
    #[error("push payload rejected: {0}")]
    Parse(#[from] ParseError),

    /// A collaborator call failed.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("no project loaded")]
    NoProject,

    #[error("no current iteration")]
    NoIteration,

    /// A round-zero merge is still running.
    #[error("round start already in progress (merge task {0})")]
    StartInProgress(TaskHash),
}

fn backend_error(e: impl fmt::Display) -> LoopError {
    LoopError::Backend(e.to_string())
}

/// A round 1 waiting on its round-zero merge.
#[derive(Debug, Clone)]
struct PendingStart {
    merge: TaskHash,
    then: NewIteration,
}

/// Creates the controller's message channel with the configured capacity.
pub fn loop_channel(config: &LoopConfig) -> (mpsc::Sender<LoopMessage>, mpsc::Receiver<LoopMessage>) {
    mpsc::channel(config.channel_capacity)
}

/// Session controller for one project.
///
/// # Type Parameters
///
/// * `S` - The backend, implementing every collaborator trait
pub struct LoopController<S> {
    backend: S,
    store: Store,
    listener: PushListener,
    config: LoopConfig,
    pending_start: Option<PendingStart>,
    notices: Option<mpsc::UnboundedSender<LoopNotice>>,
}

impl<S> LoopController<S> {
    pub fn new(backend: S, project: Project, config: LoopConfig) -> Self {
        LoopController {
            backend,
            store: Store::new(project),
            listener: PushListener::new(),
            config,
            pending_start: None,
            notices: None,
        }
    }

    /// Sends notices to `tx` from now on.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<LoopNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn listener(&self) -> &PushListener {
        &self.listener
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn current_iteration(&self) -> Option<&Iteration> {
        self.store.iterations.current()
    }

    /// True while round 1 waits for its round-zero merge.
    pub fn start_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    fn notify(&self, notice: LoopNotice) {
        if let Some(tx) = &self.notices {
            // The UI may have gone away; the loop keeps running.
            let _ = tx.send(notice);
        }
    }
}

impl<S> LoopController<S>
where
    S: TaskService + ResultService + IterationService + ProjectService,
    <S as TaskService>::Error: fmt::Display,
    <S as ResultService>::Error: fmt::Display,
    <S as IterationService>::Error: fmt::Display,
    <S as ProjectService>::Error: fmt::Display,
{
    /// Loads the project's current iteration, if it has one, together with
    /// the results bound to its stage outputs.
    #[instrument(skip(self))]
    pub async fn resume(&mut self) -> Result<Option<&Iteration>, LoopError> {
        let current = self
            .store
            .project
            .as_ref()
            .ok_or(LoopError::NoProject)?
            .current_iteration
            .filter(|id| !id.is_none());

        if let Some(id) = current {
            let iteration = self.backend.get_iteration(id).await.map_err(backend_error)?;
            info!(iteration = %id, round = iteration.round, "Resumed iteration");
            self.store.iterations.commit(iteration);
            self.load_bound_results().await?;
        }
        Ok(self.store.iterations.current())
    }

    // ─── Push channel ──────────────────────────────────────────────────────────

    /// Handles one raw push payload.
    ///
    /// Malformed payloads are rejected without touching the cache. With
    /// auto-reload on, results queued for re-fetch are fetched before return.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn handle_push(&mut self, payload: &[u8]) -> Result<Vec<ListenOutcome>, LoopError> {
        let message = parse_push_message(payload)?;
        let updates = message.into_updates();
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self
            .listener
            .handle_all(&mut self.store.results, updates);

        for outcome in &outcomes {
            if let ListenOutcome::Applied {
                key,
                became_terminal,
            } = outcome
            {
                self.notify(LoopNotice::ResultUpdated {
                    key: *key,
                    became_terminal: *became_terminal,
                });
            }
        }

        if self.config.auto_reload {
            self.reload_pending().await?;
        } else {
            self.advance_pending_start().await?;
        }
        Ok(outcomes)
    }

    /// Re-fetches every result queued by the listener or flagged `need_reload`.
    ///
    /// On a backend error, hashes not yet fetched stay queued for the next call.
    pub async fn reload_pending(&mut self) -> Result<usize, LoopError> {
        let mut hashes = self.listener.take_reloads();
        hashes.extend(self.store.results.needing_reload());
        hashes.sort();
        hashes.dedup();

        let reloaded = self.refresh_all(hashes).await?;
        self.advance_pending_start().await?;
        Ok(reloaded)
    }

    /// Re-fetches every active task after the push channel reconnects, and
    /// any bound result of the current iteration that is still uncached.
    #[instrument(skip(self))]
    pub async fn resubscribe(&mut self) -> Result<usize, LoopError> {
        let hashes = self.listener.on_resubscribe();
        let mut reloaded = self.refresh_all(hashes).await?;
        reloaded += self.load_bound_results().await?;
        self.advance_pending_start().await?;
        Ok(reloaded)
    }

    /// Refreshes `hashes` in order. The failing hash and everything after it
    /// are queued again before the error is returned.
    async fn refresh_all(&mut self, hashes: Vec<TaskHash>) -> Result<usize, LoopError> {
        let mut reloaded = 0;
        let mut queue = hashes.into_iter();
        while let Some(hash) = queue.next() {
            match self.refresh(&hash).await {
                Ok(true) => reloaded += 1,
                Ok(false) => {}
                Err(e) => {
                    self.listener.queue_reload(hash);
                    for rest in queue.by_ref() {
                        self.listener.queue_reload(rest);
                    }
                    return Err(e);
                }
            }
        }
        Ok(reloaded)
    }

    /// Fetches each bound stage output of the current iteration that is not
    /// cached yet, and tracks its producing task.
    ///
    /// Outputs of tasks this session never submitted (a resumed round, a
    /// round-zero slot) are only reachable by key.
    async fn load_bound_results(&mut self) -> Result<usize, LoopError> {
        let missing: Vec<ResultRef> = match self.store.iterations.current() {
            Some(iteration) => bound_outputs(iteration)
                .into_iter()
                .filter(|key| self.store.results.get(*key).is_none())
                .collect(),
            None => return Ok(0),
        };

        let mut loaded = 0;
        for key in missing {
            let Some(entity) = self
                .backend
                .fetch_result(key)
                .await
                .map_err(backend_error)?
            else {
                debug!(key = %key, "No result for bound output");
                continue;
            };
            self.store_fetched(entity);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Fetches the authoritative result for `hash` and replaces the cached copy.
    ///
    /// Returns false if the backend has no result for the hash yet.
    async fn refresh(&mut self, hash: &TaskHash) -> Result<bool, LoopError> {
        let Some(entity) = self
            .backend
            .fetch_by_hash(hash)
            .await
            .map_err(backend_error)?
        else {
            debug!(hash = %hash.short(), "No result for hash yet");
            return Ok(false);
        };
        self.store_fetched(entity);
        Ok(true)
    }

    /// Replaces the cached copy with a fetched entity and re-baselines the
    /// listener on it.
    fn store_fetched(&mut self, entity: ResultEntity) {
        debug!(
            hash = %entity.hash().short(),
            key = %entity.key(),
            state = %entity.state,
            "Replacing cached result"
        );
        self.listener.acknowledge_reload(&entity);
        let became_terminal = entity.state.is_terminal();
        let key = self.store.results.replace(entity);
        self.notify(LoopNotice::ResultUpdated {
            key,
            became_terminal,
        });
    }

    // ─── Stage actions ─────────────────────────────────────────────────────────

    /// Applies a stage event to the current iteration.
    ///
    /// A rejected event returns `LoopError::Rejected` and changes nothing.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn dispatch(&mut self, event: StageEvent) -> Result<(), LoopError> {
        let effects = {
            let iteration = self
                .store
                .iterations
                .current()
                .ok_or(LoopError::NoIteration)?;
            reduce(iteration, &self.store.results, event)?
        };
        for effect in effects {
            self.execute(effect).await?;
        }
        Ok(())
    }

    /// Creates the current stage's task with `options` and binds it.
    #[instrument(skip(self, options))]
    pub async fn submit_task(&mut self, options: serde_json::Value) -> Result<CreatedTask, LoopError> {
        let request = {
            let iteration = self
                .store
                .iterations
                .current()
                .ok_or(LoopError::NoIteration)?;
            task_request(iteration, iteration.current_stage)
                .ok_or(TransitionError::Terminal { event: "update" })?
                .with_options(options)
        };
        let created = self
            .backend
            .create_task(request)
            .await
            .map_err(backend_error)?;
        info!(task = %created.id, hash = %created.hash.short(), "Created stage task");
        self.dispatch(StageEvent::Update(created.clone())).await?;
        Ok(created)
    }

    /// Executes one effect and commits whatever the backend returns.
    async fn execute(&mut self, effect: Effect) -> Result<(), LoopError> {
        debug!(effect = effect.name(), "Executing effect");
        match effect {
            Effect::BindStep {
                iteration,
                stage,
                task,
            } => {
                let updated = self
                    .backend
                    .bind_step(iteration, stage, task.id)
                    .await
                    .map_err(backend_error)?;
                let output = stage.descriptor().output.and_then(|f| updated.field(f));
                match output {
                    // The bind response carries no group; the first re-fetch
                    // replaces the placeholder with the real one.
                    Some(key) => {
                        self.store.results.insert_placeholder(ResultEntity::placeholder(
                            key,
                            GroupId::default(),
                            updated.project_id,
                            task.id,
                            task.hash.clone(),
                        ));
                    }
                    None => warn!(stage = %stage, "Bound task but stage output is unset"),
                }
                self.listener.track(task.hash);
                self.commit(updated);
            }
            Effect::NextStep { iteration, stage } => {
                let updated = self
                    .backend
                    .next_step(iteration, stage)
                    .await
                    .map_err(backend_error)?;
                self.commit(updated);
            }
            Effect::SkipStep { iteration, stage } => {
                let updated = self
                    .backend
                    .skip_step(iteration, stage)
                    .await
                    .map_err(backend_error)?;
                self.commit(updated);
            }
            Effect::CreateIteration(new) => {
                let created = self
                    .backend
                    .create_iteration(new)
                    .await
                    .map_err(backend_error)?;
                info!(iteration = %created.id, round = created.round, "Started round");
                let (id, round) = (created.id, created.round);
                self.store.iterations.commit(created);
                self.notify(LoopNotice::RoundStarted {
                    iteration: id,
                    round,
                });
                let project_id = self.project_id()?;
                self.update_project(ProjectUpdate {
                    id: project_id,
                    current_iteration: Some(id),
                    ..Default::default()
                })
                .await?;
                // The round exists either way; a later resubscribe retries.
                if let Err(e) = self.load_bound_results().await {
                    warn!(error = %e, "Could not load bound results of new round");
                }
            }
            Effect::UpdateProject(update) => {
                self.update_project(update).await?;
            }
            Effect::RequestTask {
                stage,
                url,
                request,
            } => {
                self.notify(LoopNotice::TaskRequested {
                    stage,
                    url,
                    request,
                });
            }
        }
        Ok(())
    }

    fn commit(&mut self, iteration: Iteration) {
        let (id, stage) = (iteration.id, iteration.current_stage);
        self.store.iterations.commit(iteration);
        self.notify(LoopNotice::StepChanged {
            iteration: id,
            stage,
        });
    }

    async fn update_project(&mut self, update: ProjectUpdate) -> Result<(), LoopError> {
        let project = self
            .backend
            .update_project(update)
            .await
            .map_err(backend_error)?;
        self.store.project = Some(project);
        Ok(())
    }

    fn project_id(&self) -> Result<ProjectId, LoopError> {
        self.store
            .project
            .as_ref()
            .map(|p| p.id)
            .ok_or(LoopError::NoProject)
    }

    // ─── Round zero ────────────────────────────────────────────────────────────

    /// Persists the round-zero slots and starts round 1.
    ///
    /// With a candidate train set bound, a merge task runs first and round 1 is
    /// created once its result turns valid.
    #[instrument(skip(self, slots))]
    pub async fn start_round(&mut self, slots: ProjectSlots) -> Result<(), LoopError> {
        if let Some(pending) = &self.pending_start {
            return Err(LoopError::StartInProgress(pending.merge.clone()));
        }
        let project = self.store.project.clone().ok_or(LoopError::NoProject)?;
        let plan = plan_start(&project, &slots)?;

        self.execute(Effect::UpdateProject(ProjectUpdate::slots(project.id, &slots)))
            .await?;

        match plan {
            StartPlan::CreateRound(round) => self.execute(Effect::CreateIteration(round)).await,
            StartPlan::MergeThenCreate { merge, then } => {
                let created = self
                    .backend
                    .create_task(merge)
                    .await
                    .map_err(backend_error)?;
                info!(hash = %created.hash.short(), "Merging candidate train set before round 1");
                self.listener.track(created.hash.clone());
                self.pending_start = Some(PendingStart {
                    merge: created.hash.clone(),
                    then,
                });
                self.refresh(&created.hash).await?;
                self.advance_pending_start().await
            }
        }
    }

    /// Creates round 1 once the round-zero merge result is terminal.
    async fn advance_pending_start(&mut self) -> Result<(), LoopError> {
        let Some(pending) = &self.pending_start else {
            return Ok(());
        };
        let Some((state, id)) = self
            .store
            .results
            .find_by_hash(&pending.merge)
            .map(|e| (e.state, e.id))
        else {
            return Ok(());
        };

        match state {
            ResultState::Ready => Ok(()),
            ResultState::Invalid => {
                let hash = pending.merge.clone();
                warn!(hash = %hash.short(), "Round-zero merge failed; start abandoned");
                self.pending_start = None;
                self.notify(LoopNotice::StartAbandoned { hash });
                Ok(())
            }
            ResultState::Valid => {
                let Some(pending) = self.pending_start.take() else {
                    return Ok(());
                };
                let merged = DatasetId(id);
                let project_id = self.project_id()?;
                self.execute(Effect::UpdateProject(ProjectUpdate {
                    id: project_id,
                    train_set: Some(merged),
                    ..Default::default()
                }))
                .await?;
                let then = NewIteration {
                    train_set: Some(merged),
                    ..pending.then
                };
                self.execute(Effect::CreateIteration(then)).await
            }
        }
    }

    // ─── Event loop ────────────────────────────────────────────────────────────

    /// Drops finished push entries older than the configured TTL.
    pub fn prune_active(&mut self) -> usize {
        let pruned = self.listener.prune_finished(self.config.active_ttl_hours);
        if pruned > 0 {
            debug!(pruned, "Pruned finished push entries");
        }
        pruned
    }

    /// Handles one message. Errors are reported as notices by [`run`](Self::run).
    pub async fn handle_message(&mut self, msg: LoopMessage) -> Result<(), LoopError> {
        match msg {
            LoopMessage::Push(payload) => {
                self.handle_push(&payload).await?;
            }
            LoopMessage::Stage(event) => {
                self.dispatch(event).await?;
            }
            LoopMessage::SubmitTask { options } => {
                self.submit_task(options).await?;
            }
            LoopMessage::StartRound(slots) => {
                self.start_round(slots).await?;
            }
            LoopMessage::Resubscribe => {
                self.resubscribe().await?;
            }
            LoopMessage::PruneActive => {
                self.prune_active();
            }
            LoopMessage::Shutdown => {}
        }
        Ok(())
    }

    /// Runs the controller's event loop until shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<LoopMessage>, shutdown: CancellationToken) {
        info!("Loop controller started");
        let period = self.config.prune_interval;
        let mut prune = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping controller");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(LoopMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        Some(msg) => {
                            if let Err(e) = self.handle_message(msg).await {
                                self.report(e);
                            }
                        }
                        None => {
                            info!("Message channel closed");
                            break;
                        }
                    }
                }

                _ = prune.tick() => {
                    self.prune_active();
                }
            }
        }

        info!("Loop controller stopped");
    }

    fn report(&self, e: LoopError) {
        match e {
            LoopError::Rejected(rejection) => {
                warn!(error = %rejection, "Stage action rejected");
                self.notify(LoopNotice::Rejected(rejection));
            }
            LoopError::Parse(e) => {
                warn!(error = %e, "Dropping malformed push payload");
                self.notify(LoopNotice::Failed(e.to_string()));
            }
            e => {
                error!(error = %e, "Error handling message");
                self.notify(LoopNotice::Failed(e.to_string()));
            }
        }
    }
}
