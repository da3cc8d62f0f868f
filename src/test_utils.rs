//! Shared test fixtures, arbitrary generators and an in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;

use proptest::prelude::*;

use crate::effects::{
    CreatedTask, IterationService, ProjectService, ResultService, TaskKind, TaskRequest,
    TaskService,
};
use crate::push::TaskUpdate;
use crate::types::{
    DatasetId, GroupId, Iteration, IterationField, IterationId, ModelId, NewIteration, Project,
    ProjectId, ProjectUpdate, ResultEntity, ResultKind, ResultRef, ResultState, Stage, TaskHash,
    TaskId, TaskState, task_state_to_result_state,
};

/// Placeholder for dataset 100 produced by the task with `hash`.
pub fn placeholder(hash: &str) -> ResultEntity {
    ResultEntity::placeholder(
        ResultRef::dataset(100u64),
        GroupId(100),
        ProjectId(1),
        TaskId(1),
        TaskHash::new(hash),
    )
}

/// A finished, valid entity stored under `key`.
pub fn valid_entity(key: ResultRef, hash: &str) -> ResultEntity {
    let mut entity =
        ResultEntity::placeholder(key, GroupId(key.id), ProjectId(1), TaskId(1), TaskHash::new(hash));
    entity.state = ResultState::Valid;
    entity.task_state = TaskState::Finish;
    entity.progress = 100;
    entity.task.state = TaskState::Finish;
    entity.task.percent = 100;
    entity
}

/// Round `round` of project 1 sitting at `stage`, with the round-zero slots bound.
pub fn iteration_at(id: u64, round: u32, stage: Stage) -> Iteration {
    Iteration {
        id: IterationId(id),
        project_id: ProjectId(1),
        round,
        current_stage: stage,
        test_set: Some(DatasetId(10)),
        mining_set: Some(DatasetId(11)),
        mining_result: None,
        label_set: None,
        train_update_set: None,
        model: None,
        seed_model: Some(ModelId(3)),
        train_set: Some(DatasetId(12)),
        prev_iteration: IterationId(id.saturating_sub(1)),
    }
}

/// Project 1 with keyword "cat" and an existing train set 12.
pub fn project() -> Project {
    Project {
        id: ProjectId(1),
        name: "cats".into(),
        keywords: vec!["cat".into()],
        train_set: Some(DatasetId(12)),
        test_set: None,
        mining_set: None,
        model: None,
        candidate_train_set: None,
        testing_sets: Vec::new(),
        current_iteration: None,
    }
}

pub fn arb_task_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Pending),
        Just(TaskState::Doing),
        Just(TaskState::Finish),
        Just(TaskState::Failure),
        Just(TaskState::Terminated),
    ]
}

/// Arbitrary update for `hash`, with a result state consistent with its task state.
pub fn arb_task_update(hash: &'static str) -> impl Strategy<Value = TaskUpdate> {
    (0u8..=100, arb_task_state(), prop::bool::weighted(0.1)).prop_map(
        move |(percent, state, reload)| TaskUpdate {
            hash: TaskHash::new(hash),
            result_state: task_state_to_result_state(state),
            percent,
            state,
            reload,
        },
    )
}

// ─── In-memory backend ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BackendState {
    project: Option<Project>,
    iterations: BTreeMap<IterationId, Iteration>,
    /// Result produced by each task, keyed by hash.
    results: HashMap<TaskHash, ResultEntity>,
    tasks: HashMap<TaskId, TaskHash>,
    requests: Vec<TaskRequest>,
    next_id: u64,
    fail_next: Option<String>,
}

impl BackendState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_failure(&mut self) -> Result<(), String> {
        match self.fail_next.take() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn advance(&mut self, id: IterationId, stage: Stage) -> Result<Iteration, String> {
        let iteration = self
            .iterations
            .get_mut(&id)
            .ok_or_else(|| format!("no iteration {id}"))?;
        if iteration.current_stage != stage {
            return Err(format!(
                "iteration {id} is at {}, not {stage}",
                iteration.current_stage
            ));
        }
        iteration.current_stage = stage.next().ok_or("already terminal")?;
        Ok(iteration.clone())
    }
}

/// In-memory job service implementing every collaborator trait.
///
/// Task creation allocates the result the task will produce; binding a task
/// writes that result's id into the stage's output field.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new(project: Project) -> Self {
        MockBackend {
            state: Mutex::new(BackendState {
                project: Some(project),
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    /// Makes the next backend call fail with `message`.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    /// Marks the task's result as finished with the given result state.
    pub fn finish(&self, hash: &TaskHash, state: ResultState) {
        let mut backend = self.state.lock().unwrap();
        let entity = backend.results.get_mut(hash).unwrap();
        entity.state = state;
        entity.task_state = match state {
            ResultState::Valid => TaskState::Finish,
            ResultState::Invalid => TaskState::Failure,
            ResultState::Ready => TaskState::Doing,
        };
        entity.task.state = entity.task_state;
        entity.progress = 100;
        entity.task.percent = 100;
        entity.keywords = vec!["cat".into()];
    }

    /// Key of the result produced by the task with `hash`.
    pub fn result_key(&self, hash: &TaskHash) -> ResultRef {
        self.state.lock().unwrap().results[hash].key()
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn iteration(&self, id: IterationId) -> Option<Iteration> {
        self.state.lock().unwrap().iterations.get(&id).cloned()
    }

    pub fn project(&self) -> Option<Project> {
        self.state.lock().unwrap().project.clone()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut BackendState) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut backend = self.state.lock().unwrap();
        backend.take_failure()?;
        f(&mut backend)
    }

    /// Stores a result as if another session's task had produced it.
    pub fn seed_result(&self, entity: ResultEntity) {
        let mut backend = self.state.lock().unwrap();
        backend.tasks.insert(entity.task.id, entity.hash().clone());
        backend.results.insert(entity.hash().clone(), entity);
    }

    /// Stores an iteration as if another session had created it.
    pub fn seed_iteration(&self, iteration: Iteration) {
        let mut backend = self.state.lock().unwrap();
        backend.next_id = backend.next_id.max(iteration.id.0);
        backend.iterations.insert(iteration.id, iteration);
    }
}

impl TaskService for MockBackend {
    type Error = String;

    fn create_task(
        &self,
        request: TaskRequest,
    ) -> impl Future<Output = Result<CreatedTask, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            let n = backend.allocate();
            let hash = TaskHash::new(format!("task-{n}"));
            let kind = match request.kind {
                TaskKind::Train => ResultKind::Model,
                _ => ResultKind::Dataset,
            };
            let result_id = backend.allocate();
            let key = ResultRef { kind, id: result_id };
            let entity = ResultEntity::placeholder(
                key,
                GroupId(result_id),
                request.project_id,
                TaskId(n),
                hash.clone(),
            );
            backend.results.insert(hash.clone(), entity);
            backend.tasks.insert(TaskId(n), hash.clone());
            backend.requests.push(request);
            Ok(CreatedTask {
                id: TaskId(n),
                hash,
            })
        });
        async move { result }
    }
}

impl ResultService for MockBackend {
    type Error = String;

    fn fetch_by_hash(
        &self,
        hash: &TaskHash,
    ) -> impl Future<Output = Result<Option<ResultEntity>, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            Ok(backend.results.get(hash).cloned())
        });
        async move { result }
    }

    fn fetch_result(
        &self,
        key: ResultRef,
    ) -> impl Future<Output = Result<Option<ResultEntity>, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            Ok(backend.results.values().find(|e| e.key() == key).cloned())
        });
        async move { result }
    }
}

impl IterationService for MockBackend {
    type Error = String;

    fn get_iteration(
        &self,
        id: IterationId,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            backend
                .iterations
                .get(&id)
                .cloned()
                .ok_or_else(|| format!("no iteration {id}"))
        });
        async move { result }
    }

    fn create_iteration(
        &self,
        iteration: NewIteration,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            let id = IterationId(backend.allocate());
            let created = Iteration {
                id,
                project_id: iteration.project_id,
                round: iteration.round,
                current_stage: Stage::PrepareMining,
                test_set: iteration.test_set,
                mining_set: iteration.mining_set,
                mining_result: None,
                label_set: None,
                train_update_set: None,
                model: None,
                seed_model: iteration.seed_model,
                train_set: iteration.train_set,
                prev_iteration: iteration.prev_iteration,
            };
            backend.iterations.insert(id, created.clone());
            if let Some(project) = backend.project.as_mut() {
                project.current_iteration = Some(id);
            }
            Ok(created)
        });
        async move { result }
    }

    fn bind_step(
        &self,
        id: IterationId,
        stage: Stage,
        task: TaskId,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            let hash = backend
                .tasks
                .get(&task)
                .cloned()
                .ok_or_else(|| format!("no task {task}"))?;
            let produced = backend.results[&hash].id;
            let output = stage.descriptor().output.ok_or("terminal stage")?;
            let iteration = backend
                .iterations
                .get_mut(&id)
                .ok_or_else(|| format!("no iteration {id}"))?;
            match output {
                IterationField::Model => iteration.model = Some(ModelId(produced)),
                IterationField::MiningSet => iteration.mining_set = Some(DatasetId(produced)),
                IterationField::MiningResult => {
                    iteration.mining_result = Some(DatasetId(produced))
                }
                IterationField::LabelSet => iteration.label_set = Some(DatasetId(produced)),
                IterationField::TrainUpdateSet => {
                    iteration.train_update_set = Some(DatasetId(produced))
                }
                IterationField::TestSet | IterationField::TrainSet => {
                    return Err(format!("{} is not a stage output", output.name()));
                }
            }
            Ok(iteration.clone())
        });
        async move { result }
    }

    fn next_step(
        &self,
        id: IterationId,
        stage: Stage,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            backend.advance(id, stage)
        });
        async move { result }
    }

    fn skip_step(
        &self,
        id: IterationId,
        stage: Stage,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            backend.advance(id, stage)
        });
        async move { result }
    }
}

impl ProjectService for MockBackend {
    type Error = String;

    fn update_project(
        &self,
        update: ProjectUpdate,
    ) -> impl Future<Output = Result<Project, Self::Error>> + Send {
        let result = self.with_state(|backend| {
            let project = backend.project.as_mut().ok_or("no project")?;
            if project.id != update.id {
                return Err(format!("no project {}", update.id));
            }
            if update.train_set.is_some() {
                project.train_set = update.train_set;
            }
            if update.candidate_train_set.is_some() {
                project.candidate_train_set = update.candidate_train_set;
            }
            if update.test_set.is_some() {
                project.test_set = update.test_set;
            }
            if update.mining_set.is_some() {
                project.mining_set = update.mining_set;
            }
            if update.model.is_some() {
                project.model = update.model;
            }
            if update.current_iteration.is_some() {
                project.current_iteration = update.current_iteration;
            }
            Ok(project.clone())
        });
        async move { result }
    }
}
