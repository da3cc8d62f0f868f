//! Effects-as-data for backend collaborator calls.
//!
//! The state machine and preparation engine never call the backend. They
//! return [`Effect`] values that the controller interprets through the
//! collaborator traits in [`interpreter`]. This enables:
//! - Pure core logic that returns effects as data
//! - Testability via mock interpreters
//! - Logging/tracing of intended operations

use serde::{Deserialize, Serialize};

pub mod interpreter;

pub use interpreter::{IterationService, ProjectService, ResultService, TaskService};

use crate::types::{
    IterationId, NewIteration, ProjectId, ProjectUpdate, ResultRef, Stage, TaskHash, TaskId,
};

/// Kind of backend job. One per stage that produces an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Dataset fusion (filtering/sampling the mining pool).
    Fusion,
    /// Mining inference over the pool with the current model.
    Mining,
    /// Labelling of mined assets.
    Label,
    /// Merging labelled assets into the training set.
    Merge,
    /// Model training.
    Train,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Fusion => "fusion",
            TaskKind::Mining => "mining",
            TaskKind::Label => "label",
            TaskKind::Merge => "merge",
            TaskKind::Train => "train",
        }
    }
}

/// Parameters for creating a backend task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<IterationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Results the task consumes, in the order the task expects them.
    pub inputs: Vec<ResultRef>,
    /// Form-supplied options passed through untouched (model config, labellers, ...).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl TaskRequest {
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Uniform return shape of task creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub id: TaskId,
    pub hash: TaskHash,
}

/// A backend call (or UI request) produced by the pure core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect_type", rename_all = "snake_case")]
pub enum Effect {
    /// Attach a created task to the iteration's current stage.
    BindStep {
        iteration: IterationId,
        stage: Stage,
        task: CreatedTask,
    },

    /// Advance the iteration past `stage`.
    NextStep { iteration: IterationId, stage: Stage },

    /// Advance the iteration past `stage` without a valid result.
    SkipStep { iteration: IterationId, stage: Stage },

    /// Create an iteration (round 1, or the round after a finished one).
    CreateIteration(NewIteration),

    /// Persist project fields.
    UpdateProject(ProjectUpdate),

    /// Ask the UI to (re-)open a stage's task-creation flow.
    RequestTask {
        stage: Stage,
        url: Option<String>,
        request: TaskRequest,
    },
}

impl Effect {
    /// Returns the effect name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::BindStep { .. } => "bind_step",
            Effect::NextStep { .. } => "next_step",
            Effect::SkipStep { .. } => "skip_step",
            Effect::CreateIteration(_) => "create_iteration",
            Effect::UpdateProject(_) => "update_project",
            Effect::RequestTask { .. } => "request_task",
        }
    }
}
