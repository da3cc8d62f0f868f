//! Iteration state machine.
//!
//! Pure reducer from the current iteration, the cached results and one stage
//! event to the effects that carry the transition out. The reducer never
//! mutates anything: a rejected event leaves the iteration unchanged, and an
//! accepted one only takes hold once the backend returns the updated
//! iteration and the controller commits it.
//!
//! Transitions per round:
//! - `Update` binds a created task to the current stage (stage unchanged)
//! - `Next` advances once the stage's result is valid
//! - `Skip` advances without a result, for skippable stages
//! - `Retry` re-opens the stage's task creation once its result is terminal
//! - `Next` at the terminal stage creates the following round

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effects::{CreatedTask, Effect, TaskRequest};
use crate::store::ResultLookup;
use crate::types::{Iteration, NewIteration, ResultEntity, ResultRef, ResultState, Stage};

/// Event emitted by a stage's UI flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StageEvent {
    /// A task was created for the current stage; bind it.
    Update(CreatedTask),
    /// Advance to the next stage, or create the next round at the terminal stage.
    Next,
    /// Advance without a result.
    Skip,
    /// Re-enter the current stage's task creation.
    Retry,
}

impl StageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StageEvent::Update(_) => "update",
            StageEvent::Next => "next",
            StageEvent::Skip => "skip",
            StageEvent::Retry => "retry",
        }
    }
}

/// Why a stage event was rejected. The iteration is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The stage has no bound result yet.
    #[error("stage {} has no bound result", .stage.label())]
    NothingBound { stage: Stage },

    /// The bound result's task has not finished.
    #[error("result of stage {} is still pending", .stage.label())]
    ResultPending { stage: Stage },

    /// The bound result is invalid; only a retry is possible.
    #[error("result of stage {} is invalid; retry the stage", .stage.label())]
    ResultInvalid { stage: Stage },

    /// The stage cannot be skipped.
    #[error("stage {} cannot be skipped", .stage.label())]
    Unskippable { stage: Stage },

    /// The event does not apply to the terminal stage.
    #[error("{event} is not possible once the round is complete")]
    Terminal { event: &'static str },

    /// Retry while the bound task is still running.
    #[error("stage {} is still running; nothing to retry", .stage.label())]
    RetryWhilePending { stage: Stage },
}

/// Computes the effects for `event` applied to `iteration`.
pub fn reduce(
    iteration: &Iteration,
    results: &impl ResultLookup,
    event: StageEvent,
) -> Result<Vec<Effect>, TransitionError> {
    let stage = iteration.current_stage;

    match event {
        StageEvent::Update(task) => {
            if stage.is_terminal() {
                return Err(TransitionError::Terminal { event: "update" });
            }
            Ok(vec![Effect::BindStep {
                iteration: iteration.id,
                stage,
                task,
            }])
        }

        StageEvent::Next if stage.is_terminal() => {
            if iteration.model.is_none() {
                return Err(TransitionError::NothingBound { stage });
            }
            Ok(vec![Effect::CreateIteration(next_round(iteration))])
        }

        StageEvent::Next => {
            let result = bound_result(iteration, results)?;
            match result.state {
                ResultState::Valid => Ok(vec![Effect::NextStep {
                    iteration: iteration.id,
                    stage,
                }]),
                ResultState::Ready => Err(TransitionError::ResultPending { stage }),
                ResultState::Invalid => Err(TransitionError::ResultInvalid { stage }),
            }
        }

        StageEvent::Skip => {
            if stage.is_terminal() {
                return Err(TransitionError::Terminal { event: "skip" });
            }
            if !stage.descriptor().skippable {
                return Err(TransitionError::Unskippable { stage });
            }
            Ok(vec![Effect::SkipStep {
                iteration: iteration.id,
                stage,
            }])
        }

        StageEvent::Retry => {
            if stage.is_terminal() {
                return Err(TransitionError::Terminal { event: "retry" });
            }
            let result = bound_result(iteration, results)?;
            if !result.state.is_terminal() {
                return Err(TransitionError::RetryWhilePending { stage });
            }
            let Some(request) = task_request(iteration, stage) else {
                return Err(TransitionError::Terminal { event: "retry" });
            };
            Ok(vec![Effect::RequestTask {
                stage,
                url: stage.descriptor().task_url(iteration),
                request,
            }])
        }
    }
}

/// Returns the result bound to the current stage's output.
///
/// A bound result that is not cached yet counts as pending: its placeholder
/// has not been inserted, so its task cannot have been observed finishing.
fn bound_result<'a>(
    iteration: &Iteration,
    results: &'a impl ResultLookup,
) -> Result<&'a ResultEntity, TransitionError> {
    let stage = iteration.current_stage;
    let output = stage
        .descriptor()
        .output
        .ok_or(TransitionError::Terminal { event: "next" })?;
    let key = iteration
        .field(output)
        .ok_or(TransitionError::NothingBound { stage })?;
    results
        .result(key)
        .ok_or(TransitionError::ResultPending { stage })
}

/// Builds the request for the round after `iteration`.
///
/// The finished round's model and derived training set seed the new round.
pub fn next_round(iteration: &Iteration) -> NewIteration {
    NewIteration {
        project_id: iteration.project_id,
        round: iteration.round + 1,
        prev_iteration: iteration.id,
        test_set: iteration.test_set,
        mining_set: iteration.mining_set,
        train_set: iteration.derived_train_set(),
        seed_model: iteration.model,
    }
}

/// Builds the task request a stage submits. `None` at the terminal stage.
pub fn task_request(iteration: &Iteration, stage: Stage) -> Option<TaskRequest> {
    let descriptor = stage.descriptor();
    let kind = descriptor.task_kind?;
    let mut inputs: Vec<_> = descriptor.resolve_input(iteration).into_iter().collect();
    // Mining and training also start from the round's seed model.
    if matches!(stage, Stage::Mining | Stage::Training) {
        inputs.extend(iteration.seed_model.map(ResultRef::model));
    }
    Some(TaskRequest {
        kind,
        project_id: iteration.project_id,
        iteration_id: Some(iteration.id),
        stage: Some(stage),
        inputs,
        options: serde_json::Value::Null,
    })
}

/// Which stage actions the UI may offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AvailableActions {
    pub next: bool,
    pub skip: bool,
    pub retry: bool,
}

/// Computes the available actions by asking the reducer.
pub fn available_actions(iteration: &Iteration, results: &impl ResultLookup) -> AvailableActions {
    AvailableActions {
        next: reduce(iteration, results, StageEvent::Next).is_ok(),
        skip: reduce(iteration, results, StageEvent::Skip).is_ok(),
        retry: reduce(iteration, results, StageEvent::Retry).is_ok(),
    }
}
