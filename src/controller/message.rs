//! Controller message types for async communication.
//!
//! The controller receives [`LoopMessage`]s through a `tokio::sync::mpsc`
//! channel and processes them serially, so the result cache and iteration
//! store each see exactly one writer. It reports what happened through
//! [`LoopNotice`]s.

use serde_json::Value;

use crate::effects::TaskRequest;
use crate::state::{StageEvent, TransitionError};
use crate::types::{IterationId, ProjectSlots, ResultRef, Stage, TaskHash};

/// Messages that can be sent to a loop controller.
#[derive(Debug)]
pub enum LoopMessage {
    /// A raw payload from the push channel.
    Push(Vec<u8>),

    /// A stage action from the UI.
    Stage(StageEvent),

    /// Create the current stage's task with form-supplied options and bind it.
    SubmitTask { options: Value },

    /// Persist the round-zero slots and start round 1.
    StartRound(ProjectSlots),

    /// The push channel reconnected; re-fetch every active task.
    Resubscribe,

    /// Drop finished push entries older than the configured TTL.
    PruneActive,

    /// Stop the event loop.
    Shutdown,
}

/// What the controller reports back to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopNotice {
    /// A cached result changed.
    ResultUpdated {
        key: ResultRef,
        became_terminal: bool,
    },

    /// The current iteration was committed at `stage`.
    StepChanged { iteration: IterationId, stage: Stage },

    /// The UI should open the task-creation flow for `stage`.
    TaskRequested {
        stage: Stage,
        url: Option<String>,
        request: TaskRequest,
    },

    /// A new round was created and is now current.
    RoundStarted { iteration: IterationId, round: u32 },

    /// The round-zero merge finished invalid; round 1 was not created.
    StartAbandoned { hash: TaskHash },

    /// A stage action was rejected; the iteration is unchanged.
    Rejected(TransitionError),

    /// Any other failure while handling a message.
    Failed(String),
}
