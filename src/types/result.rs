//! Result entities and the two state sets that describe them.
//!
//! A result entity is a cached dataset or model version produced by a backend
//! task. Its validity (`ResultState`) is derived from, but deliberately kept
//! distinct from, the state of the task producing it (`TaskState`): an
//! externally terminated job still yields a usable partial result.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{GroupId, ProjectId, TaskHash, TaskId};

/// Validity of a result entity.
///
/// Serialized as the backend's integer code (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResultState {
    /// The producing task has not reached a terminal state yet.
    #[default]
    Ready,
    /// The result is complete and usable.
    Valid,
    /// The producing task failed; the result must not be consumed.
    Invalid,
}

impl ResultState {
    /// Returns true for `Valid` and `Invalid`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultState::Ready)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultState::Ready => "ready",
            ResultState::Valid => "valid",
            ResultState::Invalid => "invalid",
        }
    }
}

impl From<ResultState> for u8 {
    fn from(state: ResultState) -> u8 {
        match state {
            ResultState::Ready => 0,
            ResultState::Valid => 1,
            ResultState::Invalid => 2,
        }
    }
}

impl TryFrom<u8> for ResultState {
    type Error = UnknownStateCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ResultState::Ready),
            1 => Ok(ResultState::Valid),
            2 => Ok(ResultState::Invalid),
            other => Err(UnknownStateCode {
                set: "result_state",
                code: other,
            }),
        }
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of the backend task producing a result.
///
/// Serialized as the backend's integer code (`1` through `5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    #[default]
    Pending,
    /// Running.
    Doing,
    /// Completed successfully.
    Finish,
    /// Failed.
    Failure,
    /// Stopped externally. The partial output is still valid.
    Terminated,
}

impl TaskState {
    /// Returns true if the task will not produce further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finish | TaskState::Failure | TaskState::Terminated
        )
    }

    /// Ordering used to decide whether an update at equal progress moves the
    /// task forward: pending < doing < any terminal state.
    pub fn rank(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Doing => 1,
            TaskState::Finish | TaskState::Failure | TaskState::Terminated => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Doing => "doing",
            TaskState::Finish => "finish",
            TaskState::Failure => "failure",
            TaskState::Terminated => "terminated",
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> u8 {
        match state {
            TaskState::Pending => 1,
            TaskState::Doing => 2,
            TaskState::Finish => 3,
            TaskState::Failure => 4,
            TaskState::Terminated => 5,
        }
    }
}

impl TryFrom<u8> for TaskState {
    type Error = UnknownStateCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(TaskState::Pending),
            2 => Ok(TaskState::Doing),
            3 => Ok(TaskState::Finish),
            4 => Ok(TaskState::Failure),
            5 => Ok(TaskState::Terminated),
            other => Err(UnknownStateCode {
                set: "task_state",
                code: other,
            }),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An integer code that does not belong to the state set it was decoded as.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {set} code {code}")]
pub struct UnknownStateCode {
    pub set: &'static str,
    pub code: u8,
}

/// Maps a task state to the result validity it implies.
///
/// The match is exhaustive on purpose: adding a `TaskState` variant must not
/// compile until it is given a result state here.
pub fn task_state_to_result_state(state: TaskState) -> ResultState {
    match state {
        TaskState::Pending | TaskState::Doing => ResultState::Ready,
        TaskState::Finish | TaskState::Terminated => ResultState::Valid,
        TaskState::Failure => ResultState::Invalid,
    }
}

/// Whether a result is a dataset or a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Dataset,
    Model,
}

/// Cache key of a result entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultRef {
    pub kind: ResultKind,
    pub id: u64,
}

impl ResultRef {
    pub fn dataset(id: impl Into<u64>) -> Self {
        ResultRef {
            kind: ResultKind::Dataset,
            id: id.into(),
        }
    }

    pub fn model(id: impl Into<u64>) -> Self {
        ResultRef {
            kind: ResultKind::Model,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResultKind::Dataset => write!(f, "dataset:{}", self.id),
            ResultKind::Model => write!(f, "model:{}", self.id),
        }
    }
}

/// The producing task as seen from the result it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub hash: TaskHash,
    pub state: TaskState,
    /// Progress in percent, `0..=100`.
    pub percent: u8,
}

/// A cached dataset or model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntity {
    pub id: u64,
    pub kind: ResultKind,
    pub group_id: GroupId,
    pub project_id: ProjectId,
    pub version_number: u32,
    pub state: ResultState,
    pub task_state: TaskState,
    /// Progress in percent, `0..=100`.
    pub progress: u8,
    /// Set when the cached copy lacks server-computed fields and must be re-fetched.
    #[serde(default)]
    pub need_reload: bool,
    /// Keywords carried by the result. Computed server-side once the result is valid.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub task: TaskInfo,
}

impl ResultEntity {
    /// Creates the placeholder that stands in for a result while its task runs.
    pub fn placeholder(
        key: ResultRef,
        group_id: GroupId,
        project_id: ProjectId,
        task_id: TaskId,
        hash: TaskHash,
    ) -> Self {
        ResultEntity {
            id: key.id,
            kind: key.kind,
            group_id,
            project_id,
            version_number: 0,
            state: ResultState::Ready,
            task_state: TaskState::Pending,
            progress: 0,
            need_reload: false,
            keywords: Vec::new(),
            task: TaskInfo {
                id: task_id,
                hash,
                state: TaskState::Pending,
                percent: 0,
            },
        }
    }

    pub fn key(&self) -> ResultRef {
        ResultRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn hash(&self) -> &TaskHash {
        &self.task.hash
    }

    pub fn is_valid(&self) -> bool {
        self.state == ResultState::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.state == ResultState::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_task_state() -> impl Strategy<Value = TaskState> {
        prop_oneof![
            Just(TaskState::Pending),
            Just(TaskState::Doing),
            Just(TaskState::Finish),
            Just(TaskState::Failure),
            Just(TaskState::Terminated),
        ]
    }

    mod mapping {
        use super::*;

        #[test]
        fn terminated_is_valid_not_failure() {
            assert_eq!(
                task_state_to_result_state(TaskState::Terminated),
                ResultState::Valid
            );
            assert_eq!(
                task_state_to_result_state(TaskState::Failure),
                ResultState::Invalid
            );
        }

        #[test]
        fn running_states_are_ready() {
            assert_eq!(
                task_state_to_result_state(TaskState::Pending),
                ResultState::Ready
            );
            assert_eq!(
                task_state_to_result_state(TaskState::Doing),
                ResultState::Ready
            );
            assert_eq!(
                task_state_to_result_state(TaskState::Finish),
                ResultState::Valid
            );
        }

        proptest! {
            /// Terminal task states map to terminal result states and vice versa.
            #[test]
            fn terminal_maps_to_terminal(state in arb_task_state()) {
                prop_assert_eq!(
                    state.is_terminal(),
                    task_state_to_result_state(state).is_terminal()
                );
            }
        }
    }

    mod codes {
        use super::*;

        #[test]
        fn result_state_uses_backend_codes() {
            assert_eq!(serde_json::to_string(&ResultState::Valid).unwrap(), "1");
            let parsed: ResultState = serde_json::from_str("2").unwrap();
            assert_eq!(parsed, ResultState::Invalid);
        }

        #[test]
        fn task_state_uses_backend_codes() {
            let finish: TaskState = serde_json::from_str("3").unwrap();
            let failure: TaskState = serde_json::from_str("4").unwrap();
            assert_eq!(finish, TaskState::Finish);
            assert_eq!(failure, TaskState::Failure);
        }

        #[test]
        fn unknown_codes_are_rejected() {
            assert!(serde_json::from_str::<ResultState>("3").is_err());
            assert!(serde_json::from_str::<TaskState>("0").is_err());
            assert_eq!(
                TaskState::try_from(9),
                Err(UnknownStateCode {
                    set: "task_state",
                    code: 9
                })
            );
        }

        proptest! {
            #[test]
            fn task_state_code_roundtrip(state in arb_task_state()) {
                let code: u8 = state.into();
                prop_assert_eq!(TaskState::try_from(code), Ok(state));
            }
        }
    }

    mod entity {
        use super::*;

        #[test]
        fn placeholder_is_ready_and_pending() {
            let entity = ResultEntity::placeholder(
                ResultRef::dataset(5u64),
                GroupId(1),
                ProjectId(2),
                TaskId(3),
                TaskHash::new("h1"),
            );
            assert_eq!(entity.state, ResultState::Ready);
            assert_eq!(entity.task_state, TaskState::Pending);
            assert_eq!(entity.key(), ResultRef::dataset(5u64));
            assert_eq!(entity.hash().as_str(), "h1");
            assert!(!entity.need_reload);
        }

        #[test]
        fn rank_orders_terminal_last() {
            assert!(TaskState::Pending.rank() < TaskState::Doing.rank());
            assert!(TaskState::Doing.rank() < TaskState::Failure.rank());
            assert_eq!(TaskState::Finish.rank(), TaskState::Terminated.rank());
        }
    }
}
