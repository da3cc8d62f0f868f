//! Push channel event types.
//!
//! These are the validated shapes that reach the listener. Raw payloads are
//! turned into these by [`super::parser`]; nothing downstream sees untyped JSON.

use serde::{Deserialize, Serialize};

use crate::types::{ResultState, TaskHash, TaskState};

/// Progress of one backend task, as pushed by the job service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub hash: TaskHash,
    pub result_state: ResultState,
    /// Progress in percent, clamped to `0..=100` at the channel boundary.
    pub percent: u8,
    pub state: TaskState,
    /// The backend asks for a full re-fetch instead of a patch.
    #[serde(default)]
    pub reload: bool,
}

impl TaskUpdate {
    /// Returns true if the task will not produce further updates.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A parsed push channel message.
///
/// Discriminated by the presence of `hash`: a single task carries it at the
/// top level, a digest is a map of hash → task, anything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// A single task update.
    Task(TaskUpdate),

    /// A digest of several active tasks, keyed by hash.
    Batch(Vec<TaskUpdate>),

    /// A message that carries no task (heartbeat, unrelated topic).
    Ignored,
}

impl PushMessage {
    /// Flattens the message into the task updates it carries.
    pub fn into_updates(self) -> Vec<TaskUpdate> {
        match self {
            PushMessage::Task(update) => vec![update],
            PushMessage::Batch(updates) => updates,
            PushMessage::Ignored => Vec::new(),
        }
    }
}
