//! Core domain types for the loop controller.
//!
//! This module contains the identifiers and records shared by every other
//! module, designed to encode invariants via the type system.

pub mod ids;
pub mod iteration;
pub mod project;
pub mod result;

// Re-export commonly used types at the module level
pub use ids::{DatasetId, GroupId, IterationId, ModelId, ProjectId, TaskHash, TaskId};
pub use iteration::{Iteration, IterationField, NewIteration, Stage};
pub use project::{DatasetSummary, ModelSummary, Project, ProjectSlots, ProjectUpdate, SlotKind};
pub use result::{
    ResultEntity, ResultKind, ResultRef, ResultState, TaskInfo, TaskState, UnknownStateCode,
    task_state_to_result_state,
};
