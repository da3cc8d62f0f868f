//! Pure state logic for the loop controller.
//!
//! This module contains the functional core: the stage table, the
//! task-to-result reconciler, round-zero preparation and the iteration state
//! machine. All I/O and effects are handled by the controller.

pub mod machine;
pub mod preparation;
pub mod reconcile;
pub mod stages;

// Re-export commonly used types and functions
pub use machine::{
    AvailableActions, StageEvent, TransitionError, available_actions, next_round, reduce,
    task_request,
};
pub use preparation::{
    PrepareSlot, PreparationError, SlotFilter, StartPlan, eligible_datasets, eligible_models,
    plan_start, preparation_slots, ready_to_start,
};
pub use reconcile::reconcile;
pub use stages::{PREPARE_LABEL, StageDescriptor, bound_outputs, step_name};
