//! Session controller tying the push channel, the state machine and the
//! backend together.
//!
//! # Module Structure
//!
//! - [`message`]: Controller message and notice types
//! - [`controller`]: The controller, its effect execution and event loop

#[allow(clippy::module_inception)]
mod controller;
mod message;


pub use controller::{LoopController, LoopError, loop_channel};
pub use message::{LoopMessage, LoopNotice};
