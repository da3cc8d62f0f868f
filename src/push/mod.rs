//! Push channel handling.
//!
//! # Module Structure
//!
//! - [`events`]: Typed task updates and push messages
//! - [`parser`]: Validation boundary from raw JSON to typed messages
//! - [`listener`]: Per-session hash matching, monotonicity and reload queueing

pub mod events;
pub mod listener;
pub mod parser;

pub use events::{PushMessage, TaskUpdate};
pub use listener::{ActiveTask, DEFAULT_ACTIVE_TTL_HOURS, ListenOutcome, PushListener};
pub use parser::{ParseError, parse_push_message, parse_push_value};
