//! Active Loop - client-side controller for active-learning iteration rounds.
//!
//! This library sequences the stages of one round (prepare, mine, label,
//! merge, train, advance) and keeps a local cache of result entities
//! consistent with push-delivered job progress.

pub mod config;
pub mod controller;
pub mod effects;
pub mod push;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test_utils;
