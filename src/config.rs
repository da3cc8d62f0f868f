//! Loop controller configuration.
//!
//! Every value has a default; `from_env` overrides the ones that operators
//! commonly tune:
//!
//! - `ACTIVE_LOOP_CHANNEL_CAPACITY`: controller inbox size (default 64)
//! - `ACTIVE_LOOP_ACTIVE_TTL_HOURS`: retention of finished push entries (default 24)
//! - `ACTIVE_LOOP_AUTO_RELOAD`: re-fetch results flagged for reload (default true)
//! - `ACTIVE_LOOP_PRUNE_INTERVAL_MINS`: how often finished entries are pruned (default 60)

use std::time::Duration;

use crate::push::DEFAULT_ACTIVE_TTL_HOURS;

/// Default controller inbox size.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default interval between prunes of the listener's active map (1 hour).
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3600;

/// Configuration for a [`LoopController`](crate::controller::LoopController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Capacity of the controller's message channel.
    pub channel_capacity: usize,

    /// Hours a finished task stays in the listener's active map.
    pub active_ttl_hours: i64,

    /// Re-fetch results whose cached copy lacks server-computed fields
    /// (`need_reload`, `reload` pushes, unknown hashes) right after each push.
    ///
    /// When disabled, queued hashes and `need_reload` results wait for an
    /// explicit `reload_pending`. A resubscribe re-fetches only tasks still
    /// running plus whatever is already queued.
    pub auto_reload: bool,

    /// Interval between prunes of the listener's active map.
    pub prune_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopConfig {
    /// Creates a `LoopConfig` with default values.
    pub fn new() -> Self {
        LoopConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            active_ttl_hours: DEFAULT_ACTIVE_TTL_HOURS,
            auto_reload: true,
            prune_interval: Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS),
        }
    }

    /// Creates a `LoopConfig` from environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();

        let channel_capacity = lookup("ACTIVE_LOOP_CHANNEL_CAPACITY")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.channel_capacity);

        let active_ttl_hours = lookup("ACTIVE_LOOP_ACTIVE_TTL_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|&h| h >= 0)
            .unwrap_or(defaults.active_ttl_hours);

        let auto_reload = lookup("ACTIVE_LOOP_AUTO_RELOAD")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.auto_reload);

        let prune_interval = lookup("ACTIVE_LOOP_PRUNE_INTERVAL_MINS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&m| m > 0)
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(defaults.prune_interval);

        LoopConfig {
            channel_capacity,
            active_ttl_hours,
            auto_reload,
            prune_interval,
        }
    }

    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    pub fn with_active_ttl_hours(mut self, hours: i64) -> Self {
        self.active_ttl_hours = hours;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
