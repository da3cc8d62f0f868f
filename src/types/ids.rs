//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a DatasetId
//! where a ModelId is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                $name(n)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

numeric_id!(
    /// A project identifier.
    ProjectId,
    "project:"
);

numeric_id!(
    /// An iteration (round) identifier. Zero means "no iteration".
    IterationId,
    "iteration:"
);

numeric_id!(
    /// A dataset version identifier.
    DatasetId,
    "dataset:"
);

numeric_id!(
    /// A model version identifier.
    ModelId,
    "model:"
);

numeric_id!(
    /// A dataset or model group (all versions of one named asset).
    GroupId,
    "group:"
);

numeric_id!(
    /// A backend task identifier.
    TaskId,
    "task:"
);

impl IterationId {
    /// The sentinel used for `prev_iteration` of the first round.
    pub const NONE: IterationId = IterationId(0);

    /// Returns true if this is the "no iteration" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// The stable content hash that identifies a backend job.
///
/// Push events are correlated to cached results purely by this hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHash(pub String);

impl TaskHash {
    /// Creates a new TaskHash from a string.
    ///
    /// Note: This does not validate the format. The backend treats hashes as opaque.
    pub fn new(s: impl Into<String>) -> Self {
        TaskHash(s.into())
    }

    /// Returns the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (8-character) version of the hash for display.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskHash {
    fn from(s: String) -> Self {
        TaskHash(s)
    }
}

impl From<&str> for TaskHash {
    fn from(s: &str) -> Self {
        TaskHash(s.to_string())
    }
}
