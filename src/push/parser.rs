//! Push channel payload parser.
//!
//! This module parses raw push JSON into typed [`PushMessage`] values. The
//! parser is the validation boundary: the reconciler and listener only ever
//! see well-formed [`TaskUpdate`]s.
//!
//! # Parsing Strategy
//!
//! 1. A JSON object with a top-level `hash` is a single task update
//! 2. A JSON object whose values are all objects is a digest keyed by hash
//! 3. Anything else is `PushMessage::Ignored` (not an error)
//! 4. A task with missing fields or out-of-range codes is an `Err`

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ResultState, TaskHash, TaskState};

use super::events::{PushMessage, TaskUpdate};

/// Error type for push payload parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has invalid value (e.g., empty hash, unknown state code).
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a push payload into a typed message.
///
/// # Returns
///
/// * `Ok(PushMessage::Task(_))` - a single task update
/// * `Ok(PushMessage::Batch(_))` - a digest of task updates
/// * `Ok(PushMessage::Ignored)` - no task in the payload
/// * `Err(e)` - malformed payload or invalid field
///
/// # Examples
///
/// ```
/// use active_loop::push::{PushMessage, parse_push_message};
///
/// let payload = br#"{"hash": "h1", "result_state": 1, "percent": 100, "state": 3}"#;
/// let message = parse_push_message(payload).unwrap();
/// assert!(matches!(message, PushMessage::Task(_)));
/// ```
pub fn parse_push_message(payload: &[u8]) -> Result<PushMessage, ParseError> {
    let value: Value = serde_json::from_slice(payload)?;
    parse_push_value(value)
}

/// Parses an already-decoded JSON value. See [`parse_push_message`].
pub fn parse_push_value(value: Value) -> Result<PushMessage, ParseError> {
    let Value::Object(object) = value else {
        return Ok(PushMessage::Ignored);
    };

    if object.contains_key("hash") {
        let raw: RawTask = serde_json::from_value(Value::Object(object))?;
        return raw.into_update(None).map(PushMessage::Task);
    }

    if !object.is_empty() && object.values().all(Value::is_object) {
        return parse_digest(object).map(PushMessage::Batch);
    }

    Ok(PushMessage::Ignored)
}

fn parse_digest(object: Map<String, Value>) -> Result<Vec<TaskUpdate>, ParseError> {
    let mut updates = Vec::with_capacity(object.len());
    for (hash, value) in object {
        let raw: RawTask = serde_json::from_value(value)?;
        updates.push(raw.into_update(Some(hash))?);
    }
    Ok(updates)
}

// ============================================================================
// Raw payload structure for deserialization
//
// Codes are decoded as plain integers and validated explicitly so that an
// unknown code produces an InvalidField error naming the field.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawTask {
    hash: Option<String>,
    result_state: i64,
    percent: f64,
    state: i64,
    #[serde(default)]
    reload: Option<bool>,
}

impl RawTask {
    fn into_update(self, key: Option<String>) -> Result<TaskUpdate, ParseError> {
        let hash = match (self.hash, key) {
            (Some(h), _) if !h.is_empty() => h,
            (_, Some(k)) if !k.is_empty() => k,
            (h, _) => {
                return Err(ParseError::InvalidField {
                    field: "hash",
                    value: h.unwrap_or_default(),
                });
            }
        };

        let result_state = u8::try_from(self.result_state)
            .ok()
            .and_then(|c| ResultState::try_from(c).ok())
            .ok_or_else(|| ParseError::InvalidField {
                field: "result_state",
                value: self.result_state.to_string(),
            })?;

        let state = u8::try_from(self.state)
            .ok()
            .and_then(|c| TaskState::try_from(c).ok())
            .ok_or_else(|| ParseError::InvalidField {
                field: "state",
                value: self.state.to_string(),
            })?;

        Ok(TaskUpdate {
            hash: TaskHash::new(hash),
            result_state,
            percent: clamp_percent(self.percent)?,
            state,
            reload: self.reload.unwrap_or(false),
        })
    }
}

/// Clamps a percent value to `0..=100`, rounding to the nearest integer.
fn clamp_percent(percent: f64) -> Result<u8, ParseError> {
    if percent.is_nan() {
        return Err(ParseError::InvalidField {
            field: "percent",
            value: percent.to_string(),
        });
    }
    // Clamped to 0..=100 first, so the cast cannot truncate.
    Ok(percent.clamp(0.0, 100.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(json: &str) -> Result<PushMessage, ParseError> {
        parse_push_message(json.as_bytes())
    }

    mod single {
        use super::*;

        #[test]
        fn parses_finished_task() {
            let msg = parse(r#"{"hash": "h1", "result_state": 1, "percent": 100, "state": 3}"#)
                .unwrap();
            assert_eq!(
                msg,
                PushMessage::Task(TaskUpdate {
                    hash: TaskHash::new("h1"),
                    result_state: ResultState::Valid,
                    percent: 100,
                    state: TaskState::Finish,
                    reload: false,
                })
            );
        }

        #[test]
        fn parses_reload_flag() {
            let msg = parse(
                r#"{"hash": "h1", "result_state": 0, "percent": 10, "state": 2, "reload": true}"#,
            )
            .unwrap();
            let PushMessage::Task(update) = msg else {
                panic!("expected task");
            };
            assert!(update.reload);
        }

        #[test]
        fn clamps_and_rounds_percent() {
            let PushMessage::Task(high) =
                parse(r#"{"hash": "h", "result_state": 0, "percent": 140.2, "state": 2}"#)
                    .unwrap()
            else {
                panic!("expected task");
            };
            let PushMessage::Task(low) =
                parse(r#"{"hash": "h", "result_state": 0, "percent": -3, "state": 2}"#).unwrap()
            else {
                panic!("expected task");
            };
            let PushMessage::Task(mid) =
                parse(r#"{"hash": "h", "result_state": 0, "percent": 41.6, "state": 2}"#)
                    .unwrap()
            else {
                panic!("expected task");
            };
            assert_eq!(high.percent, 100);
            assert_eq!(low.percent, 0);
            assert_eq!(mid.percent, 42);
        }

        #[test]
        fn rejects_unknown_task_state() {
            let err = parse(r#"{"hash": "h1", "result_state": 1, "percent": 100, "state": 9}"#)
                .unwrap_err();
            assert!(matches!(
                err,
                ParseError::InvalidField { field: "state", .. }
            ));
        }

        #[test]
        fn rejects_unknown_result_state() {
            let err = parse(r#"{"hash": "h1", "result_state": -1, "percent": 1, "state": 2}"#)
                .unwrap_err();
            assert!(matches!(
                err,
                ParseError::InvalidField {
                    field: "result_state",
                    ..
                }
            ));
        }

        #[test]
        fn rejects_empty_hash() {
            let err = parse(r#"{"hash": "", "result_state": 0, "percent": 1, "state": 2}"#)
                .unwrap_err();
            assert!(matches!(err, ParseError::InvalidField { field: "hash", .. }));
        }

        #[test]
        fn rejects_missing_fields() {
            let err = parse(r#"{"hash": "h1", "percent": 1}"#).unwrap_err();
            assert!(matches!(err, ParseError::JsonError(_)));
        }
    }

    mod digest {
        use super::*;

        #[test]
        fn parses_map_keyed_by_hash() {
            let msg = parse(
                r#"{
                    "h1": {"result_state": 0, "percent": 20, "state": 2},
                    "h2": {"result_state": 2, "percent": 70, "state": 4}
                }"#,
            )
            .unwrap();
            let PushMessage::Batch(mut updates) = msg else {
                panic!("expected batch");
            };
            updates.sort_by(|a, b| a.hash.cmp(&b.hash));
            assert_eq!(updates.len(), 2);
            assert_eq!(updates[0].hash.as_str(), "h1");
            assert_eq!(updates[1].state, TaskState::Failure);
        }

        #[test]
        fn one_bad_entry_fails_the_digest() {
            let err = parse(
                r#"{
                    "h1": {"result_state": 0, "percent": 20, "state": 2},
                    "h2": {"result_state": 7, "percent": 70, "state": 4}
                }"#,
            )
            .unwrap_err();
            assert!(matches!(err, ParseError::InvalidField { .. }));
        }
    }

    mod ignored {
        use super::*;

        #[test]
        fn non_object_is_ignored() {
            assert_eq!(parse("[1, 2]").unwrap(), PushMessage::Ignored);
            assert_eq!(parse("\"ping\"").unwrap(), PushMessage::Ignored);
        }

        #[test]
        fn object_without_tasks_is_ignored() {
            assert_eq!(parse(r#"{"type": "heartbeat"}"#).unwrap(), PushMessage::Ignored);
            assert_eq!(parse("{}").unwrap(), PushMessage::Ignored);
        }

        #[test]
        fn invalid_json_is_an_error() {
            assert!(matches!(parse("{"), Err(ParseError::JsonError(_))));
        }
    }

    proptest! {
        /// Any finite percent parses into 0..=100.
        #[test]
        fn percent_always_in_range(p in -1.0e6f64..1.0e6) {
            let json = format!(
                r#"{{"hash": "h", "result_state": 0, "percent": {}, "state": 2}}"#,
                p
            );
            let PushMessage::Task(update) = parse(&json).unwrap() else {
                panic!("expected task");
            };
            prop_assert!(update.percent <= 100);
        }
    }
}
