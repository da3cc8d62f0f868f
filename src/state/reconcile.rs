//! Task→result reconciliation.
//!
//! Applies one task progress update to one cached result entity. This is the
//! only code path that patches a cached entity; the listener decides *whether*
//! an update is applied, this module decides *how*.

use crate::push::events::TaskUpdate;
use crate::types::{ResultEntity, ResultState};

/// Applies `task` to `result`, returning the updated entity.
///
/// Precondition (checked by the caller): `result.task.hash == task.hash`.
///
/// Returns `None` when either argument is missing. Callers treat `None` as
/// "no change"; it is never an error.
///
/// A `Valid` result state sets `need_reload`: validity implies server-computed
/// fields (keywords, asset counts) that the update does not carry.
pub fn reconcile(
    result: Option<&ResultEntity>,
    task: Option<&TaskUpdate>,
) -> Option<ResultEntity> {
    let (result, task) = (result?, task?);
    let mut updated = result.clone();

    if task.result_state == ResultState::Valid {
        updated.need_reload = true;
    }

    updated.state = task.result_state;
    updated.progress = task.percent;
    updated.task_state = task.state;
    updated.task.state = task.state;
    updated.task.percent = task.percent;

    Some(updated)
}
