//! Backend collaborator traits.
//!
//! These traits define how effects are executed against the job service. The
//! crate ships no HTTP implementation; the embedding application provides one,
//! and tests use in-memory mocks (see `test_utils`).
//!
//! The trait-based design enables:
//! - Mock interpreters for testing
//! - Logging/tracing wrappers
//! - Swapping transports without touching the state machine

use std::future::Future;

use crate::types::{
    Iteration, IterationId, NewIteration, Project, ProjectUpdate, ResultEntity, ResultRef, Stage,
    TaskHash, TaskId,
};

use super::{CreatedTask, TaskRequest};

/// Creates backend tasks.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct MockTasks { next: AtomicU64 }
///
/// impl TaskService for MockTasks {
///     type Error = String;
///
///     async fn create_task(&self, request: TaskRequest) -> Result<CreatedTask, Self::Error> {
///         let n = self.next.fetch_add(1, Ordering::SeqCst);
///         Ok(CreatedTask { id: TaskId(n), hash: TaskHash::new(format!("t{n}")) })
///     }
/// }
/// ```
pub trait TaskService {
    /// The error type returned by this service.
    type Error;

    /// Submit a task and return its id and hash.
    fn create_task(
        &self,
        request: TaskRequest,
    ) -> impl Future<Output = Result<CreatedTask, Self::Error>> + Send;
}

/// Fetches authoritative result entities.
pub trait ResultService {
    /// The error type returned by this service.
    type Error;

    /// Full re-fetch of the result produced by the task with `hash`.
    ///
    /// Returns `Ok(None)` if the backend has no result for that hash yet.
    fn fetch_by_hash(
        &self,
        hash: &TaskHash,
    ) -> impl Future<Output = Result<Option<ResultEntity>, Self::Error>> + Send;

    /// Full fetch of the result stored under `key`.
    ///
    /// Used for results bound to an iteration whose producing task this
    /// session never saw. Returns `Ok(None)` if the backend has no such result.
    fn fetch_result(
        &self,
        key: ResultRef,
    ) -> impl Future<Output = Result<Option<ResultEntity>, Self::Error>> + Send;
}

/// Persists iteration state. Every call returns the updated iteration.
pub trait IterationService {
    /// The error type returned by this service.
    type Error;

    fn get_iteration(
        &self,
        id: IterationId,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send;

    fn create_iteration(
        &self,
        iteration: NewIteration,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send;

    fn bind_step(
        &self,
        id: IterationId,
        stage: Stage,
        task: TaskId,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send;

    fn next_step(
        &self,
        id: IterationId,
        stage: Stage,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send;

    fn skip_step(
        &self,
        id: IterationId,
        stage: Stage,
    ) -> impl Future<Output = Result<Iteration, Self::Error>> + Send;
}

/// Persists project slot bindings.
pub trait ProjectService {
    /// The error type returned by this service.
    type Error;

    fn update_project(
        &self,
        update: ProjectUpdate,
    ) -> impl Future<Output = Result<Project, Self::Error>> + Send;
}
