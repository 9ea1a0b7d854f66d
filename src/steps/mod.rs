//! The file work behind each pipeline task.
//!
//! Steps are plain functions over a [`Project`](crate::Project); the
//! pipeline decides when they run. Blocking filesystem batches go through
//! [`blocking`] so they don't stall the async runtime.

pub mod copy;
pub mod finalize;
pub mod install;
pub mod package;
pub mod slim;
pub mod transform;

use crate::error::{FileError, StepError};

/// Runs filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, StepError>
where
    F: FnOnce() -> Result<T, StepError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(FileError::from)?
}
