//! The worker's closed error taxonomy: the Queue Runtime decides
//! retry-vs-not off the variant, never by matching error message strings.

use docker::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("transient infrastructure error: {0}")]
  InfrastructureTransient(#[source] anyhow::Error),

  #[error("fatal infrastructure error: {0}")]
  InfrastructureFatal(#[source] anyhow::Error),

  #[error("build failed: {0}")]
  BuildFailed(String),

  #[error("could not acquire status lock: {0}")]
  LockUnavailable(#[from] lock::LockError),

  #[error("cleanup error: {0}")]
  Cleanup(#[source] anyhow::Error),
}

impl WorkerError {
  /// Whether the Queue Runtime's default policy should retry the job that
  /// produced this error. Validation failures and build failures are
  /// caller mistakes, not transient conditions, so they are never retried.
  pub fn is_retryable(&self) -> bool {
    matches!(self, WorkerError::InfrastructureTransient(_))
  }
}

/// `NotFound` (image/container missing) is not usefully retryable, so it
/// maps to `InfrastructureFatal`; every other adapter error is treated as
/// transient since the adapter itself never distinguishes a daemon
/// 5xx from a connection hiccup.
pub fn classify_runtime_error(err: RuntimeError) -> WorkerError {
  match err {
    RuntimeError::NotFound(_) => WorkerError::InfrastructureFatal(err.into()),
    other => WorkerError::InfrastructureTransient(other.into()),
  }
}
