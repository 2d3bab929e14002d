use thiserror::Error;

/// Errors surfaced by the Container Runtime Adapter. The adapter
/// never retries on its own — retry policy belongs to the caller, so every
/// variant here is terminal from the adapter's point of view.
#[derive(Debug, Error)]
pub enum RuntimeError {
  #[error("container daemon connection failed: {0}")]
  Connection(String),

  #[error("container not found: {0}")]
  NotFound(String),

  #[error("container daemon error: {0}")]
  Daemon(#[from] bollard::errors::Error),

  #[error("exec stream error: {0}")]
  Exec(String),

  #[error("build context error: {0}")]
  BuildContext(String),
}
