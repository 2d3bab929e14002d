//! Shared contracts for the Helvetia deployment worker.
//!
//! These types are the boundary objects described as "contracts, not storage
//! layouts" by the system design: the worker never assumes anything about how
//! the database or queue broker actually persist them.

pub mod config;
pub mod job;
pub mod labels;
pub mod log;
pub mod sanitize;
pub mod service;

pub use config::*;
pub use job::*;
pub use labels::*;
pub use log::*;
pub use sanitize::sanitize_name;
pub use service::*;

/// Milliseconds since the Unix epoch, the timestamp unit used throughout
/// `Log` and persisted records.
pub fn timestamp_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// A single `KEY=value` environment variable as supplied by the job envelope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvironmentVar {
  pub variable: String,
  pub value: String,
}

impl EnvironmentVar {
  pub fn new(variable: impl Into<String>, value: impl Into<String>) -> Self {
    Self { variable: variable.into(), value: value.into() }
  }
}

/// A volume mount requested by the job envelope (bind or named-volume source).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VolumeMount {
  pub source: String,
  pub target: String,
}
