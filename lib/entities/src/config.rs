use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
  pub level: LogLevel,
  pub stdio: StdioLogMode,
  pub pretty: bool,
}

/// Environment variable name for the Node-style deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
  Development,
  #[default]
  Production,
  Test,
}

/// Fully resolved worker configuration, the output of layering CLI flags
/// over environment variables over an optional config file over defaults
/// (see `bin/worker/src/config.rs`). Deliberately a plain data type with no
/// parsing dependencies so fakes can build one directly in tests.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub node_env: NodeEnv,
  pub logging: LogConfig,

  pub database_url: String,
  pub kv_store_url: String,

  /// Daemon host override; when it contains `docker-socket-proxy`, the
  /// builder container's bind-mount list is empty.
  pub docker_host: Option<String>,
  pub platform_domain: String,

  pub container_memory_limit_bytes: i64,
  pub container_cpu_nanocpus: i64,

  pub max_log_size_chars: usize,
  pub image_retention_days: u32,
  pub cleanup_dangling_images: bool,
  pub cleanup_old_images: bool,
  pub cleanup_cron: String,
  pub tombstone_grace_days: i64,

  pub lock_ttl_seconds: u64,
  pub lock_max_retries: u32,
  pub lock_base_delay_ms: u64,
  pub lock_jitter_ms: u64,

  pub deployment_concurrency: usize,
  pub shutdown_grace_seconds: u64,

  pub health_port: u16,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      node_env: NodeEnv::default(),
      logging: LogConfig::default(),
      database_url: String::new(),
      kv_store_url: String::new(),
      docker_host: None,
      platform_domain: "helvetia.cloud".to_string(),
      container_memory_limit_bytes: 512 * 1024 * 1024,
      container_cpu_nanocpus: 1_000_000_000,
      max_log_size_chars: 50_000,
      image_retention_days: 7,
      cleanup_dangling_images: true,
      cleanup_old_images: true,
      cleanup_cron: "0 2 * * *".to_string(),
      tombstone_grace_days: 30,
      lock_ttl_seconds: 10,
      lock_max_retries: 10,
      lock_base_delay_ms: 200,
      lock_jitter_ms: 100,
      deployment_concurrency: 4,
      shutdown_grace_seconds: 30,
      health_port: 3003,
    }
  }
}

/// Validation bounds for the worker's tunables. Returns every violation
/// rather than failing on the first, matching "fail fast on startup with
/// aggregated messages".
impl WorkerConfig {
  pub fn validate(&self) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if self.database_url.is_empty() {
      errors.push("database url must not be empty".to_string());
    }
    if self.kv_store_url.is_empty() {
      errors.push("kv store url must not be empty".to_string());
    }
    if !(1_000..=1_000_000).contains(&self.max_log_size_chars) {
      errors.push(format!(
        "max_log_size_chars must be in [1000, 1000000], got {}",
        self.max_log_size_chars
      ));
    }
    if !(1..=90).contains(&self.image_retention_days) {
      errors.push(format!(
        "image_retention_days must be in [1, 90], got {}",
        self.image_retention_days
      ));
    }
    if !(1..=60).contains(&self.lock_ttl_seconds) {
      errors.push(format!(
        "lock_ttl_seconds must be in [1, 60], got {}",
        self.lock_ttl_seconds
      ));
    }
    if !(50..=5000).contains(&self.lock_base_delay_ms) {
      errors.push(format!(
        "lock_base_delay_ms must be in [50, 5000], got {}",
        self.lock_base_delay_ms
      ));
    }
    if self.lock_jitter_ms > 1000 {
      errors.push(format!(
        "lock_jitter_ms must be in [0, 1000], got {}",
        self.lock_jitter_ms
      ));
    }
    if !(1024..=65535).contains(&self.health_port) {
      errors.push(format!(
        "health_port must be in [1024, 65535], got {}",
        self.health_port
      ));
    }
    if croner::Cron::new(&self.cleanup_cron).parse().is_err() {
      errors.push(format!("cleanup_cron is not valid cron syntax: {}", self.cleanup_cron));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
  }

  pub fn uses_socket_proxy(&self) -> bool {
    self
      .docker_host
      .as_deref()
      .is_some_and(|h| h.contains("docker-socket-proxy"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_with_urls_is_valid() {
    let mut config = WorkerConfig::default();
    config.database_url = "mongodb://localhost".to_string();
    config.kv_store_url = "redis://localhost".to_string();
    assert!(config.validate().is_ok());
  }

  #[test]
  fn aggregates_multiple_errors() {
    let mut config = WorkerConfig::default();
    config.max_log_size_chars = 10;
    config.health_port = 80;
    let errors = config.validate().unwrap_err();
    assert!(errors.len() >= 4); // db url, kv url, log size, health port
  }
}
