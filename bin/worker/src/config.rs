//! Assembles `WorkerConfig` by layering CLI flags over environment variables
//! over an optional config file over `WorkerConfig::default()`. Kept
//! as a plain function rather than a `OnceLock` global so `Runtime` owns the
//! only copy and tests can build a `WorkerConfig` directly without touching
//! the process environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use entities::config::{LogConfig, LogLevel, NodeEnv, StdioLogMode, WorkerConfig};
use serde::Deserialize;

use crate::cli::CliArgs;

#[derive(Debug, Default, Deserialize)]
struct Env {
  worker_config_paths: Option<Vec<PathBuf>>,
  worker_config_keywords: Option<Vec<String>>,
  worker_node_env: Option<NodeEnv>,
  worker_database_url: Option<String>,
  worker_kv_store_url: Option<String>,
  worker_docker_host: Option<String>,
  worker_platform_domain: Option<String>,
  worker_container_memory_limit_bytes: Option<i64>,
  worker_container_cpu_nanocpus: Option<i64>,
  worker_max_log_size_chars: Option<usize>,
  worker_image_retention_days: Option<u32>,
  worker_cleanup_dangling_images: Option<bool>,
  worker_cleanup_old_images: Option<bool>,
  worker_cleanup_cron: Option<String>,
  worker_tombstone_grace_days: Option<i64>,
  worker_lock_ttl_seconds: Option<u64>,
  worker_lock_max_retries: Option<u32>,
  worker_lock_base_delay_ms: Option<u64>,
  worker_lock_jitter_ms: Option<u64>,
  worker_deployment_concurrency: Option<usize>,
  worker_shutdown_grace_seconds: Option<u64>,
  worker_health_port: Option<u16>,
  worker_logging_level: Option<LogLevel>,
  worker_logging_stdio: Option<StdioLogMode>,
  worker_logging_pretty: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
  node_env: Option<NodeEnv>,
  database_url: Option<String>,
  kv_store_url: Option<String>,
  docker_host: Option<String>,
  platform_domain: Option<String>,
  container_memory_limit_bytes: Option<i64>,
  container_cpu_nanocpus: Option<i64>,
  max_log_size_chars: Option<usize>,
  image_retention_days: Option<u32>,
  cleanup_dangling_images: Option<bool>,
  cleanup_old_images: Option<bool>,
  cleanup_cron: Option<String>,
  tombstone_grace_days: Option<i64>,
  lock_ttl_seconds: Option<u64>,
  lock_max_retries: Option<u32>,
  lock_base_delay_ms: Option<u64>,
  lock_jitter_ms: Option<u64>,
  deployment_concurrency: Option<usize>,
  shutdown_grace_seconds: Option<u64>,
  health_port: Option<u16>,
  logging: Option<FileLogConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLogConfig {
  level: Option<LogLevel>,
  stdio: Option<StdioLogMode>,
  pretty: Option<bool>,
}

fn level_from_tracing(level: tracing::Level) -> LogLevel {
  match level {
    tracing::Level::TRACE => LogLevel::Trace,
    tracing::Level::DEBUG => LogLevel::Debug,
    tracing::Level::INFO => LogLevel::Info,
    tracing::Level::WARN => LogLevel::Warn,
    tracing::Level::ERROR => LogLevel::Error,
  }
}

/// Loads `.env`, parses CLI flags and environment, optionally merges config
/// files, and produces a fully resolved `WorkerConfig`. Does not call
/// `WorkerConfig::validate` — callers decide when to enforce that.
pub fn load() -> anyhow::Result<WorkerConfig> {
  dotenvy::dotenv().ok();

  let env: Env =
    envy::from_env().context("failed to parse worker environment")?;
  let args = CliArgs::parse();

  let config_paths = args
    .config_path
    .map(|path| vec![path])
    .or_else(|| env.worker_config_paths.clone())
    .unwrap_or_default();

  let file: FileConfig = if config_paths.is_empty() {
    FileConfig::default()
  } else {
    let keywords =
      env.worker_config_keywords.clone().unwrap_or_else(|| vec!["**".to_string()]);
    (::config::ConfigLoader {
      paths: &config_paths.iter().map(PathBuf::as_path).collect::<Vec<&Path>>(),
      match_wildcards: &keywords.iter().map(String::as_str).collect::<Vec<&str>>(),
      include_file_name: ".workerinclude",
      merge_nested: true,
      extend_array: false,
      debug_print: false,
    })
    .load()
    .context("failed to parse worker config files")?
  };

  let defaults = WorkerConfig::default();
  let file_logging = file.logging.unwrap_or_default();

  Ok(WorkerConfig {
    node_env: env.worker_node_env.or(file.node_env).unwrap_or(defaults.node_env),
    logging: LogConfig {
      level: args
        .log_level
        .map(level_from_tracing)
        .or(env.worker_logging_level)
        .or(file_logging.level)
        .unwrap_or(defaults.logging.level),
      stdio: env
        .worker_logging_stdio
        .or(file_logging.stdio)
        .unwrap_or(defaults.logging.stdio),
      pretty: env
        .worker_logging_pretty
        .or(file_logging.pretty)
        .unwrap_or(defaults.logging.pretty),
    },
    database_url: env
      .worker_database_url
      .or(file.database_url)
      .unwrap_or(defaults.database_url),
    kv_store_url: env
      .worker_kv_store_url
      .or(file.kv_store_url)
      .unwrap_or(defaults.kv_store_url),
    docker_host: env.worker_docker_host.or(file.docker_host),
    platform_domain: env
      .worker_platform_domain
      .or(file.platform_domain)
      .unwrap_or(defaults.platform_domain),
    container_memory_limit_bytes: env
      .worker_container_memory_limit_bytes
      .or(file.container_memory_limit_bytes)
      .unwrap_or(defaults.container_memory_limit_bytes),
    container_cpu_nanocpus: env
      .worker_container_cpu_nanocpus
      .or(file.container_cpu_nanocpus)
      .unwrap_or(defaults.container_cpu_nanocpus),
    max_log_size_chars: env
      .worker_max_log_size_chars
      .or(file.max_log_size_chars)
      .unwrap_or(defaults.max_log_size_chars),
    image_retention_days: env
      .worker_image_retention_days
      .or(file.image_retention_days)
      .unwrap_or(defaults.image_retention_days),
    cleanup_dangling_images: env
      .worker_cleanup_dangling_images
      .or(file.cleanup_dangling_images)
      .unwrap_or(defaults.cleanup_dangling_images),
    cleanup_old_images: env
      .worker_cleanup_old_images
      .or(file.cleanup_old_images)
      .unwrap_or(defaults.cleanup_old_images),
    cleanup_cron: env
      .worker_cleanup_cron
      .or(file.cleanup_cron)
      .unwrap_or(defaults.cleanup_cron),
    tombstone_grace_days: env
      .worker_tombstone_grace_days
      .or(file.tombstone_grace_days)
      .unwrap_or(defaults.tombstone_grace_days),
    lock_ttl_seconds: env
      .worker_lock_ttl_seconds
      .or(file.lock_ttl_seconds)
      .unwrap_or(defaults.lock_ttl_seconds),
    lock_max_retries: env
      .worker_lock_max_retries
      .or(file.lock_max_retries)
      .unwrap_or(defaults.lock_max_retries),
    lock_base_delay_ms: env
      .worker_lock_base_delay_ms
      .or(file.lock_base_delay_ms)
      .unwrap_or(defaults.lock_base_delay_ms),
    lock_jitter_ms: env
      .worker_lock_jitter_ms
      .or(file.lock_jitter_ms)
      .unwrap_or(defaults.lock_jitter_ms),
    deployment_concurrency: env
      .worker_deployment_concurrency
      .or(file.deployment_concurrency)
      .unwrap_or(defaults.deployment_concurrency),
    shutdown_grace_seconds: env
      .worker_shutdown_grace_seconds
      .or(file.shutdown_grace_seconds)
      .unwrap_or(defaults.shutdown_grace_seconds),
    health_port: env
      .worker_health_port
      .or(file.health_port)
      .unwrap_or(defaults.health_port),
  })
}
