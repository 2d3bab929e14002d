use std::path::PathBuf;

use clap::Parser;

/// Flags override environment variables, which override config file values,
/// which override `WorkerConfig::default()`.
#[derive(Debug, Parser)]
#[command(name = "worker", version, about = "Helvetia deployment worker")]
pub struct CliArgs {
  /// Path to a config file or directory of config files.
  #[arg(long)]
  pub config_path: Option<PathBuf>,

  #[arg(long)]
  pub log_level: Option<tracing::Level>,
}
