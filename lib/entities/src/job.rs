use serde::{Deserialize, Serialize};

use crate::{EnvironmentVar, VolumeMount, service::ServiceType};

/// The `deployments` queue message. Treated as immutable for the
/// duration of the job — nothing in the orchestrator or a strategy ever
/// mutates a field of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
  pub deployment_id: String,
  pub service_id: String,
  pub service_name: String,
  #[serde(rename = "type")]
  pub r#type: ServiceType,
  pub repo_url: String,
  pub branch: String,
  #[serde(default)]
  pub build_command: String,
  #[serde(default)]
  pub start_command: String,
  #[serde(default)]
  pub static_output_dir: String,
  #[serde(default)]
  pub compose_file: String,
  #[serde(default)]
  pub main_service: String,
  pub port: u16,
  #[serde(default)]
  pub env_vars: Vec<EnvironmentVar>,
  #[serde(default)]
  pub volumes: Vec<VolumeMount>,
  #[serde(default)]
  pub custom_domain: Option<String>,
  #[serde(default)]
  pub project_name: String,
  #[serde(default)]
  pub environment_name: String,
  #[serde(default)]
  pub username: String,
}

impl DeploymentJob {
  /// All non-empty env-var values, used to build the Secret Scrubber.
  pub fn secret_values(&self) -> Vec<&str> {
    self
      .env_vars
      .iter()
      .map(|v| v.value.as_str())
      .filter(|v| !v.is_empty())
      .collect()
  }
}

/// The `service-cleanup` queue message: an empty-payload trigger. The
/// Cleanup Scheduler itself pushes a repeating `daily-cleanup` job with a
/// cron spec; the payload carries nothing beyond that it fired.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CleanupJob;
