//! `ComposeDeploymentStrategy`: clones the repo, detects the compose
//! file, layers an override attaching routing labels to `mainService`, and
//! runs `compose up` inside the builder. Compose owns its own containers'
//! lifecycle, so this strategy reports [`BuildOutcome::ComposeManaged`] —
//! the orchestrator must not perform a blue/green swap on top of it.

use async_trait::async_trait;
use command::{quote, ComposeOverrideBuilder};
use entities::labels::RoutingContext;
use entities::sanitize::sanitize_name;
use entities::service::ServiceType;

use super::builder_container::with_builder_container;
use super::{BuildContext, BuildOutcome, BuildStrategy, StrategyOutput};
use crate::error::WorkerError;

const CANDIDATE_COMPOSE_FILES: &[&str] =
  &["compose.yaml", "compose.yml", "docker-compose.yml", "docker-compose.yaml"];

pub struct ComposeDeploymentStrategy;

#[async_trait]
impl BuildStrategy for ComposeDeploymentStrategy {
  fn can_handle(&self, service_type: ServiceType) -> bool {
    service_type == ServiceType::Compose
  }

  async fn deploy(&self, ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
    let job = ctx.job;
    let image_tag = format!("compose:{}", sanitize_name(&job.service_name));
    let project_name = compose_project_name(&job.service_name);

    with_builder_container(
      ctx.runtime,
      &job.service_id,
      ctx.docker_host,
      ctx.uses_socket_proxy,
      |builder| async move {
        builder
          .run_command(
            ctx,
            "clone",
            vec![
              "git".to_string(),
              "clone".to_string(),
              "--depth".to_string(),
              "1".to_string(),
              "--branch".to_string(),
              job.branch.clone(),
              job.repo_url.clone(),
              "/app".to_string(),
            ],
          )
          .await?;

        let compose_file = resolve_compose_file(&builder, job).await?;

        let routing = RoutingContext {
          service_id: job.service_id.clone(),
          service_type: ServiceType::Compose,
          service_name: job.service_name.clone(),
          username: job.username.clone(),
          project_name: job.project_name.clone(),
          environment_name: job.environment_name.clone(),
          platform_domain: ctx.platform_domain.to_string(),
          custom_domain: job.custom_domain.clone(),
          port: job.port,
        };

        let main_service =
          if job.main_service.is_empty() { "app" } else { &job.main_service };

        let override_yaml = ComposeOverrideBuilder::new(main_service, &project_name)
          .labels(routing.labels())
          .env(job.env_vars.clone())
          .volumes(job.volumes.iter().map(|v| (v.source.clone(), v.target.clone())))
          .render();

        builder
          .run_command(
            ctx,
            "write-override",
            vec![
              "sh".to_string(),
              "-c".to_string(),
              format!(
                "cat > /tmp/helvetia-override.yaml <<'HELVETIA_EOF'\n{override_yaml}HELVETIA_EOF"
              ),
            ],
          )
          .await?;

        builder
          .run_command(
            ctx,
            "compose-up",
            vec![
              "sh".to_string(),
              "-c".to_string(),
              format!(
                "cd /app && docker compose -f {} -f /tmp/helvetia-override.yaml -p {} up -d --build --remove-orphans",
                quote(&compose_file),
                quote(&project_name),
              ),
            ],
          )
          .await?;

        Ok(StrategyOutput { image_tag: image_tag.clone(), outcome: BuildOutcome::ComposeManaged })
      },
    )
    .await
  }
}

/// The compose project name is the sanitized service name — assuming
/// `composeProjectName == serviceName` — rather than a qualified path.
/// `Service.name` is already unique-indexed, so this is collision-free and,
/// unlike a path built from `projectName`/`environmentName`, reconstructible
/// by the Cleanup Scheduler from nothing but the Service row.
pub fn compose_project_name(service_name: &str) -> String {
  sanitize_name(service_name)
}

async fn resolve_compose_file(
  builder: &super::builder_container::BuilderContainer<'_>,
  job: &entities::job::DeploymentJob,
) -> Result<String, WorkerError> {
  if !job.compose_file.is_empty() {
    return Ok(job.compose_file.clone());
  }

  for candidate in CANDIDATE_COMPOSE_FILES {
    let exists = builder
      .probe(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("test -f /app/{candidate}"),
      ])
      .await?;
    if exists {
      return Ok((*candidate).to_string());
    }
  }

  Err(WorkerError::Validation(
    "no compose file found: specify composeFile or add compose.yaml".to_string(),
  ))
}

#[cfg(test)]
mod tests {
  use docker::testing::FakeContainerRuntime;
  use entities::job::DeploymentJob;
  use entities::{Log, VolumeMount};
  use scrub::Scrubber;

  use super::*;

  fn job() -> DeploymentJob {
    DeploymentJob {
      deployment_id: "dep-1".to_string(),
      service_id: "svc-1".to_string(),
      service_name: "stack".to_string(),
      r#type: ServiceType::Compose,
      repo_url: "https://github.com/test/stack".to_string(),
      branch: "main".to_string(),
      build_command: String::new(),
      start_command: String::new(),
      static_output_dir: String::new(),
      compose_file: "docker-compose.yml".to_string(),
      main_service: "web".to_string(),
      port: 8080,
      env_vars: Vec::new(),
      volumes: Vec::<VolumeMount>::new(),
      custom_domain: None,
      project_name: "acme".to_string(),
      environment_name: "prod".to_string(),
      username: String::new(),
    }
  }

  #[tokio::test]
  async fn reports_compose_managed_outcome_and_tears_down_builder() {
    let runtime = FakeContainerRuntime::new();
    let job = job();
    let scrubber = Scrubber::default();
    let recorder = |_: Log| {};
    let ctx = BuildContext {
      job: &job,
      runtime: &runtime,
      scrubber: &scrubber,
      docker_host: None,
      uses_socket_proxy: false,
      platform_domain: "helvetia.cloud",
      container_memory_limit_bytes: 1,
      container_cpu_nanocpus: 1,
      recorder: &recorder,
    };

    let output = ComposeDeploymentStrategy.deploy(&ctx).await.unwrap();
    assert_eq!(output.outcome, BuildOutcome::ComposeManaged);
    assert_eq!(output.image_tag, "compose:stack");
    assert!(runtime.list_container_names().await.is_empty());
  }

  #[test]
  fn project_name_is_sanitized_service_name() {
    assert_eq!(compose_project_name("My Stack!"), "my-stack");
  }
}
