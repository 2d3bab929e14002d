//! `DatabaseDeploymentStrategy`: every managed-database `ServiceType`
//! is pulled from a curated, version-pinned tag — never built. Still goes
//! through the normal blue/green SWAP (only compose skips it).

use async_trait::async_trait;
use entities::service::ServiceType;
use entities::Log;
use futures::StreamExt;

use super::{BuildContext, BuildOutcome, BuildStrategy, StrategyOutput};
use crate::error::{classify_runtime_error, WorkerError};

pub struct DatabaseDeploymentStrategy;

#[async_trait]
impl BuildStrategy for DatabaseDeploymentStrategy {
  fn can_handle(&self, service_type: ServiceType) -> bool {
    service_type.is_database()
  }

  async fn deploy(&self, ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
    let image_tag = ctx
      .job
      .r#type
      .curated_image_tag()
      .ok_or_else(|| {
        WorkerError::Validation(format!("{:?} has no curated image tag", ctx.job.r#type))
      })?
      .to_string();

    let mut events =
      ctx.runtime.pull_image(&image_tag, None).await.map_err(classify_runtime_error)?;

    while let Some(event) = events.next().await {
      match event.map_err(classify_runtime_error)? {
        docker::RuntimeEvent::Error(message) => {
          return Err(WorkerError::InfrastructureFatal(anyhow::anyhow!(message)));
        }
        event => (ctx.recorder)(Log::simple("pull", format!("{event:?}"))),
      }
    }

    Ok(StrategyOutput { image_tag, outcome: BuildOutcome::Swapped })
  }
}

#[cfg(test)]
mod tests {
  use docker::testing::FakeContainerRuntime;
  use entities::job::DeploymentJob;
  use entities::VolumeMount;
  use scrub::Scrubber;

  use super::*;

  fn job(service_type: ServiceType) -> DeploymentJob {
    DeploymentJob {
      deployment_id: "dep-1".to_string(),
      service_id: "svc-1".to_string(),
      service_name: "my-db".to_string(),
      r#type: service_type,
      repo_url: String::new(),
      branch: String::new(),
      build_command: String::new(),
      start_command: String::new(),
      static_output_dir: String::new(),
      compose_file: String::new(),
      main_service: String::new(),
      port: 5432,
      env_vars: Vec::new(),
      volumes: Vec::<VolumeMount>::new(),
      custom_domain: None,
      project_name: String::new(),
      environment_name: String::new(),
      username: String::new(),
    }
  }

  #[tokio::test]
  async fn pulls_curated_tag_for_every_database_type() {
    for service_type in ServiceType::DATABASE_TYPES {
      let runtime = FakeContainerRuntime::new();
      let job = job(*service_type);
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

      let output = DatabaseDeploymentStrategy.deploy(&ctx).await.unwrap();
      assert_eq!(output.image_tag, service_type.curated_image_tag().unwrap());
      assert_eq!(output.outcome, BuildOutcome::Swapped);
    }
  }

  #[test]
  fn can_handle_covers_every_database_type_only() {
    let strategy = DatabaseDeploymentStrategy;
    for service_type in ServiceType::DATABASE_TYPES {
      assert!(strategy.can_handle(*service_type));
    }
    assert!(!strategy.can_handle(ServiceType::Docker));
    assert!(!strategy.can_handle(ServiceType::Compose));
  }
}
