//! `DockerDeploymentStrategy`: either pulls a pre-built image
//! reference directly, or clones the repo into the builder and builds it,
//! synthesizing a Dockerfile when the repo doesn't carry one.

use async_trait::async_trait;
use command::{build_args, quote, DockerfileBuilder};
use entities::sanitize::sanitize_name;
use entities::service::ServiceType;
use entities::Log;
use futures::StreamExt;

use super::builder_container::with_builder_container;
use super::{BuildContext, BuildOutcome, BuildStrategy, StrategyOutput};
use crate::error::{classify_runtime_error, WorkerError};

const URL_PREFIXES: &[&str] = &["http://", "https://", "git@", "ssh://"];

pub struct DockerDeploymentStrategy;

#[async_trait]
impl BuildStrategy for DockerDeploymentStrategy {
  fn can_handle(&self, service_type: ServiceType) -> bool {
    service_type == ServiceType::Docker
  }

  fn synthesized_dockerfile(&self, job: &entities::job::DeploymentJob) -> Option<String> {
    is_repo_reference(&job.repo_url).then(|| synthesize_dockerfile(job))
  }

  async fn deploy(&self, ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
    if is_repo_reference(&ctx.job.repo_url) {
      build_from_repo(ctx).await
    } else {
      pull_prebuilt_image(ctx).await
    }
  }
}

fn is_repo_reference(repo_url: &str) -> bool {
  URL_PREFIXES.iter().any(|prefix| repo_url.starts_with(prefix))
}

/// The single-stage Dockerfile synthesized when the repo carries none of its
/// own. Pure function of the job so VALIDATE can run it before any builder
/// container exists, without cloning the repo first.
fn synthesize_dockerfile(job: &entities::job::DeploymentJob) -> String {
  DockerfileBuilder::new()
    .from_image("node:20-alpine")
    .workdir("/app")
    .env_keys(job.env_vars.clone())
    .instruction("COPY . .")
    .instruction(format!(
      "RUN {}",
      if job.build_command.is_empty() { "true" } else { &job.build_command }
    ))
    .expose(job.port)
    .cmd(&job.start_command)
    .render()
}

/// `repoUrl` that isn't URL-like is treated as a pre-built image reference
///: tag is `branch` unless `branch == "main"`, in which case `latest`.
async fn pull_prebuilt_image(ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
  let job = ctx.job;
  let tag = if job.branch != "main" { job.branch.clone() } else { "latest".to_string() };
  let reference = format!("{}:{tag}", job.repo_url);

  let mut events =
    ctx.runtime.pull_image(&reference, None).await.map_err(classify_runtime_error)?;

  while let Some(event) = events.next().await {
    match event.map_err(classify_runtime_error)? {
      docker::RuntimeEvent::Error(message) => {
        return Err(WorkerError::InfrastructureFatal(anyhow::anyhow!(message)));
      }
      event => (ctx.recorder)(Log::simple("pull", format!("{event:?}"))),
    }
  }

  Ok(StrategyOutput { image_tag: reference, outcome: BuildOutcome::Swapped })
}

async fn build_from_repo(ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
  let job = ctx.job;
  let image_tag = format!("helvetia/{}:latest", sanitize_name(&job.service_name));

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

      let has_dockerfile = builder
        .probe(vec!["sh".to_string(), "-c".to_string(), "test -f /app/Dockerfile".to_string()])
        .await?;

      if !has_dockerfile {
        let dockerfile = synthesize_dockerfile(job);

        builder
          .run_command(
            ctx,
            "write-dockerfile",
            vec![
              "sh".to_string(),
              "-c".to_string(),
              format!("cat > /app/Dockerfile <<'HELVETIA_EOF'\n{dockerfile}HELVETIA_EOF"),
            ],
          )
          .await?;
      }

      builder
        .run_command(
          ctx,
          "build",
          vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("docker build{} -t {} /app", build_args(&job.env_vars), quote(&image_tag)),
          ],
        )
        .await?;

      Ok(StrategyOutput { image_tag: image_tag.clone(), outcome: BuildOutcome::Swapped })
    },
  )
  .await
}
