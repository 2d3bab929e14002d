//! `StaticDeploymentStrategy`: a two-stage build — a build stage runs
//! the user's `buildCommand`, a runtime stage serves `staticOutputDir` via a
//! minimal static server with SPA fallback. No `startCommand` is ever
//! consulted (S1): a static site has nothing to start.

use async_trait::async_trait;
use command::{build_args, quote, spa_fallback_config, DockerfileBuilder};
use entities::sanitize::sanitize_name;
use entities::service::ServiceType;

use super::builder_container::with_builder_container;
use super::{BuildContext, BuildOutcome, BuildStrategy, StrategyOutput};
use crate::error::WorkerError;

const RUNTIME_PORT: u16 = 80;

pub struct StaticDeploymentStrategy;

#[async_trait]
impl BuildStrategy for StaticDeploymentStrategy {
  fn can_handle(&self, service_type: ServiceType) -> bool {
    service_type == ServiceType::Static
  }

  fn synthesized_dockerfile(&self, job: &entities::job::DeploymentJob) -> Option<String> {
    Some(synthesize_dockerfile(job))
  }

  async fn deploy(&self, ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError> {
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
}

/// The two-stage Dockerfile synthesized for every static-site job. Pure
/// function of the job so VALIDATE can run it before any builder container
/// exists, without cloning the repo first.
fn synthesize_dockerfile(job: &entities::job::DeploymentJob) -> String {
  let output_dir = if job.static_output_dir.is_empty() { "dist" } else { &job.static_output_dir };
  let nginx_conf = spa_fallback_config(RUNTIME_PORT, "/usr/share/nginx/html");
  DockerfileBuilder::new()
    .two_stage("node:20-alpine", "nginx:alpine")
    .workdir("/app")
    .env_keys(job.env_vars.clone())
    .instruction("COPY . .")
    .instruction(format!(
      "RUN {}",
      if job.build_command.is_empty() { "true" } else { &job.build_command }
    ))
    .runtime_instruction(format!("COPY --from=build /app/{output_dir} /usr/share/nginx/html"))
    .runtime_instruction(format!(
      "RUN printf '%s' {} > /etc/nginx/conf.d/default.conf",
      quote(&nginx_conf)
    ))
    .expose(RUNTIME_PORT)
    .cmd("nginx -g daemon off;")
    .render()
}
