//! The ephemeral builder sidecar: a thin client-image container that
//! does the actual cloning/building, bound to nothing on the host but the
//! daemon socket (or a socket-proxy address). One builder per job attempt —
//! never reused across retries, and always torn down on every exit path.

use std::time::Duration;

use anyhow::Context;
use docker::{ContainerRuntime, ContainerSpec, ExecChunk, ExecHandle, ExecStream};
use entities::{Log, timestamp_ms};
use futures::{Future, StreamExt};

use crate::error::{WorkerError, classify_runtime_error};
use crate::strategy::BuildContext;
use crate::util::random_suffix;

const BUILDER_IMAGE: &str = "docker:27-cli";
const BUILDER_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct BuilderContainer<'a> {
  runtime: &'a (dyn ContainerRuntime + 'a),
  pub container_id: String,
}

impl<'a> BuilderContainer<'a> {
  pub async fn exec(
    &self,
    cmd: Vec<String>,
  ) -> Result<(ExecStream, ExecHandle), WorkerError> {
    self
      .runtime
      .exec_in_container(&self.container_id, cmd, false)
      .await
      .map_err(classify_runtime_error)
  }

  pub async fn exit_code(&self, handle: &ExecHandle) -> Result<Option<i64>, WorkerError> {
    self.runtime.exec_exit_code(handle).await.map_err(classify_runtime_error)
  }

  /// Runs `cmd` to completion and reports only whether it exited zero.
  /// Unlike [`run_command`](Self::run_command), a non-zero exit is not a
  /// build failure here — used for existence checks (e.g. "does the repo
  /// carry its own Dockerfile?").
  pub async fn probe(&self, cmd: Vec<String>) -> Result<bool, WorkerError> {
    let (mut stream, handle) = self.exec(cmd).await?;
    while stream.next().await.transpose().map_err(classify_runtime_error)?.is_some() {}
    Ok(self.exit_code(&handle).await? == Some(0))
  }

  /// Runs `cmd` to completion, scrubbing and recording its output as one
  /// [`Log`] stage, and fails the job with `BuildOutcome`-ending
  /// `WorkerError::BuildFailed` on a non-zero exit.
  pub async fn run_command(
    &self,
    ctx: &BuildContext<'_>,
    stage: &str,
    cmd: Vec<String>,
  ) -> Result<(), WorkerError> {
    let command_str = cmd.join(" ");
    let start_ts = timestamp_ms();
    let (mut stream, handle) = self.exec(cmd).await?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Some(chunk) = stream.next().await {
      match chunk.map_err(classify_runtime_error)? {
        ExecChunk::Stdout(bytes) => {
          stdout.push_str(&ctx.scrubber.scrub(&String::from_utf8_lossy(&bytes)))
        }
        ExecChunk::Stderr(bytes) => {
          stderr.push_str(&ctx.scrubber.scrub(&String::from_utf8_lossy(&bytes)))
        }
      }
    }

    let exit_code = self.exit_code(&handle).await?;
    let success = exit_code == Some(0);
    let end_ts = timestamp_ms();

    (ctx.recorder)(Log {
      stage: stage.to_string(),
      command: command_str,
      stdout,
      stderr,
      success,
      start_ts,
      end_ts,
    });

    if success {
      Ok(())
    } else {
      Err(WorkerError::BuildFailed(format!(
        "stage '{stage}' exited with code {exit_code:?}"
      )))
    }
  }
}

/// Creates a builder container, runs `f` against it, and guarantees teardown
/// (5s-grace stop, then force remove) regardless of `f`'s outcome. Teardown
/// errors are logged, never returned — they must not mask the strategy's
/// own error.
pub async fn with_builder_container<F, Fut, T>(
  runtime: &dyn ContainerRuntime,
  service_id: &str,
  docker_host: Option<&str>,
  uses_socket_proxy: bool,
  f: F,
) -> Result<T, WorkerError>
where
  F: FnOnce(BuilderContainer<'_>) -> Fut,
  Fut: Future<Output = Result<T, WorkerError>>,
{
  let binds = if uses_socket_proxy {
    Vec::new()
  } else {
    vec!["/var/run/docker.sock:/var/run/docker.sock".to_string()]
  };

  let spec = ContainerSpec {
    name: format!("helvetia-builder-{service_id}-{}", random_suffix()),
    image: BUILDER_IMAGE.to_string(),
    env: docker_host.map(|h| vec![format!("DOCKER_HOST={h}")]).unwrap_or_default(),
    binds,
    cmd: vec!["sleep".to_string(), "infinity".to_string()],
    auto_remove: false,
    ..Default::default()
  };

  let container_id = runtime
    .create_container(&spec)
    .await
    .map_err(classify_runtime_error)
    .context("failed to create builder container")
    .map_err(WorkerError::InfrastructureTransient)?;

  runtime
    .start_container(&container_id)
    .await
    .map_err(classify_runtime_error)
    .context("failed to start builder container")
    .map_err(WorkerError::InfrastructureTransient)?;

  let result =
    f(BuilderContainer { runtime, container_id: container_id.clone() }).await;

  if let Err(err) = runtime.stop_container(&container_id, BUILDER_STOP_GRACE).await {
    tracing::warn!(container_id, error = %err, "failed to stop builder container");
  }
  if let Err(err) = runtime.remove_container(&container_id, true).await {
    tracing::warn!(container_id, error = %err, "failed to remove builder container");
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use docker::testing::FakeContainerRuntime;

  #[tokio::test]
  async fn teardown_runs_even_when_body_fails() {
    let runtime = FakeContainerRuntime::new();
    let result: Result<(), WorkerError> = with_builder_container(
      &runtime,
      "svc-1",
      None,
      false,
      |_builder| async move {
        Err(WorkerError::BuildFailed("boom".to_string()))
      },
    )
    .await;
    assert!(result.is_err());
    assert!(runtime.list_container_names().await.is_empty());
  }

  #[tokio::test]
  async fn socket_proxy_mode_mounts_nothing() {
    let runtime = FakeContainerRuntime::new();
    with_builder_container(&runtime, "svc-1", Some("tcp://proxy:2375"), true, |builder| async move {
      let spec = runtime.last_created_spec(&builder.container_id).await.unwrap();
      assert!(spec.binds.is_empty());
      Ok(())
    })
    .await
    .unwrap();
  }
}
