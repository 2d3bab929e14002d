use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{
  ContainerCreateBody, ContainerSummaryStateEnum, HostConfig,
  NetworkCreateRequest, PortBinding, RestartPolicy, RestartPolicyNameEnum,
  VolumeCreateOptions,
};
use bollard::query_parameters::{
  BuildImageOptions, CreateContainerOptions, CreateImageOptions,
  InspectContainerOptions, ListContainersOptions, ListImagesOptions,
  ListNetworksOptions, ListVolumesOptions, RemoveContainerOptions,
  RemoveImageOptions, RemoveVolumeOptions, StartContainerOptions,
  StopContainerOptions,
};
use bytes::Bytes;
use futures::StreamExt;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, EventStream, ExecHandle, ExecStream, RegistryAuth};
use crate::types::{
  ContainerFilter, ContainerInspect, ContainerSpec, ContainerState,
  ContainerSummary, ExecChunk, ImageFilter, ImageSummary, NetworkSpec,
  NetworkSummary, RuntimeEvent, VolumeSpec, VolumeSummary,
};

/// Live `ContainerRuntime` backed by a connection to the Docker daemon: a
/// thin handle wrapping a single `bollard::Docker`, generalized to the full
/// adapter contract.
pub struct BollardRuntime {
  docker: Docker,
}

impl BollardRuntime {
  /// Connects using the daemon socket, or the socket-proxy endpoint when
  /// `DOCKER_HOST` names one.
  pub fn connect() -> Result<Self, RuntimeError> {
    let docker = Docker::connect_with_local_defaults()
      .map_err(|e| RuntimeError::Connection(e.to_string()))?;
    Ok(Self { docker })
  }

  pub fn connect_with_host(host: &str) -> Result<Self, RuntimeError> {
    let docker = Docker::connect_with_socket(host, 120, bollard::API_DEFAULT_VERSION)
      .map_err(|e| RuntimeError::Connection(e.to_string()))?;
    Ok(Self { docker })
  }
}

fn to_container_state(state: Option<ContainerSummaryStateEnum>) -> ContainerState {
  match state {
    Some(ContainerSummaryStateEnum::CREATED) => ContainerState::Created,
    Some(ContainerSummaryStateEnum::RUNNING) => ContainerState::Running,
    Some(ContainerSummaryStateEnum::PAUSED) => ContainerState::Paused,
    Some(ContainerSummaryStateEnum::RESTARTING) => ContainerState::Restarting,
    Some(ContainerSummaryStateEnum::EXITED) => ContainerState::Exited,
    Some(ContainerSummaryStateEnum::DEAD) => ContainerState::Dead,
    _ => ContainerState::Unknown,
  }
}

/// `force=true` treats "not found" as success.
fn is_not_found(err: &bollard::errors::Error) -> bool {
  matches!(
    err,
    bollard::errors::Error::DockerResponseServerError { status_code, .. }
      if *status_code == 404
  )
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
  async fn create_container(
    &self,
    spec: &ContainerSpec,
  ) -> Result<String, RuntimeError> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
      .port_bindings
      .iter()
      .map(|(container_port, host_port)| {
        let bindings = host_port.as_ref().map(|port| {
          vec![PortBinding { host_ip: None, host_port: Some(port.clone()) }]
        });
        (container_port.clone(), bindings)
      })
      .collect();

    let restart_policy = spec.restart_policy.as_deref().map(|name| RestartPolicy {
      name: Some(match name {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::EMPTY,
      }),
      maximum_retry_count: None,
    });

    let host_config = HostConfig {
      binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
      port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
      network_mode: spec.network.clone(),
      memory: spec.memory_limit_bytes,
      nano_cpus: spec.nano_cpus,
      auto_remove: Some(spec.auto_remove),
      restart_policy,
      ..Default::default()
    };

    let body = ContainerCreateBody {
      image: Some(spec.image.clone()),
      env: (!spec.env.is_empty()).then(|| spec.env.clone()),
      labels: (!spec.labels.is_empty())
        .then(|| spec.labels.clone().into_iter().collect()),
      cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
      entrypoint: (!spec.entrypoint.is_empty())
        .then(|| spec.entrypoint.clone()),
      working_dir: spec.working_dir.clone(),
      host_config: Some(host_config),
      ..Default::default()
    };

    let options = CreateContainerOptions {
      name: Some(spec.name.clone()),
      platform: None,
    };

    let result =
      self.docker.create_container(Some(options), body).await?;
    Ok(result.id)
  }

  async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
    self
      .docker
      .start_container(id, None::<StartContainerOptions>)
      .await?;
    Ok(())
  }

  async fn stop_container(
    &self,
    id: &str,
    grace: Duration,
  ) -> Result<(), RuntimeError> {
    let options = StopContainerOptions { signal: None, t: Some(grace.as_secs() as i32) };
    self.docker.stop_container(id, Some(options)).await?;
    Ok(())
  }

  async fn remove_container(
    &self,
    id: &str,
    force: bool,
  ) -> Result<(), RuntimeError> {
    let options = RemoveContainerOptions { force, v: false, link: false };
    match self.docker.remove_container(id, Some(options)).await {
      Ok(()) => Ok(()),
      Err(e) if force && is_not_found(&e) => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn inspect_container(
    &self,
    id: &str,
  ) -> Result<ContainerInspect, RuntimeError> {
    let inspect = self
      .docker
      .inspect_container(id, None::<InspectContainerOptions>)
      .await?;
    Ok(ContainerInspect {
      id: inspect.id.unwrap_or_default(),
      name: inspect.name.unwrap_or_default(),
      state: to_container_state(
        inspect.state.as_ref().and_then(|s| s.status.map(into_summary_state)),
      ),
      exit_code: inspect.state.and_then(|s| s.exit_code),
      labels: inspect
        .config
        .and_then(|c| c.labels)
        .unwrap_or_default()
        .into_iter()
        .collect(),
    })
  }

  async fn list_containers(
    &self,
    filter: &ContainerFilter,
  ) -> Result<Vec<ContainerSummary>, RuntimeError> {
    let mut filters = HashMap::new();
    if !filter.labels.is_empty() {
      filters.insert(
        "label".to_string(),
        filter
          .labels
          .iter()
          .map(|(k, v)| format!("{k}={v}"))
          .collect::<Vec<_>>(),
      );
    }
    let options = ListContainersOptions {
      all: filter.all,
      limit: None,
      size: false,
      filters: (!filters.is_empty()).then_some(filters),
    };
    let containers = self.docker.list_containers(Some(options)).await?;
    Ok(
      containers
        .into_iter()
        .map(|c| ContainerSummary {
          id: c.id.unwrap_or_default(),
          name: c
            .names
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
          image: c.image.unwrap_or_default(),
          state: to_container_state(c.state),
          labels: c.labels.unwrap_or_default().into_iter().collect(),
        })
        .collect(),
    )
  }

  async fn build_image(
    &self,
    context_tar: Bytes,
    dockerfile_path: &str,
    tag: &str,
  ) -> Result<EventStream, RuntimeError> {
    let options = BuildImageOptions {
      dockerfile: dockerfile_path.to_string(),
      t: Some(tag.to_string()),
      rm: true,
      forcerm: true,
      ..Default::default()
    };
    let stream = self
      .docker
      .build_image(options, None, Some(context_tar))
      .map(|item| match item {
        Ok(info) => Ok(build_info_to_event(info)),
        Err(e) => Ok(RuntimeEvent::Error(e.to_string())),
      });
    Ok(Box::pin(stream))
  }

  async fn pull_image(
    &self,
    reference: &str,
    auth: Option<RegistryAuth>,
  ) -> Result<EventStream, RuntimeError> {
    let (from_image, tag) = match reference.rsplit_once(':') {
      Some((image, tag)) if !tag.contains('/') => {
        (image.to_string(), tag.to_string())
      }
      _ => (reference.to_string(), "latest".to_string()),
    };
    let options = CreateImageOptions {
      from_image: Some(from_image),
      tag: Some(tag),
      ..Default::default()
    };
    let credentials = auth.map(|auth| bollard::auth::DockerCredentials {
      username: auth.username,
      password: auth.password,
      ..Default::default()
    });
    let stream = self
      .docker
      .create_image(Some(options), None, credentials)
      .map(|item| match item {
        Ok(info) => Ok(RuntimeEvent::Status {
          id: info.id,
          status: info.status.unwrap_or_default(),
        }),
        Err(e) => Ok(RuntimeEvent::Error(e.to_string())),
      });
    Ok(Box::pin(stream))
  }

  async fn create_network(
    &self,
    spec: &NetworkSpec,
  ) -> Result<String, RuntimeError> {
    let request = NetworkCreateRequest {
      name: spec.name.clone(),
      driver: spec.driver.clone(),
      ..Default::default()
    };
    let response = self.docker.create_network(request).await?;
    Ok(response.id.unwrap_or_default())
  }

  async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
    match self.docker.remove_network(id).await {
      Ok(()) => Ok(()),
      Err(e) if is_not_found(&e) => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError> {
    let networks = self
      .docker
      .list_networks(None::<ListNetworksOptions>)
      .await?;
    Ok(
      networks
        .into_iter()
        .map(|n| NetworkSummary {
          id: n.id.unwrap_or_default(),
          name: n.name.unwrap_or_default(),
        })
        .collect(),
    )
  }

  async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError> {
    let options = VolumeCreateOptions {
      name: Some(spec.name.clone()),
      driver: spec.driver.clone(),
      labels: Some(spec.labels.clone().into_iter().collect()),
      ..Default::default()
    };
    self.docker.create_volume(options).await?;
    Ok(())
  }

  async fn remove_volume(
    &self,
    name: &str,
    force: bool,
  ) -> Result<(), RuntimeError> {
    let options = RemoveVolumeOptions { force };
    match self.docker.remove_volume(name, Some(options)).await {
      Ok(()) => Ok(()),
      Err(e) if force && is_not_found(&e) => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, RuntimeError> {
    let response =
      self.docker.list_volumes(None::<ListVolumesOptions>).await?;
    Ok(
      response
        .volumes
        .unwrap_or_default()
        .into_iter()
        .map(|v| VolumeSummary {
          name: v.name,
          driver: v.driver,
          labels: v.labels.unwrap_or_default().into_iter().collect(),
        })
        .collect(),
    )
  }

  async fn exec_in_container(
    &self,
    container_id: &str,
    cmd: Vec<String>,
    tty: bool,
  ) -> Result<(ExecStream, ExecHandle), RuntimeError> {
    let config = CreateExecOptions {
      cmd: Some(cmd),
      attach_stdout: Some(true),
      attach_stderr: Some(true),
      tty: Some(tty),
      ..Default::default()
    };
    let created = self.docker.create_exec(container_id, config).await?;
    let exec_id = created.id;

    let started = self
      .docker
      .start_exec(&exec_id, None::<StartExecOptions>)
      .await?;

    let stream: ExecStream = match started {
      StartExecResults::Attached { output, .. } => Box::pin(output.map(|item| {
        match item {
          Ok(bollard::container::LogOutput::StdOut { message }) => {
            Ok(ExecChunk::Stdout(message.to_vec()))
          }
          Ok(bollard::container::LogOutput::StdErr { message }) => {
            Ok(ExecChunk::Stderr(message.to_vec()))
          }
          Ok(bollard::container::LogOutput::Console { message }) => {
            Ok(ExecChunk::Stdout(message.to_vec()))
          }
          Ok(bollard::container::LogOutput::StdIn { .. }) => {
            Ok(ExecChunk::Stdout(Vec::new()))
          }
          Err(e) => Err(RuntimeError::Exec(e.to_string())),
        }
      })),
      StartExecResults::Detached => {
        Box::pin(futures::stream::empty())
      }
    };

    Ok((
      stream,
      ExecHandle { container_id: container_id.to_string(), exec_id },
    ))
  }

  async fn exec_exit_code(
    &self,
    handle: &ExecHandle,
  ) -> Result<Option<i64>, RuntimeError> {
    let inspect = self.docker.inspect_exec(&handle.exec_id).await?;
    Ok(inspect.exit_code)
  }

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, RuntimeError> {
    let mut filters = HashMap::new();
    if let Some(dangling) = filter.dangling {
      filters.insert("dangling".to_string(), vec![dangling.to_string()]);
    }
    let options = ListImagesOptions {
      all: false,
      filters: (!filters.is_empty()).then_some(filters),
      ..Default::default()
    };
    let images = self.docker.list_images(Some(options)).await?;
    Ok(
      images
        .into_iter()
        .map(|image| ImageSummary {
          id: image.id,
          tags: image.repo_tags,
          created_at: image.created,
        })
        .collect(),
    )
  }

  async fn remove_image(&self, reference: &str, force: bool) -> Result<(), RuntimeError> {
    let options = RemoveImageOptions { force, noprune: false };
    match self.docker.remove_image(reference, Some(options), None).await {
      Ok(_) => Ok(()),
      Err(e) if force && is_not_found(&e) => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

fn into_summary_state(
  status: bollard::models::ContainerStateStatusEnum,
) -> ContainerSummaryStateEnum {
  use bollard::models::ContainerStateStatusEnum as S;
  match status {
    S::CREATED => ContainerSummaryStateEnum::CREATED,
    S::RUNNING => ContainerSummaryStateEnum::RUNNING,
    S::PAUSED => ContainerSummaryStateEnum::PAUSED,
    S::RESTARTING => ContainerSummaryStateEnum::RESTARTING,
    S::EXITED => ContainerSummaryStateEnum::EXITED,
    S::REMOVING => ContainerSummaryStateEnum::REMOVING,
    S::DEAD => ContainerSummaryStateEnum::DEAD,
    _ => ContainerSummaryStateEnum::EMPTY,
  }
}

fn build_info_to_event(info: bollard::models::BuildInfo) -> RuntimeEvent {
  if let Some(error) = info.error {
    return RuntimeEvent::Error(error);
  }
  if let Some(stream) = info.stream {
    return RuntimeEvent::Stream(stream);
  }
  if let Some(progress) = info.progress {
    return RuntimeEvent::Progress { id: info.id, progress };
  }
  RuntimeEvent::Status { id: info.id, status: info.status.unwrap_or_default() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_info_prefers_error_over_other_fields() {
    let info = bollard::models::BuildInfo {
      error: Some("boom".to_string()),
      stream: Some("ignored".to_string()),
      ..Default::default()
    };
    assert!(matches!(build_info_to_event(info), RuntimeEvent::Error(e) if e == "boom"));
  }

  #[test]
  fn build_info_stream_becomes_stream_event() {
    let info = bollard::models::BuildInfo {
      stream: Some("Step 1/3".to_string()),
      ..Default::default()
    };
    assert!(
      matches!(build_info_to_event(info), RuntimeEvent::Stream(s) if s == "Step 1/3")
    );
  }

  #[test]
  fn not_found_detection_matches_404_only() {
    let not_found = bollard::errors::Error::DockerResponseServerError {
      status_code: 404,
      message: "no such container".to_string(),
    };
    let conflict = bollard::errors::Error::DockerResponseServerError {
      status_code: 409,
      message: "conflict".to_string(),
    };
    assert!(is_not_found(&not_found));
    assert!(!is_not_found(&conflict));
  }
}
