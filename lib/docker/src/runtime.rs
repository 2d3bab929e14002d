use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::RuntimeError;
use crate::types::{
  ContainerFilter, ContainerInspect, ContainerSpec, ContainerSummary, ExecChunk,
  ImageFilter, ImageSummary, NetworkSpec, NetworkSummary, RuntimeEvent, VolumeSpec,
  VolumeSummary,
};

pub type EventStream =
  Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;
pub type ExecStream =
  Pin<Box<dyn Stream<Item = Result<ExecChunk, RuntimeError>> + Send>>;

/// Credentials for a registry pull, e.g. a GHCR token provided with the job
///.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
  pub username: Option<String>,
  pub password: Option<String>,
}

/// A running exec session inside a container, returned alongside its output
/// stream so the caller can recover the exit code once the stream ends.
#[derive(Debug, Clone)]
pub struct ExecHandle {
  pub container_id: String,
  pub exec_id: String,
}

/// Typed wrapper over the container daemon. Implementations never
/// retry internally — retry policy belongs to the orchestrator and the
/// Distributed Status Lock.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  async fn create_container(
    &self,
    spec: &ContainerSpec,
  ) -> Result<String, RuntimeError>;

  async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

  async fn stop_container(
    &self,
    id: &str,
    grace: Duration,
  ) -> Result<(), RuntimeError>;

  /// `force=true` succeeds even when the target is missing (404 treated as
  /// success); all other errors surface.
  async fn remove_container(
    &self,
    id: &str,
    force: bool,
  ) -> Result<(), RuntimeError>;

  async fn inspect_container(
    &self,
    id: &str,
  ) -> Result<ContainerInspect, RuntimeError>;

  /// Returns both running and stopped containers when `filter.all` is set.
  async fn list_containers(
    &self,
    filter: &ContainerFilter,
  ) -> Result<Vec<ContainerSummary>, RuntimeError>;

  async fn build_image(
    &self,
    context_tar: Bytes,
    dockerfile_path: &str,
    tag: &str,
  ) -> Result<EventStream, RuntimeError>;

  async fn pull_image(
    &self,
    reference: &str,
    auth: Option<RegistryAuth>,
  ) -> Result<EventStream, RuntimeError>;

  async fn create_network(
    &self,
    spec: &NetworkSpec,
  ) -> Result<String, RuntimeError>;

  async fn remove_network(&self, id: &str) -> Result<(), RuntimeError>;

  async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError>;

  async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError>;

  async fn remove_volume(
    &self,
    name: &str,
    force: bool,
  ) -> Result<(), RuntimeError>;

  async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, RuntimeError>;

  async fn exec_in_container(
    &self,
    container_id: &str,
    cmd: Vec<String>,
    tty: bool,
  ) -> Result<(ExecStream, ExecHandle), RuntimeError>;

  /// `None` while the exec is still running.
  async fn exec_exit_code(
    &self,
    handle: &ExecHandle,
  ) -> Result<Option<i64>, RuntimeError>;

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, RuntimeError>;

  /// `force=true` succeeds even when the target is missing (404 treated as
  /// success), matching `remove_container`'s contract.
  async fn remove_image(&self, reference: &str, force: bool) -> Result<(), RuntimeError>;
}
