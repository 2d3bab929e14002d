//! An in-memory `ContainerRuntime` for orchestrator and strategy tests — no
//! live daemon required. Behavior is scriptable (queued exit codes, forced
//! failures) so tests can drive the failure paths a live daemon would be
//! awkward to force.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, EventStream, ExecHandle, ExecStream, RegistryAuth};
use crate::types::{
  ContainerFilter, ContainerInspect, ContainerSpec, ContainerState, ContainerSummary,
  ImageFilter, ImageSummary, NetworkSpec, NetworkSummary, RuntimeEvent, VolumeSpec,
  VolumeSummary,
};

#[derive(Debug, Clone)]
struct FakeContainer {
  spec: ContainerSpec,
  state: ContainerState,
}

#[derive(Default)]
struct Inner {
  containers: HashMap<String, FakeContainer>,
  networks: HashMap<String, NetworkSpec>,
  volumes: HashMap<String, VolumeSpec>,
  images: HashMap<String, ImageSummary>,
  next_id: u64,
  next_exec_id: u64,
  fail_start: HashSet<String>,
  fail_next_container_start: bool,
  fail_next_build: bool,
  fail_next_pull: bool,
  queued_exec_exit_codes: VecDeque<i64>,
}

#[derive(Default)]
pub struct FakeContainerRuntime {
  inner: Mutex<Inner>,
}

impl FakeContainerRuntime {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn list_container_names(&self) -> Vec<String> {
    self.inner.lock().unwrap().containers.values().map(|c| c.spec.name.clone()).collect()
  }

  pub async fn last_created_spec(&self, id: &str) -> Option<ContainerSpec> {
    self.inner.lock().unwrap().containers.get(id).map(|c| c.spec.clone())
  }

  pub async fn is_running(&self, id: &str) -> bool {
    self
      .inner
      .lock()
      .unwrap()
      .containers
      .get(id)
      .is_some_and(|c| c.state == ContainerState::Running)
  }

  /// Makes the next `start_container` call on `id` fail once.
  pub fn fail_next_start(&self, id: impl Into<String>) {
    self.inner.lock().unwrap().fail_start.insert(id.into());
  }

  /// Makes whichever container `create_container` produces next fail its
  /// first `start_container` call, without the caller needing to know the
  /// generated id in advance.
  pub fn fail_next_container_start(&self) {
    self.inner.lock().unwrap().fail_next_container_start = true;
  }

  pub fn fail_next_build(&self) {
    self.inner.lock().unwrap().fail_next_build = true;
  }

  pub fn fail_next_pull(&self) {
    self.inner.lock().unwrap().fail_next_pull = true;
  }

  /// Queues the exit code the next `exec_in_container` call's handle will
  /// report from `exec_exit_code`. Defaults to `0` when the queue is empty.
  pub fn queue_exec_exit_code(&self, code: i64) {
    self.inner.lock().unwrap().queued_exec_exit_codes.push_back(code);
  }

  /// Seeds an image for `list_images`/`remove_image` tests. An empty `tags`
  /// list means the image is dangling.
  pub fn seed_image(&self, id: impl Into<String>, tags: Vec<String>, created_at: i64) {
    let id = id.into();
    self
      .inner
      .lock()
      .unwrap()
      .images
      .insert(id.clone(), ImageSummary { id, tags, created_at });
  }

  pub async fn image_exists(&self, id: &str) -> bool {
    self.inner.lock().unwrap().images.contains_key(id)
  }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
  async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    inner.next_id += 1;
    let id = format!("fake-container-{}", inner.next_id);
    inner
      .containers
      .insert(id.clone(), FakeContainer { spec: spec.clone(), state: ContainerState::Created });
    if std::mem::take(&mut inner.fail_next_container_start) {
      inner.fail_start.insert(id.clone());
    }
    Ok(id)
  }

  async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    if inner.fail_start.remove(id) {
      return Err(RuntimeError::Connection(format!("forced start failure for {id}")));
    }
    match inner.containers.get_mut(id) {
      Some(c) => {
        c.state = ContainerState::Running;
        Ok(())
      }
      None => Err(RuntimeError::NotFound(id.to_string())),
    }
  }

  async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    match inner.containers.get_mut(id) {
      Some(c) => {
        c.state = ContainerState::Exited;
        Ok(())
      }
      None => Err(RuntimeError::NotFound(id.to_string())),
    }
  }

  async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    if inner.containers.remove(id).is_none() && !force {
      return Err(RuntimeError::NotFound(id.to_string()));
    }
    Ok(())
  }

  async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
    let inner = self.inner.lock().unwrap();
    let container = inner.containers.get(id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
    Ok(ContainerInspect {
      id: id.to_string(),
      name: container.spec.name.clone(),
      state: container.state,
      exit_code: None,
      labels: container.spec.labels.clone(),
    })
  }

  async fn list_containers(
    &self,
    filter: &ContainerFilter,
  ) -> Result<Vec<ContainerSummary>, RuntimeError> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .containers
        .iter()
        .filter(|(_, c)| filter.all || c.state == ContainerState::Running)
        .filter(|(_, c)| {
          filter.labels.iter().all(|(k, v)| c.spec.labels.get(k) == Some(v))
        })
        .map(|(id, c)| ContainerSummary {
          id: id.clone(),
          name: c.spec.name.clone(),
          image: c.spec.image.clone(),
          state: c.state,
          labels: c.spec.labels.clone(),
        })
        .collect(),
    )
  }

  async fn build_image(
    &self,
    _context_tar: Bytes,
    _dockerfile_path: &str,
    tag: &str,
  ) -> Result<EventStream, RuntimeError> {
    let fail = {
      let mut inner = self.inner.lock().unwrap();
      std::mem::take(&mut inner.fail_next_build)
    };
    let events = if fail {
      vec![Err(RuntimeError::BuildContext("forced build failure".to_string()))]
    } else {
      vec![
        Ok(RuntimeEvent::Status { id: None, status: format!("building {tag}") }),
        Ok(RuntimeEvent::Stream(format!("Successfully tagged {tag}\n"))),
      ]
    };
    Ok(Box::pin(stream::iter(events)) as Pin<Box<_>>)
  }

  async fn pull_image(
    &self,
    reference: &str,
    _auth: Option<RegistryAuth>,
  ) -> Result<EventStream, RuntimeError> {
    let fail = {
      let mut inner = self.inner.lock().unwrap();
      std::mem::take(&mut inner.fail_next_pull)
    };
    let events = if fail {
      vec![Err(RuntimeError::NotFound(reference.to_string()))]
    } else {
      vec![Ok(RuntimeEvent::Status { id: None, status: format!("pulled {reference}") })]
    };
    Ok(Box::pin(stream::iter(events)) as Pin<Box<_>>)
  }

  async fn create_network(&self, spec: &NetworkSpec) -> Result<String, RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    inner.networks.insert(spec.name.clone(), spec.clone());
    Ok(spec.name.clone())
  }

  async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
    self.inner.lock().unwrap().networks.remove(id);
    Ok(())
  }

  async fn list_networks(&self) -> Result<Vec<NetworkSummary>, RuntimeError> {
    Ok(
      self
        .inner
        .lock()
        .unwrap()
        .networks
        .values()
        .map(|n| NetworkSummary { id: n.name.clone(), name: n.name.clone() })
        .collect(),
    )
  }

  async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError> {
    self.inner.lock().unwrap().volumes.insert(spec.name.clone(), spec.clone());
    Ok(())
  }

  async fn remove_volume(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    if inner.volumes.remove(name).is_none() && !force {
      return Err(RuntimeError::NotFound(name.to_string()));
    }
    Ok(())
  }

  async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, RuntimeError> {
    Ok(
      self
        .inner
        .lock()
        .unwrap()
        .volumes
        .values()
        .map(|v| VolumeSummary {
          name: v.name.clone(),
          driver: v.driver.clone().unwrap_or_default(),
          labels: v.labels.clone(),
        })
        .collect(),
    )
  }

  async fn exec_in_container(
    &self,
    container_id: &str,
    _cmd: Vec<String>,
    _tty: bool,
  ) -> Result<(ExecStream, ExecHandle), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    inner.next_exec_id += 1;
    let exec_id = format!("fake-exec-{}", inner.next_exec_id);
    let code = inner.queued_exec_exit_codes.pop_front().unwrap_or(0);
    let handle = ExecHandle { container_id: container_id.to_string(), exec_id: format!("{exec_id}:{code}") };
    let stream = Box::pin(stream::iter(Vec::new())) as Pin<Box<_>>;
    Ok((stream, handle))
  }

  async fn exec_exit_code(&self, handle: &ExecHandle) -> Result<Option<i64>, RuntimeError> {
    let code = handle
      .exec_id
      .rsplit(':')
      .next()
      .and_then(|s| s.parse::<i64>().ok())
      .unwrap_or(0);
    Ok(Some(code))
  }

  async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageSummary>, RuntimeError> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .images
        .values()
        .filter(|image| match filter.dangling {
          Some(dangling) => image.tags.is_empty() == dangling,
          None => true,
        })
        .cloned()
        .collect(),
    )
  }

  async fn remove_image(&self, reference: &str, force: bool) -> Result<(), RuntimeError> {
    let mut inner = self.inner.lock().unwrap();
    let by_id = inner.images.remove(reference).is_some();
    let removed = if by_id {
      true
    } else if let Some(id) = inner
      .images
      .iter()
      .find(|(_, image)| image.tags.iter().any(|t| t == reference))
      .map(|(id, _)| id.clone())
    {
      inner.images.remove(&id);
      true
    } else {
      false
    };
    if !removed && !force {
      return Err(RuntimeError::NotFound(reference.to_string()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn create_then_start_marks_running() {
    let runtime = FakeContainerRuntime::new();
    let spec = ContainerSpec { name: "test".to_string(), image: "alpine".to_string(), ..Default::default() };
    let id = runtime.create_container(&spec).await.unwrap();
    runtime.start_container(&id).await.unwrap();
    assert!(runtime.is_running(&id).await);
  }

  #[tokio::test]
  async fn forced_start_failure_fires_once() {
    let runtime = FakeContainerRuntime::new();
    let spec = ContainerSpec::default();
    let id = runtime.create_container(&spec).await.unwrap();
    runtime.fail_next_start(&id);
    assert!(runtime.start_container(&id).await.is_err());
    assert!(runtime.start_container(&id).await.is_ok());
  }

  #[tokio::test]
  async fn queued_exec_exit_code_is_reported() {
    let runtime = FakeContainerRuntime::new();
    runtime.queue_exec_exit_code(1);
    let (_, handle) = runtime.exec_in_container("c1", vec!["false".to_string()], false).await.unwrap();
    assert_eq!(runtime.exec_exit_code(&handle).await.unwrap(), Some(1));
  }

  #[tokio::test]
  async fn list_containers_filters_by_label() {
    let runtime = FakeContainerRuntime::new();
    let mut labels = std::collections::BTreeMap::new();
    labels.insert("helvetia.serviceId".to_string(), "svc-1".to_string());
    let spec = ContainerSpec { name: "c1".to_string(), labels, ..Default::default() };
    let id = runtime.create_container(&spec).await.unwrap();
    runtime.start_container(&id).await.unwrap();

    let found = runtime
      .list_containers(&ContainerFilter::by_label("helvetia.serviceId", "svc-1"))
      .await
      .unwrap();
    assert_eq!(found.len(), 1);

    let missing = runtime
      .list_containers(&ContainerFilter::by_label("helvetia.serviceId", "svc-2"))
      .await
      .unwrap();
    assert!(missing.is_empty());
  }
}
