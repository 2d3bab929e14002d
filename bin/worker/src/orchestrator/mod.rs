//! Deployment Orchestrator: the per-job state machine —
//! `VALIDATE → SNAPSHOT → BUILD → (COMPOSE-DONE ∥ SWAP) → COMMIT → done`,
//! with `RECOVER` on any failure after `SNAPSHOT`.

use std::sync::Mutex;
use std::time::Duration;

use docker::{ContainerFilter, ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};
use database::{DeploymentStore, ServiceStore};
use entities::job::DeploymentJob;
use entities::labels::{RoutingContext, SERVICE_ID_LABEL};
use entities::sanitize::sanitize_name;
use entities::{Log, ServiceStatus, WorkerConfig};
use lock::{LockConfig, StatusLock, with_lock};
use scrub::Scrubber;

use crate::error::{WorkerError, classify_runtime_error};
use crate::logbus::LogBus;
use crate::strategy::{self, BuildContext, BuildOutcome};
use crate::util::random_suffix;

const SWAP_STOP_GRACE: Duration = Duration::from_secs(5);

/// Holds the dependency seams a job needs, borrowed for the duration of one
/// `process` call — never a process-global singleton.
pub struct Orchestrator<'a> {
  pub runtime: &'a dyn ContainerRuntime,
  pub services: &'a dyn ServiceStore,
  pub deployments: &'a dyn DeploymentStore,
  pub lock: &'a dyn StatusLock,
  pub logbus: &'a LogBus,
  pub config: &'a WorkerConfig,
}

impl<'a> Orchestrator<'a> {
  #[tracing::instrument(skip(self, job), fields(deployment_id = %job.deployment_id, service_id = %job.service_id))]
  pub async fn process(&self, job: &DeploymentJob) -> Result<(), WorkerError> {
    let validation = validate::validate_env_vars(&job.env_vars);
    if !validation.valid {
      return Err(WorkerError::Validation(validation.errors.join("; ")));
    }

    let build_strategy = strategy::resolve(job.r#type);
    if let Some(dockerfile) = build_strategy.synthesized_dockerfile(job) {
      let validation = validate::validate_dockerfile(&dockerfile);
      if !validation.valid {
        return Err(WorkerError::Validation(validation.errors.join("; ")));
      }
    }

    self
      .deployments
      .set_building(&job.deployment_id)
      .await
      .map_err(WorkerError::InfrastructureFatal)?;
    self
      .services
      .set_status(&job.service_id, ServiceStatus::Building)
      .await
      .map_err(WorkerError::InfrastructureFatal)?;

    let rollback_set = self
      .runtime
      .list_containers(&ContainerFilter::by_label(SERVICE_ID_LABEL, &job.service_id))
      .await
      .map_err(classify_runtime_error)?;

    let logs: Mutex<Vec<Log>> = Mutex::new(Vec::new());
    let replacement_id: Mutex<Option<String>> = Mutex::new(None);

    let result = self.build_and_swap(job, build_strategy.as_ref(), &logs, &replacement_id).await;

    match result {
      Ok((image_tag, log_blob)) => self.commit_success(job, &image_tag, &log_blob).await,
      Err(err) => {
        let rendered = render_logs(&logs);
        self
          .recover(job, &rollback_set, replacement_id.into_inner().unwrap(), &err, &rendered)
          .await;
        Err(err)
      }
    }
  }

  async fn build_and_swap(
    &self,
    job: &DeploymentJob,
    build_strategy: &dyn strategy::BuildStrategy,
    logs: &Mutex<Vec<Log>>,
    replacement_id: &Mutex<Option<String>>,
  ) -> Result<(String, String), WorkerError> {
    let scrubber = Scrubber::new(job.secret_values());
    let deployment_id = job.deployment_id.clone();
    let recorder = |log: Log| {
      self.logbus.publish(&deployment_id, log.render());
      logs.lock().unwrap().push(log);
    };

    let ctx = BuildContext {
      job,
      runtime: self.runtime,
      scrubber: &scrubber,
      docker_host: self.config.docker_host.as_deref(),
      uses_socket_proxy: self.config.uses_socket_proxy(),
      platform_domain: &self.config.platform_domain,
      container_memory_limit_bytes: self.config.container_memory_limit_bytes,
      container_cpu_nanocpus: self.config.container_cpu_nanocpus,
      recorder: &recorder,
    };

    let output = build_strategy.deploy(&ctx).await?;

    if output.outcome == BuildOutcome::Swapped {
      self.swap(job, &output.image_tag, replacement_id).await?;
    }

    let log_blob = entities::log::normalize_log_blob(&render_logs(logs), self.config.max_log_size_chars);
    Ok((output.image_tag, log_blob))
  }

  /// 4b. SWAP: create the replacement, start it, **then** stop/remove every
  /// other container bearing the service label. `new_started ≺ old_stopped`
  /// is the ordering invariant — the replacement is recorded in
  /// `replacement_id` the moment it's created, so RECOVER can tear it down
  /// even if this function fails partway through.
  async fn swap(
    &self,
    job: &DeploymentJob,
    image_tag: &str,
    replacement_id: &Mutex<Option<String>>,
  ) -> Result<(), WorkerError> {
    let suffix = random_suffix();
    let name = format!("{}-{suffix}", sanitize_name(&job.service_name));

    let routing = RoutingContext {
      service_id: job.service_id.clone(),
      service_type: job.r#type,
      service_name: job.service_name.clone(),
      username: job.username.clone(),
      project_name: job.project_name.clone(),
      environment_name: job.environment_name.clone(),
      platform_domain: self.config.platform_domain.clone(),
      custom_domain: job.custom_domain.clone(),
      port: job.port,
    };

    let mut binds: Vec<String> = job
      .volumes
      .iter()
      .map(|v| format!("{}:{}", v.source, v.target))
      .collect();
    if let Some(mount) = job.r#type.data_mount_path() {
      binds.push(format!("helvetia-data-{}:{mount}", sanitize_name(&job.service_name)));
    }

    let env = job.env_vars.iter().map(|v| format!("{}={}", v.variable, v.value)).collect();

    let spec = ContainerSpec {
      name: name.clone(),
      image: image_tag.to_string(),
      env,
      labels: routing.labels(),
      binds,
      network: Some("helvetia-net".to_string()),
      memory_limit_bytes: Some(self.config.container_memory_limit_bytes),
      nano_cpus: Some(self.config.container_cpu_nanocpus),
      restart_policy: Some("always".to_string()),
      ..Default::default()
    };

    let container_id =
      self.runtime.create_container(&spec).await.map_err(classify_runtime_error)?;
    *replacement_id.lock().unwrap() = Some(container_id.clone());
    self.runtime.start_container(&container_id).await.map_err(classify_runtime_error)?;

    let existing = self
      .runtime
      .list_containers(&ContainerFilter::by_label(SERVICE_ID_LABEL, &job.service_id))
      .await
      .map_err(classify_runtime_error)?;

    for old in existing.into_iter().filter(|c| !c.name.contains(&suffix)) {
      if let Err(err) = self.runtime.stop_container(&old.id, SWAP_STOP_GRACE).await {
        tracing::warn!(container = %old.id, error = %err, "failed to stop old container during swap");
      }
      if let Err(err) = self.runtime.remove_container(&old.id, true).await {
        tracing::warn!(container = %old.id, error = %err, "failed to remove old container during swap");
      }
    }

    Ok(())
  }

  async fn commit_success(
    &self,
    job: &DeploymentJob,
    image_tag: &str,
    logs: &str,
  ) -> Result<(), WorkerError> {
    self
      .deployments
      .commit_success(&job.deployment_id, image_tag, logs)
      .await
      .map_err(WorkerError::InfrastructureFatal)?;

    let service_id = job.service_id.clone();
    with_lock(self.lock, &job.service_id, self.lock_config(), || async move {
      self
        .services
        .set_status(&service_id, ServiceStatus::Running)
        .await
        .map_err(WorkerError::InfrastructureFatal)
    })
    .await
  }

  /// 6. RECOVER: tear down any replacement, attempt to restart every
  /// container in the rollback set, then write the terminal status.
  /// Rollback failures are logged and never rethrown over the original
  /// error.
  async fn recover(
    &self,
    job: &DeploymentJob,
    rollback_set: &[ContainerSummary],
    replacement_id: Option<String>,
    err: &WorkerError,
    accumulated_log: &str,
  ) {
    if let Some(id) = replacement_id {
      if let Err(e) = self.runtime.stop_container(&id, SWAP_STOP_GRACE).await {
        tracing::warn!(container = %id, error = %e, "failed to stop replacement container during recovery");
      }
      if let Err(e) = self.runtime.remove_container(&id, true).await {
        tracing::warn!(container = %id, error = %e, "failed to remove replacement container during recovery");
      }
    }

    let mut any_restarted = false;
    for container in rollback_set {
      match self.runtime.inspect_container(&container.id).await {
        Ok(inspect) if inspect.state == ContainerState::Running => any_restarted = true,
        Ok(_) => match self.runtime.start_container(&container.id).await {
          Ok(()) => any_restarted = true,
          Err(e) => {
            tracing::warn!(container = %container.id, error = %e, "rollback restart failed")
          }
        },
        Err(e) => tracing::warn!(container = %container.id, error = %e, "rollback inspect failed"),
      }
    }

    let blob = format!("=== DEPLOYMENT FAILURE ===\n{err}\n\n{accumulated_log}");
    let log_blob = entities::log::normalize_log_blob(&blob, self.config.max_log_size_chars);

    if let Err(e) = self.deployments.commit_failure(&job.deployment_id, &log_blob).await {
      tracing::error!(deployment_id = %job.deployment_id, error = %e, "failed to persist deployment failure");
    }

    let final_status = if any_restarted { ServiceStatus::Running } else { ServiceStatus::Failed };
    let service_id = job.service_id.clone();
    let lock_result: Result<(), WorkerError> =
      with_lock(self.lock, &job.service_id, self.lock_config(), || async move {
        self
          .services
          .set_status(&service_id, final_status)
          .await
          .map_err(WorkerError::InfrastructureFatal)
      })
      .await;
    if let Err(e) = lock_result {
      tracing::error!(service_id = %job.service_id, error = %e, "failed to write recovered service status");
    }
  }

  fn lock_config(&self) -> LockConfig {
    LockConfig {
      ttl: Duration::from_secs(self.config.lock_ttl_seconds),
      max_retries: self.config.lock_max_retries,
      base_delay: Duration::from_millis(self.config.lock_base_delay_ms),
      jitter: Duration::from_millis(self.config.lock_jitter_ms),
    }
  }
}

fn render_logs(logs: &Mutex<Vec<Log>>) -> String {
  logs.lock().unwrap().iter().map(Log::render).collect()
}

#[cfg(test)]
mod tests {
  use database::testing::FakeStore;
  use docker::testing::FakeContainerRuntime;
  use entities::{DeploymentStatus, EnvironmentVar, VolumeMount};
  use lock::testing::FakeStatusLock;

  use super::*;

  fn job(service_id: &str, deployment_id: &str) -> DeploymentJob {
    DeploymentJob {
      deployment_id: deployment_id.to_string(),
      service_id: service_id.to_string(),
      service_name: "my-app".to_string(),
      r#type: entities::service::ServiceType::Docker,
      repo_url: "ghcr.io/acme/prebuilt".to_string(),
      branch: "main".to_string(),
      build_command: String::new(),
      start_command: "node server.js".to_string(),
      static_output_dir: String::new(),
      compose_file: String::new(),
      main_service: String::new(),
      port: 3000,
      env_vars: vec![EnvironmentVar::new("TOKEN", "hunter2")],
      volumes: Vec::<VolumeMount>::new(),
      custom_domain: None,
      project_name: String::new(),
      environment_name: String::new(),
      username: String::new(),
    }
  }

  fn store_with(service: entities::Service, deployment: entities::Deployment) -> FakeStore {
    let store = FakeStore::default();
    store.services.lock().unwrap().insert(service.id.clone(), service);
    store.deployments.lock().unwrap().insert(deployment.id.clone(), deployment);
    store
  }

  fn service(id: &str) -> entities::Service {
    entities::Service {
      id: id.to_string(),
      name: "my-app".to_string(),
      r#type: entities::service::ServiceType::Docker,
      status: entities::ServiceStatus::Pending,
      environment_id: String::new(),
      custom_domain: None,
      deleted_at: None,
      created_at: chrono::Utc::now(),
    }
  }

  fn deployment(id: &str, service_id: &str) -> entities::Deployment {
    entities::Deployment {
      id: id.to_string(),
      service_id: service_id.to_string(),
      status: entities::DeploymentStatus::Pending,
      image_tag: None,
      logs: String::new(),
      created_at: chrono::Utc::now(),
    }
  }

  #[tokio::test]
  async fn successful_job_commits_and_sets_running() {
    let runtime = FakeContainerRuntime::new();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let job = job("svc-1", "dep-1");
    orchestrator.process(&job).await.unwrap();

    let service = ServiceStore::get(&store, "svc-1").await.unwrap();
    assert_eq!(service.status, entities::ServiceStatus::Running);
    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Success);
    assert!(!recorded.logs.contains("hunter2"), "secret leaked into log blob");
    assert!(lock.is_empty());
  }

  #[tokio::test]
  async fn build_failure_recovers_and_marks_deployment_failed() {
    let runtime = FakeContainerRuntime::new();
    runtime.fail_next_pull();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let job = job("svc-1", "dep-1");
    let result = orchestrator.process(&job).await;
    assert!(result.is_err());

    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Failed);
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Failed);
    assert!(lock.is_empty());
  }

  /// VALIDATE must reject an invalid synthesized Dockerfile fragment before
  /// SNAPSHOT — no status write, no builder container, no deployment log.
  #[tokio::test]
  async fn dockerfile_validation_failure_never_reaches_snapshot() {
    let runtime = FakeContainerRuntime::new();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let mut job = job("svc-1", "dep-1");
    job.repo_url = "https://github.com/test/repo".to_string();
    job.port = 0;

    let result = orchestrator.process(&job).await;
    assert!(matches!(result, Err(WorkerError::Validation(_))));
    assert!(runtime.list_container_names().await.is_empty());

    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Pending);
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Pending);
  }

  /// S1: a static-site job must never reach `startCommand`, and its
  /// replacement container carries the traefik host rule and port label.
  #[tokio::test]
  async fn static_site_job_attaches_host_routing_labels() {
    let runtime = FakeContainerRuntime::new();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let mut job = job("svc-1", "dep-1");
    job.service_name = "my-static-site".to_string();
    job.r#type = entities::service::ServiceType::Static;
    job.repo_url = "https://github.com/test/repo".to_string();
    job.branch = "prod".to_string();
    job.build_command = "npm run build:prod".to_string();
    job.static_output_dir = "dist/sigil/browser".to_string();
    job.start_command = "should never be read".to_string();
    job.port = 80;

    orchestrator.process(&job).await.unwrap();

    let replacement = runtime
      .list_containers(&ContainerFilter::by_label(SERVICE_ID_LABEL, "svc-1"))
      .await
      .unwrap();
    assert_eq!(replacement.len(), 1);
    let labels = &replacement[0].labels;
    assert!(
      labels.values().any(|v| v.contains("Host(`my-static-site.helvetia.cloud`)")),
      "missing host rule in {labels:?}"
    );
    assert!(
      labels.values().any(|v| v == "80"),
      "missing loadbalancer port label in {labels:?}"
    );

    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.image_tag.as_deref(), Some("helvetia/my-static-site:latest"));
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Running);
  }

  /// S2: compose manages its own containers, so the orchestrator must
  /// never create a replacement for a compose-managed job.
  #[tokio::test]
  async fn compose_job_never_creates_a_replacement_container() {
    let runtime = FakeContainerRuntime::new();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let mut job = job("svc-1", "dep-1");
    job.service_name = "my-compose-app".to_string();
    job.r#type = entities::service::ServiceType::Compose;
    job.repo_url = "https://github.com/test/compose-repo".to_string();
    job.branch = "main".to_string();
    job.compose_file = "compose.prod.yml".to_string();
    job.main_service = "web".to_string();

    orchestrator.process(&job).await.unwrap();

    assert!(runtime.list_container_names().await.is_empty());
    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Success);
    assert_eq!(recorded.image_tag.as_deref(), Some("compose:my-compose-app"));
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Running);
  }

  /// S3: a build failure with a non-empty rollback set must never touch
  /// the pre-existing containers, and the failure log must carry the
  /// fixed header the dashboard greps for.
  #[tokio::test]
  async fn build_failure_with_existing_containers_leaves_them_running() {
    let runtime = FakeContainerRuntime::new();
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(SERVICE_ID_LABEL.to_string(), "svc-1".to_string());
    let old_a = runtime
      .create_container(&ContainerSpec { name: "my-app-aaa111".to_string(), labels: labels.clone(), ..Default::default() })
      .await
      .unwrap();
    let old_b = runtime
      .create_container(&ContainerSpec { name: "my-app-bbb222".to_string(), labels, ..Default::default() })
      .await
      .unwrap();
    runtime.start_container(&old_a).await.unwrap();
    runtime.start_container(&old_b).await.unwrap();
    runtime.fail_next_pull();

    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let result = orchestrator.process(&job("svc-1", "dep-1")).await;
    assert!(result.is_err());

    assert!(runtime.is_running(&old_a).await);
    assert!(runtime.is_running(&old_b).await);

    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Failed);
    assert!(recorded.logs.starts_with("=== DEPLOYMENT FAILURE ==="));
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Running);
  }

  /// S4: the new container is created but fails to start; it must be
  /// force-removed and the rollback set restarted (here: left running).
  #[tokio::test]
  async fn start_failure_force_removes_replacement_and_keeps_old_running() {
    let runtime = FakeContainerRuntime::new();
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(SERVICE_ID_LABEL.to_string(), "svc-1".to_string());
    let old = runtime
      .create_container(&ContainerSpec { name: "my-app-old1".to_string(), labels, ..Default::default() })
      .await
      .unwrap();
    runtime.start_container(&old).await.unwrap();
    runtime.fail_next_container_start();

    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let result = orchestrator.process(&job("svc-1", "dep-1")).await;
    assert!(result.is_err());

    assert!(runtime.is_running(&old).await);
    let remaining = runtime
      .list_containers(&ContainerFilter::by_label(SERVICE_ID_LABEL, "svc-1"))
      .await
      .unwrap();
    assert_eq!(remaining.len(), 1, "replacement container should have been force-removed");
    assert_eq!(remaining[0].id, old);

    let recorded = DeploymentStore::get(&store, "dep-1").await.unwrap();
    assert_eq!(recorded.status, DeploymentStatus::Failed);
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Running);
  }

  /// S5: two jobs targeting the same service racing to commit must never
  /// run their commits concurrently, must never leave the lock held, and
  /// must never leave behind a container without the service-id label.
  #[tokio::test]
  async fn concurrent_deploys_on_one_service_serialize_at_commit() {
    let runtime = FakeContainerRuntime::new();
    let store = store_with(service("svc-1"), deployment("dep-1", "svc-1"));
    store.deployments.lock().unwrap().insert("dep-2".to_string(), deployment("dep-2", "svc-1"));
    let lock = FakeStatusLock::default();
    let logbus = LogBus::new();
    let config = WorkerConfig::default();

    let orchestrator = Orchestrator {
      runtime: &runtime,
      services: &store,
      deployments: &store,
      lock: &lock,
      logbus: &logbus,
      config: &config,
    };

    let job_a = job("svc-1", "dep-1");
    let job_b = job("svc-1", "dep-2");
    let (result_a, result_b) = tokio::join!(orchestrator.process(&job_a), orchestrator.process(&job_b));
    assert!(result_a.is_ok());
    assert!(result_b.is_ok());

    assert!(lock.is_empty(), "status lock must not be left held after both jobs finish");
    assert_eq!(ServiceStore::get(&store, "svc-1").await.unwrap().status, entities::ServiceStatus::Running);

    let everything = runtime
      .list_containers(&docker::ContainerFilter { labels: Default::default(), all: true })
      .await
      .unwrap();
    assert!(
      everything.iter().all(|c| c.labels.contains_key(SERVICE_ID_LABEL)),
      "every surviving container must carry the service-id label"
    );
  }
}
