//! Cleanup Scheduler: a cron-driven sweep with two independent
//! phases — Service tombstone reaping and Image GC. Runs as its own task,
//! sequentially (one sweep completes before the next is scheduled), so
//! there is never more than one sweep touching the daemon at a time.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use docker::{ContainerFilter, ContainerRuntime, ContainerState, ImageFilter};
use database::{DeploymentStore, ServiceStore};
use entities::labels::{COMPOSE_PROJECT_LABEL, SERVICE_ID_LABEL};
use entities::sanitize::sanitize_name;
use entities::{Service, WorkerConfig};

use crate::error::WorkerError;
use crate::strategy::compose_project_name;

/// Tally of what one sweep did, returned so `main` can log it and tests can
/// assert on it without scraping log output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub services_reaped: usize,
  pub containers_removed: usize,
  pub volumes_removed: usize,
  pub images_removed: usize,
  pub errors: Vec<String>,
}

impl CleanupReport {
  fn merge(&mut self, other: CleanupReport) {
    self.services_reaped += other.services_reaped;
    self.containers_removed += other.containers_removed;
    self.volumes_removed += other.volumes_removed;
    self.images_removed += other.images_removed;
    self.errors.extend(other.errors);
  }
}

pub struct CleanupScheduler<'a> {
  pub runtime: &'a dyn ContainerRuntime,
  pub services: &'a dyn ServiceStore,
  pub deployments: &'a dyn DeploymentStore,
  pub config: &'a WorkerConfig,
}

impl<'a> CleanupScheduler<'a> {
  /// Runs sweeps forever on the configured cron schedule, sleeping until
  /// each next occurrence. Never returns except on an unrecoverable cron
  /// parse error, which startup validation (`WorkerConfig::validate`)
  /// should already have ruled out.
  pub async fn run_forever(&self) -> Result<(), WorkerError> {
    let cron = croner::Cron::new(&self.config.cleanup_cron)
      .parse()
      .map_err(|e| WorkerError::Cleanup(anyhow::anyhow!("invalid cleanup cron: {e}")))?;

    loop {
      let now = Utc::now();
      let next = cron
        .find_next_occurrence(&now, false)
        .map_err(|e| WorkerError::Cleanup(anyhow::anyhow!("failed to compute next cleanup run: {e}")))?;
      let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
      tracing::info!(next_run = %next, "cleanup scheduler sleeping until next sweep");
      tokio::time::sleep(delay).await;

      let report = self.run_once().await;
      if report.errors.is_empty() {
        tracing::info!(?report, "cleanup sweep completed");
      } else {
        tracing::warn!(?report, "cleanup sweep completed with errors");
      }
    }
  }

  /// One sweep: Phase A then Phase B, both best-effort — a failure in one
  /// service's reaping or one image's removal is logged and does not stop
  /// the rest of the sweep. Errors are aggregated into the report, never
  /// propagated as a hard failure of the scheduler.
  pub async fn run_once(&self) -> CleanupReport {
    let mut report = CleanupReport::default();
    report.merge(self.reap_tombstones().await);
    report.merge(self.gc_images().await);
    report
  }

  async fn reap_tombstones(&self) -> CleanupReport {
    let mut report = CleanupReport::default();
    let cutoff = Utc::now() - chrono::Duration::days(self.config.tombstone_grace_days);

    let tombstoned = match self.services.tombstoned_before(cutoff).await {
      Ok(services) => services,
      Err(e) => {
        report.errors.push(format!("failed to list tombstoned services: {e:#}"));
        return report;
      }
    };

    for service in tombstoned {
      self.reap_service(&service, &mut report).await;
    }

    report
  }

  async fn reap_service(&self, service: &Service, report: &mut CleanupReport) {
    let mut containers = match self
      .runtime
      .list_containers(&ContainerFilter::by_label(SERVICE_ID_LABEL, &service.id))
      .await
    {
      Ok(containers) => containers,
      Err(e) => {
        report.errors.push(format!("{}: failed to list containers: {e:#}", service.id));
        Vec::new()
      }
    };

    if service.r#type == entities::service::ServiceType::Compose {
      match self
        .runtime
        .list_containers(&ContainerFilter::by_label(
          COMPOSE_PROJECT_LABEL,
          compose_project_name(&service.name),
        ))
        .await
      {
        Ok(compose_containers) => {
          let seen: HashSet<String> = containers.iter().map(|c| c.id.clone()).collect();
          containers.extend(compose_containers.into_iter().filter(|c| !seen.contains(&c.id)));
        }
        Err(e) => report.errors.push(format!(
          "{}: failed to list compose containers: {e:#}",
          service.id
        )),
      }
    }

    for container in &containers {
      if let Err(e) = self.runtime.stop_container(&container.id, Duration::from_secs(5)).await {
        report.errors.push(format!("{}: failed to stop {}: {e:#}", service.id, container.id));
      }
      match self.runtime.remove_container(&container.id, true).await {
        Ok(()) => report.containers_removed += 1,
        Err(e) => report
          .errors
          .push(format!("{}: failed to remove {}: {e:#}", service.id, container.id)),
      }
    }

    self.remove_service_volumes(service, report).await;

    match self.deployments.list_for_service(&service.id).await {
      Ok(deployments) => {
        let mut distinct_tags: HashSet<String> = HashSet::new();
        for deployment in &deployments {
          if let Some(tag) = &deployment.image_tag {
            distinct_tags.insert(tag.clone());
          }
        }
        for tag in distinct_tags {
          match self.runtime.remove_image(&tag, true).await {
            Ok(()) => report.images_removed += 1,
            Err(e) => report.errors.push(format!("{}: failed to remove image {tag}: {e:#}", service.id)),
          }
        }
      }
      Err(e) => report.errors.push(format!("{}: failed to list deployments: {e:#}", service.id)),
    }

    if let Err(e) = self.deployments.delete_for_service(&service.id).await {
      report.errors.push(format!("{}: failed to delete deployments: {e:#}", service.id));
      return;
    }
    match self.services.hard_delete(&service.id).await {
      Ok(()) => report.services_reaped += 1,
      Err(e) => report.errors.push(format!("{}: failed to hard-delete service: {e:#}", service.id)),
    }
  }

  async fn remove_service_volumes(&self, service: &Service, report: &mut CleanupReport) {
    if service.r#type == entities::service::ServiceType::Compose {
      let volumes = match self.runtime.list_volumes().await {
        Ok(volumes) => volumes,
        Err(e) => {
          report.errors.push(format!("{}: failed to list volumes: {e:#}", service.id));
          return;
        }
      };
      let project = compose_project_name(&service.name);
      for volume in volumes.iter().filter(|v| v.labels.get(COMPOSE_PROJECT_LABEL) == Some(&project)) {
        match self.runtime.remove_volume(&volume.name, true).await {
          Ok(()) => report.volumes_removed += 1,
          Err(e) => report
            .errors
            .push(format!("{}: failed to remove volume {}: {e:#}", service.id, volume.name)),
        }
      }
      return;
    }

    if service.r#type.data_mount_path().is_some() {
      let name = format!("helvetia-data-{}", sanitize_name(&service.name));
      match self.runtime.remove_volume(&name, true).await {
        Ok(()) => report.volumes_removed += 1,
        Err(e) => report.errors.push(format!("{}: failed to remove volume {name}: {e:#}", service.id)),
      }
    }
  }

  async fn gc_images(&self) -> CleanupReport {
    let mut report = CleanupReport::default();

    if self.config.cleanup_dangling_images {
      match self.runtime.list_images(&ImageFilter { dangling: Some(true) }).await {
        Ok(images) => {
          for image in images {
            match self.runtime.remove_image(&image.id, true).await {
              Ok(()) => report.images_removed += 1,
              Err(e) => report.errors.push(format!("failed to remove dangling image {}: {e:#}", image.id)),
            }
          }
        }
        Err(e) => report.errors.push(format!("failed to list dangling images: {e:#}")),
      }
    }

    if self.config.cleanup_old_images {
      report.merge(self.gc_old_images().await);
    }

    report
  }

  async fn gc_old_images(&self) -> CleanupReport {
    let mut report = CleanupReport::default();

    let protected = match self.protected_image_tags().await {
      Ok(tags) => tags,
      Err(e) => {
        report.errors.push(format!("failed to compute protected image tags: {e:#}"));
        return report;
      }
    };

    let all_containers = match self
      .runtime
      .list_containers(&ContainerFilter { labels: Default::default(), all: true })
      .await
    {
      Ok(containers) => containers,
      Err(e) => {
        report.errors.push(format!("failed to list containers for image GC: {e:#}"));
        return report;
      }
    };
    let running_images: HashSet<String> = all_containers
      .into_iter()
      .filter(|c| c.state == ContainerState::Running)
      .map(|c| c.image)
      .collect();

    let images = match self.runtime.list_images(&ImageFilter { dangling: None }).await {
      Ok(images) => images,
      Err(e) => {
        report.errors.push(format!("failed to list images for GC: {e:#}"));
        return report;
      }
    };

    let cutoff = (Utc::now() - chrono::Duration::days(self.config.image_retention_days.into()))
      .timestamp();

    for image in images {
      if image.created_at >= cutoff {
        continue;
      }
      if image.tags.iter().any(|t| protected.contains(t) || running_images.contains(t)) {
        continue;
      }
      match self.runtime.remove_image(&image.id, true).await {
        Ok(()) => report.images_removed += 1,
        Err(e) => report.errors.push(format!("failed to remove aged image {}: {e:#}", image.id)),
      }
    }

    report
  }

  /// The latest SUCCESS deployment's image tag per service, never removed
  /// by age-based GC regardless of retention.
  async fn protected_image_tags(&self) -> anyhow::Result<HashSet<String>> {
    let successes = self.deployments.list_all_success().await?;
    let mut latest: HashMap<String, &entities::Deployment> = HashMap::new();
    for deployment in &successes {
      latest
        .entry(deployment.service_id.clone())
        .and_modify(|current| {
          if deployment.created_at > current.created_at {
            *current = deployment;
          }
        })
        .or_insert(deployment);
    }
    Ok(latest.into_values().filter_map(|d| d.image_tag.clone()).collect())
  }
}

#[cfg(test)]
mod tests {
  use database::testing::FakeStore;
  use docker::testing::FakeContainerRuntime;
  use entities::service::ServiceType;
  use entities::{Deployment, DeploymentStatus, ServiceStatus};

  use super::*;

  fn service(id: &str, r#type: ServiceType, deleted_days_ago: i64) -> Service {
    Service {
      id: id.to_string(),
      name: format!("svc-{id}"),
      r#type,
      status: ServiceStatus::Running,
      environment_id: String::new(),
      custom_domain: None,
      deleted_at: Some(Utc::now() - chrono::Duration::days(deleted_days_ago)),
      created_at: Utc::now(),
    }
  }

  fn deployment(id: &str, service_id: &str, status: DeploymentStatus, image_tag: Option<&str>) -> Deployment {
    Deployment {
      id: id.to_string(),
      service_id: service_id.to_string(),
      status,
      image_tag: image_tag.map(str::to_string),
      logs: String::new(),
      created_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn reaps_tombstoned_service_past_grace_and_leaves_fresh_one() {
    let runtime = FakeContainerRuntime::new();
    let store = FakeStore::default();
    let old = service("old", ServiceType::Postgres, 40);
    let fresh = service("fresh", ServiceType::Postgres, 1);
    store.services.lock().unwrap().insert(old.id.clone(), old.clone());
    store.services.lock().unwrap().insert(fresh.id.clone(), fresh.clone());
    store.deployments.lock().unwrap().insert(
      "dep-old".to_string(),
      deployment("dep-old", "old", DeploymentStatus::Success, Some("helvetia/old:latest")),
    );

    let mut labels = std::collections::BTreeMap::new();
    labels.insert(SERVICE_ID_LABEL.to_string(), "old".to_string());
    let spec = docker::ContainerSpec { name: "old-abc123".to_string(), labels, ..Default::default() };
    let id = runtime.create_container(&spec).await.unwrap();
    runtime.start_container(&id).await.unwrap();
    runtime
      .create_volume(&docker::VolumeSpec { name: "helvetia-data-svc-old".to_string(), ..Default::default() })
      .await
      .unwrap();

    let config = WorkerConfig::default();
    let scheduler = CleanupScheduler { runtime: &runtime, services: &store, deployments: &store, config: &config };

    let report = scheduler.run_once().await;
    assert_eq!(report.services_reaped, 1);
    assert_eq!(report.containers_removed, 1);
    assert_eq!(report.volumes_removed, 1);
    assert!(ServiceStore::get(&store, "old").await.is_err());
    assert!(ServiceStore::get(&store, "fresh").await.is_ok());
    assert!(runtime.list_container_names().await.is_empty());
    assert!(
      !runtime.list_volumes().await.unwrap().iter().any(|v| v.name == "helvetia-data-svc-old"),
      "service volume should have been removed on reaping"
    );
  }

  #[tokio::test]
  async fn dangling_images_are_removed_when_flag_enabled() {
    let runtime = FakeContainerRuntime::new();
    runtime.seed_image("img-dangling", Vec::new(), 0);
    let store = FakeStore::default();
    let config = WorkerConfig::default();
    let scheduler = CleanupScheduler { runtime: &runtime, services: &store, deployments: &store, config: &config };

    let report = scheduler.run_once().await;
    assert_eq!(report.images_removed, 1);
    assert!(!runtime.image_exists("img-dangling").await);
  }

  #[tokio::test]
  async fn old_image_referenced_by_latest_success_is_protected() {
    let runtime = FakeContainerRuntime::new();
    let old_ts = (Utc::now() - chrono::Duration::days(30)).timestamp();
    runtime.seed_image("img-protected", vec!["helvetia/app:latest".to_string()], old_ts);
    runtime.seed_image("img-stale", vec!["helvetia/app:old".to_string()], old_ts);

    let store = FakeStore::default();
    store.deployments.lock().unwrap().insert(
      "dep-1".to_string(),
      deployment("dep-1", "svc-1", DeploymentStatus::Success, Some("helvetia/app:latest")),
    );

    let config = WorkerConfig::default();
    let scheduler = CleanupScheduler { runtime: &runtime, services: &store, deployments: &store, config: &config };

    let report = scheduler.run_once().await;
    assert!(runtime.image_exists("img-protected").await);
    assert!(!runtime.image_exists("img-stale").await);
    assert_eq!(report.images_removed, 1);
  }
}
