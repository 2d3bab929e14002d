//! Typed MongoDB access for the two persisted entities: Service and
//! Deployment. A `Client` wrapper (typed `Collection<T>` fields obtained
//! from `mungos`/`mongo_indexed`), narrowed to the worker's contracts and
//! wrapped behind `ServiceStore`/`DeploymentStore` traits so
//! the orchestrator can be tested against an in-memory fake.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use entities::{Deployment, DeploymentStatus, Service, ServiceStatus};
use mongo_indexed::create_unique_index;
use mungos::{
  init::MongoBuilder,
  mongodb::{Collection, Database, bson::doc},
};

/// Connection parameters for the backing MongoDB instance, mirroring the
/// teacher's `DatabaseConfig` shape.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
  pub uri: String,
  pub address: String,
  pub username: String,
  pub password: String,
  pub app_name: String,
  pub db_name: String,
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
  async fn get(&self, id: &str) -> anyhow::Result<Service>;
  async fn set_status(&self, id: &str, status: ServiceStatus) -> anyhow::Result<()>;
  async fn set_custom_domain(
    &self,
    id: &str,
    domain: Option<String>,
  ) -> anyhow::Result<()>;
  /// Services soft-deleted at least `grace` ago.
  async fn tombstoned_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> anyhow::Result<Vec<Service>>;
  async fn hard_delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
  async fn get(&self, id: &str) -> anyhow::Result<Deployment>;
  async fn create_pending(&self, deployment: &Deployment) -> anyhow::Result<()>;
  async fn set_building(&self, id: &str) -> anyhow::Result<()>;
  async fn commit_success(
    &self,
    id: &str,
    image_tag: &str,
    logs: &str,
  ) -> anyhow::Result<()>;
  async fn commit_failure(&self, id: &str, logs: &str) -> anyhow::Result<()>;
  /// Every deployment ever recorded for a service, used by the Cleanup
  /// Scheduler to collect distinct image tags and the latest SUCCESS
  /// deployment.
  async fn list_for_service(&self, service_id: &str) -> anyhow::Result<Vec<Deployment>>;
  async fn delete_for_service(&self, service_id: &str) -> anyhow::Result<()>;
  /// Every successful deployment across every service, used by Image GC
  /// (Phase B) to find each service's latest successful image tag without
  /// needing a full service listing.
  async fn list_all_success(&self) -> anyhow::Result<Vec<Deployment>>;
}

/// Live MongoDB-backed store, wrapping a single `Database` handle rather
/// than a separate `Collection<T>` field per entity.
#[derive(Debug, Clone)]
pub struct MongoStore {
  services: Collection<Service>,
  deployments: Collection<Deployment>,
}

impl MongoStore {
  pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
    let db = connect(config).await?;
    Self::from_database(db).await
  }

  pub async fn from_database(db: Database) -> anyhow::Result<Self> {
    let services = db.collection::<Service>("Service");
    create_unique_index(&services, "name").await?;

    let deployments = db.collection::<Deployment>("Deployment");

    Ok(Self { services, deployments })
  }
}

#[async_trait]
impl ServiceStore for MongoStore {
  async fn get(&self, id: &str) -> anyhow::Result<Service> {
    self
      .services
      .find_one(doc! { "id": id })
      .await
      .context("failed to query service")?
      .ok_or_else(|| anyhow!("no service found with id '{id}'"))
  }

  async fn set_status(&self, id: &str, status: ServiceStatus) -> anyhow::Result<()> {
    self
      .services
      .update_one(
        doc! { "id": id },
        doc! { "$set": { "status": status.to_string() } },
      )
      .await
      .context("failed to update service status")?;
    Ok(())
  }

  async fn set_custom_domain(
    &self,
    id: &str,
    domain: Option<String>,
  ) -> anyhow::Result<()> {
    let update = match domain {
      Some(domain) => doc! { "$set": { "custom_domain": domain } },
      None => doc! { "$unset": { "custom_domain": "" } },
    };
    self
      .services
      .update_one(doc! { "id": id }, update)
      .await
      .context("failed to update service custom domain")?;
    Ok(())
  }

  async fn tombstoned_before(
    &self,
    cutoff: chrono::DateTime<chrono::Utc>,
  ) -> anyhow::Result<Vec<Service>> {
    use mungos::find::find_collect;
    use mungos::mongodb::bson::DateTime as BsonDateTime;

    let filter = doc! {
      "deleted_at": { "$ne": null, "$lte": BsonDateTime::from_chrono(cutoff) }
    };
    find_collect(&self.services, filter, None)
      .await
      .context("failed to query tombstoned services")
  }

  async fn hard_delete(&self, id: &str) -> anyhow::Result<()> {
    self
      .services
      .delete_one(doc! { "id": id })
      .await
      .context("failed to hard-delete service")?;
    Ok(())
  }
}

#[async_trait]
impl DeploymentStore for MongoStore {
  async fn get(&self, id: &str) -> anyhow::Result<Deployment> {
    self
      .deployments
      .find_one(doc! { "id": id })
      .await
      .context("failed to query deployment")?
      .ok_or_else(|| anyhow!("no deployment found with id '{id}'"))
  }

  async fn create_pending(&self, deployment: &Deployment) -> anyhow::Result<()> {
    self
      .deployments
      .insert_one(deployment)
      .await
      .context("failed to insert pending deployment")?;
    Ok(())
  }

  async fn set_building(&self, id: &str) -> anyhow::Result<()> {
    self
      .deployments
      .update_one(
        doc! { "id": id },
        doc! { "$set": { "status": DeploymentStatus::Building.to_string() } },
      )
      .await
      .context("failed to mark deployment building")?;
    Ok(())
  }

  async fn commit_success(
    &self,
    id: &str,
    image_tag: &str,
    logs: &str,
  ) -> anyhow::Result<()> {
    self
      .deployments
      .update_one(
        doc! { "id": id },
        doc! { "$set": {
          "status": DeploymentStatus::Success.to_string(),
          "image_tag": image_tag,
          "logs": logs,
        } },
      )
      .await
      .context("failed to commit deployment success")?;
    Ok(())
  }

  async fn commit_failure(&self, id: &str, logs: &str) -> anyhow::Result<()> {
    self
      .deployments
      .update_one(
        doc! { "id": id },
        doc! { "$set": {
          "status": DeploymentStatus::Failed.to_string(),
          "logs": logs,
        } },
      )
      .await
      .context("failed to commit deployment failure")?;
    Ok(())
  }

  async fn list_for_service(&self, service_id: &str) -> anyhow::Result<Vec<Deployment>> {
    use mungos::find::find_collect;
    find_collect(&self.deployments, doc! { "service_id": service_id }, None)
      .await
      .context("failed to query deployments for service")
  }

  async fn delete_for_service(&self, service_id: &str) -> anyhow::Result<()> {
    self
      .deployments
      .delete_many(doc! { "service_id": service_id })
      .await
      .context("failed to delete deployments for service")?;
    Ok(())
  }

  async fn list_all_success(&self) -> anyhow::Result<Vec<Deployment>> {
    use mungos::find::find_collect;
    find_collect(
      &self.deployments,
      doc! { "status": DeploymentStatus::Success.to_string() },
      None,
    )
    .await
    .context("failed to query successful deployments")
  }
}

/// Opens the Mongo connection: a URI takes priority, otherwise address +
/// username + password.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Database> {
  let mut client = MongoBuilder::default().app_name(&config.app_name);

  match (
    !config.uri.is_empty(),
    !config.address.is_empty(),
    !config.username.is_empty(),
    !config.password.is_empty(),
  ) {
    (true, _, _, _) => {
      client = client.uri(&config.uri);
    }
    (_, true, true, true) => {
      client = client
        .address(&config.address)
        .username(&config.username)
        .password(&config.password);
    }
    (_, true, _, _) => {
      client = client.address(&config.address);
    }
    _ => {
      return Err(anyhow!(
        "database config is incomplete: provide either 'uri', or 'address' + 'username' + 'password'"
      ));
    }
  }

  let client = client
    .build()
    .await
    .context("failed to initialize database connection")?;

  Ok(client.database(&config.db_name))
}

pub mod testing {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// In-memory store for orchestrator/cleanup-scheduler tests.
  #[derive(Default)]
  pub struct FakeStore {
    pub services: Mutex<HashMap<String, Service>>,
    pub deployments: Mutex<HashMap<String, Deployment>>,
  }

  #[async_trait]
  impl ServiceStore for FakeStore {
    async fn get(&self, id: &str) -> anyhow::Result<Service> {
      self
        .services
        .lock()
        .unwrap()
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("no service found with id '{id}'"))
    }

    async fn set_status(
      &self,
      id: &str,
      status: ServiceStatus,
    ) -> anyhow::Result<()> {
      let mut services = self.services.lock().unwrap();
      let service = services
        .get_mut(id)
        .ok_or_else(|| anyhow!("no service found with id '{id}'"))?;
      service.status = status;
      Ok(())
    }

    async fn set_custom_domain(
      &self,
      id: &str,
      domain: Option<String>,
    ) -> anyhow::Result<()> {
      let mut services = self.services.lock().unwrap();
      let service = services
        .get_mut(id)
        .ok_or_else(|| anyhow!("no service found with id '{id}'"))?;
      service.custom_domain = domain;
      Ok(())
    }

    async fn tombstoned_before(
      &self,
      cutoff: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<Service>> {
      Ok(
        self
          .services
          .lock()
          .unwrap()
          .values()
          .filter(|s| s.deleted_at.is_some_and(|at| at <= cutoff))
          .cloned()
          .collect(),
      )
    }

    async fn hard_delete(&self, id: &str) -> anyhow::Result<()> {
      self.services.lock().unwrap().remove(id);
      Ok(())
    }
  }

  #[async_trait]
  impl DeploymentStore for FakeStore {
    async fn get(&self, id: &str) -> anyhow::Result<Deployment> {
      self
        .deployments
        .lock()
        .unwrap()
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("no deployment found with id '{id}'"))
    }

    async fn create_pending(&self, deployment: &Deployment) -> anyhow::Result<()> {
      self
        .deployments
        .lock()
        .unwrap()
        .insert(deployment.id.clone(), deployment.clone());
      Ok(())
    }

    async fn set_building(&self, id: &str) -> anyhow::Result<()> {
      let mut deployments = self.deployments.lock().unwrap();
      let deployment = deployments
        .get_mut(id)
        .ok_or_else(|| anyhow!("no deployment found with id '{id}'"))?;
      deployment.status = DeploymentStatus::Building;
      Ok(())
    }

    async fn commit_success(
      &self,
      id: &str,
      image_tag: &str,
      logs: &str,
    ) -> anyhow::Result<()> {
      let mut deployments = self.deployments.lock().unwrap();
      let deployment = deployments
        .get_mut(id)
        .ok_or_else(|| anyhow!("no deployment found with id '{id}'"))?;
      deployment.status = DeploymentStatus::Success;
      deployment.image_tag = Some(image_tag.to_string());
      deployment.logs = logs.to_string();
      Ok(())
    }

    async fn commit_failure(&self, id: &str, logs: &str) -> anyhow::Result<()> {
      let mut deployments = self.deployments.lock().unwrap();
      let deployment = deployments
        .get_mut(id)
        .ok_or_else(|| anyhow!("no deployment found with id '{id}'"))?;
      deployment.status = DeploymentStatus::Failed;
      deployment.logs = logs.to_string();
      Ok(())
    }

    async fn list_for_service(&self, service_id: &str) -> anyhow::Result<Vec<Deployment>> {
      Ok(
        self
          .deployments
          .lock()
          .unwrap()
          .values()
          .filter(|d| d.service_id == service_id)
          .cloned()
          .collect(),
      )
    }

    async fn delete_for_service(&self, service_id: &str) -> anyhow::Result<()> {
      self.deployments.lock().unwrap().retain(|_, d| d.service_id != service_id);
      Ok(())
    }

    async fn list_all_success(&self) -> anyhow::Result<Vec<Deployment>> {
      Ok(
        self
          .deployments
          .lock()
          .unwrap()
          .values()
          .filter(|d| d.status == DeploymentStatus::Success)
          .cloned()
          .collect(),
      )
    }
  }
}
