//! Runtime: assembles every live connection the process needs — Docker
//! daemon, MongoDB, the Redis-backed status lock and queue, and the in-memory
//! log bus — behind the trait-object seams the rest of the crate is built
//! against. Built once in `main`, shared across tasks as `Arc<Runtime>`.

use std::sync::Arc;

use database::{DatabaseConfig, DeploymentStore, MongoStore, ServiceStore};
use docker::{BollardRuntime, ContainerRuntime};
use entities::WorkerConfig;
use lock::{RedisStatusLock, StatusLock};

use crate::logbus::LogBus;
use crate::queue::{DEPLOYMENTS_QUEUE, Queue, RedisQueue};

/// Every claim this process issues retries under the same worker id, so one
/// id is generated per process rather than per claim.
const QUEUE_MAX_ATTEMPTS: u32 = 5;

pub struct Runtime {
  pub runtime: Arc<dyn ContainerRuntime>,
  pub services: Arc<dyn ServiceStore>,
  pub deployments: Arc<dyn DeploymentStore>,
  pub lock: Arc<dyn StatusLock>,
  pub queue: Arc<dyn Queue>,
  pub logbus: Arc<LogBus>,
  pub config: Arc<WorkerConfig>,
}

impl Runtime {
  /// Connects every backing service named in `config`. Also requeues any
  /// jobs this worker id left stranded in its in-flight list from a prior
  /// crash, per the Queue Runtime's recoverable-crash contract.
  pub async fn connect(config: WorkerConfig) -> anyhow::Result<Self> {
    let runtime: Arc<dyn ContainerRuntime> = match &config.docker_host {
      Some(host) => Arc::new(BollardRuntime::connect_with_host(host)?),
      None => Arc::new(BollardRuntime::connect()?),
    };

    let database_config = DatabaseConfig {
      uri: config.database_url.clone(),
      app_name: "helvetia-worker".to_string(),
      db_name: "helvetia".to_string(),
      ..Default::default()
    };
    let store = Arc::new(MongoStore::new(&database_config).await?);
    let services: Arc<dyn ServiceStore> = store.clone();
    let deployments: Arc<dyn DeploymentStore> = store;

    let lock: Arc<dyn StatusLock> = Arc::new(RedisStatusLock::connect(&config.kv_store_url).await?);

    let worker_id = uuid::Uuid::new_v4().to_string();
    let redis_queue = RedisQueue::connect(&config.kv_store_url, worker_id, QUEUE_MAX_ATTEMPTS).await?;
    let recovered = redis_queue.recover_stuck(DEPLOYMENTS_QUEUE).await?;
    if recovered > 0 {
      tracing::warn!(recovered, queue = DEPLOYMENTS_QUEUE, "requeued jobs stranded by a prior crash");
    }
    let queue: Arc<dyn Queue> = Arc::new(redis_queue);

    Ok(Self {
      runtime,
      services,
      deployments,
      lock,
      queue,
      logbus: Arc::new(LogBus::new()),
      config: Arc::new(config),
    })
  }
}
