//! Build Strategies: one per `ServiceType`, sharing the
//! `canHandle`/`deploy` contract and the ephemeral builder-container
//! lifecycle in [`builder_container`].

pub mod builder_container;
mod compose;
mod database;
mod docker_service;
mod static_site;

use async_trait::async_trait;
use entities::job::DeploymentJob;
use entities::service::ServiceType;
use entities::Log;
use docker::ContainerRuntime;
use scrub::Scrubber;

use crate::error::WorkerError;

pub use compose::{compose_project_name, ComposeDeploymentStrategy};
pub use database::DatabaseDeploymentStrategy;
pub use docker_service::DockerDeploymentStrategy;
pub use static_site::StaticDeploymentStrategy;

/// Resolves the `COMPOSE-DONE`/`SWAP` branch of the orchestrator's state
/// machine without string-sniffing a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
  /// The orchestrator must still perform the labeled blue/green swap.
  Swapped,
  /// The strategy already attached routing labels to its own containers
  /// (compose); the orchestrator must not create a replacement.
  ComposeManaged,
}

#[derive(Debug, Clone)]
pub struct StrategyOutput {
  pub image_tag: String,
  pub outcome: BuildOutcome,
}

/// Callback the orchestrator hands to a strategy for recording build
/// output: append to the accumulation buffer and publish to the Log Bus.
/// Plain `Fn`, not `FnMut` — strategies may call it concurrently with the
/// builder's read-side stream.
pub type LogRecorder<'a> = dyn Fn(Log) + Send + Sync + 'a;

pub struct BuildContext<'a> {
  pub job: &'a DeploymentJob,
  pub runtime: &'a dyn ContainerRuntime,
  pub scrubber: &'a Scrubber,
  pub docker_host: Option<&'a str>,
  pub uses_socket_proxy: bool,
  pub platform_domain: &'a str,
  pub container_memory_limit_bytes: i64,
  pub container_cpu_nanocpus: i64,
  pub recorder: &'a LogRecorder<'a>,
}

#[async_trait]
pub trait BuildStrategy: Send + Sync {
  fn can_handle(&self, service_type: ServiceType) -> bool;

  /// The Dockerfile fragment this strategy would synthesize for `job`, if
  /// any — used by VALIDATE to run the Dockerfile Validator before SNAPSHOT,
  /// well before a builder container exists. `None` for strategies that
  /// never synthesize one (compose, database, a pre-built image reference).
  fn synthesized_dockerfile(&self, _job: &DeploymentJob) -> Option<String> {
    None
  }

  async fn deploy(&self, ctx: &BuildContext<'_>) -> Result<StrategyOutput, WorkerError>;
}

/// `factory.get(type)` — every type in the enumerated set resolves to a
/// strategy; there is no "unknown string" case here because `ServiceType`
/// is a closed enum, so exhaustiveness is enforced
/// by the compiler rather than at runtime.
pub fn resolve(service_type: ServiceType) -> Box<dyn BuildStrategy> {
  if service_type.is_database() {
    return Box::new(DatabaseDeploymentStrategy);
  }
  match service_type {
    ServiceType::Docker => Box::new(DockerDeploymentStrategy),
    ServiceType::Static => Box::new(StaticDeploymentStrategy),
    ServiceType::Compose => Box::new(ComposeDeploymentStrategy),
    _ => unreachable!("database types are handled above"),
  }
}
