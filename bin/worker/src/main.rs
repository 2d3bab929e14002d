#[macro_use]
extern crate tracing;

mod cleanup;
mod cli;
mod config;
mod error;
mod health;
mod logbus;
mod metrics;
mod orchestrator;
mod queue;
mod runtime;
mod strategy;
mod util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use entities::job::DeploymentJob;
use tokio::sync::watch;

use crate::cleanup::CleanupScheduler;
use crate::health::HealthState;
use crate::orchestrator::Orchestrator;
use crate::queue::{DEPLOYMENTS_QUEUE, Queue};
use crate::runtime::Runtime;

const CLAIM_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs every background task — deployment workers, the cleanup scheduler,
/// the health/metrics surface — until `shutdown` is signaled, then lets them
/// drain in-flight work and returns.
async fn app(runtime: Arc<Runtime>, shutdown: watch::Receiver<bool>) {
  let health_state = match HealthState::new(&runtime.config.kv_store_url, DEPLOYMENTS_QUEUE, runtime.queue.clone()) {
    Ok(state) => Arc::new(state),
    Err(e) => {
      error!("failed to build health state: {e:#}");
      return;
    }
  };
  health::spawn(runtime.config.health_port, health_state.clone()).await;

  let cleanup_handle = tokio::spawn({
    let runtime = runtime.clone();
    let mut shutdown = shutdown.clone();
    async move {
      let scheduler = CleanupScheduler {
        runtime: &*runtime.runtime,
        services: &*runtime.services,
        deployments: &*runtime.deployments,
        config: &runtime.config,
      };
      tokio::select! {
        result = scheduler.run_forever() => {
          if let Err(e) = result {
            error!("cleanup scheduler exited: {e:#}");
          }
        }
        _ = shutdown.changed() => {}
      }
    }
  });

  let mut workers = Vec::with_capacity(runtime.config.deployment_concurrency);
  for worker_index in 0..runtime.config.deployment_concurrency {
    workers.push(tokio::spawn(run_deployment_worker(
      worker_index,
      runtime.clone(),
      health_state.clone(),
      shutdown.clone(),
    )));
  }

  for worker in workers {
    let _ = worker.await;
  }
  cleanup_handle.abort();
}

/// Claims and processes `deployments` jobs one at a time until shutdown is
/// signaled. Each worker carries its own claim loop rather than sharing one,
/// so `deployment_concurrency` jobs can build in parallel.
#[tracing::instrument(skip(runtime, health_state, shutdown))]
async fn run_deployment_worker(
  worker_index: usize,
  runtime: Arc<Runtime>,
  health_state: Arc<HealthState>,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    if *shutdown.borrow() {
      return;
    }

    let claimed = tokio::select! {
      claimed = runtime.queue.claim(DEPLOYMENTS_QUEUE, CLAIM_TIMEOUT) => claimed,
      _ = shutdown.changed() => continue,
    };
    let job = match claimed {
      Ok(Some(job)) => job,
      Ok(None) => continue,
      Err(e) => {
        warn!(worker_index, error = %e, "failed to claim from deployments queue, backing off");
        tokio::time::sleep(Duration::from_secs(1)).await;
        continue;
      }
    };

    let parsed: DeploymentJob = match serde_json::from_str(&job.payload) {
      Ok(parsed) => parsed,
      Err(e) => {
        error!(worker_index, error = %e, "dropping unparseable deployment job");
        let _ = runtime.queue.ack(&job).await;
        continue;
      }
    };
    let service_type = parsed.r#type.to_string();

    metrics::set_active_jobs("deployments", 1);
    let orchestrator = Orchestrator {
      runtime: &*runtime.runtime,
      services: &*runtime.services,
      deployments: &*runtime.deployments,
      lock: &*runtime.lock,
      logbus: &runtime.logbus,
      config: &runtime.config,
    };
    let result = orchestrator.process(&parsed).await;
    metrics::set_active_jobs("deployments", 0);

    match &result {
      Ok(()) => {
        metrics::record_deployment("success", &service_type);
        metrics::record_job("deployments", "completed");
        health_state.record_completed();
        if let Err(e) = runtime.queue.ack(&job).await {
          error!(worker_index, error = %e, "failed to ack completed job");
        }
      }
      Err(e) => {
        metrics::record_deployment("failed", &service_type);
        health_state.record_failed();
        if e.is_retryable() {
          metrics::record_job("deployments", "retried");
          if let Err(nack_err) = runtime.queue.nack(&job).await {
            error!(worker_index, error = %nack_err, "failed to nack job");
          }
        } else {
          metrics::record_job("deployments", "failed");
          if let Err(ack_err) = runtime.queue.ack(&job).await {
            error!(worker_index, error = %ack_err, "failed to ack non-retryable failed job");
          }
        }
      }
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = config::load().context("failed to load worker configuration")?;
  if let Err(errors) = config.validate() {
    for err in &errors {
      eprintln!("invalid worker configuration: {err}");
    }
    anyhow::bail!("worker configuration failed validation ({} error(s))", errors.len());
  }
  logger::init(&config.logging)?;

  info!("Helvetia worker version: v{}", env!("CARGO_PKG_VERSION"));

  let shutdown_grace = Duration::from_secs(config.shutdown_grace_seconds);
  let runtime = Arc::new(Runtime::connect(config).await.context("failed to connect worker runtime")?);
  let (shutdown_tx, shutdown_rx) = watch::channel(false);

  let app_handle = tokio::spawn(app(runtime, shutdown_rx));

  let mut term_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
  tokio::select! {
    _ = term_signal.recv() => info!("received SIGTERM, starting graceful shutdown"),
    _ = tokio::signal::ctrl_c() => info!("received ctrl-c, starting graceful shutdown"),
  }
  let _ = shutdown_tx.send(true);

  if tokio::time::timeout(shutdown_grace, app_handle).await.is_err() {
    warn!("graceful shutdown grace period elapsed, exiting anyway");
  }

  Ok(())
}
