//! Prometheus registry for the Health & Metrics Surface: one
//! counter vector per job/deployment outcome and a gauge for in-flight
//! jobs, gathered into both the text-exposition and JSON views.

use std::sync::LazyLock;

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde_json::{Value, json};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static DEPLOYMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
  let counter = IntCounterVec::new(
    Opts::new("worker_deployments_total", "Deployments processed, by terminal status and service type"),
    &["status", "service_type"],
  )
  .expect("metric definition is valid");
  REGISTRY.register(Box::new(counter.clone())).expect("metric not yet registered");
  counter
});

static JOBS_PROCESSED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
  let counter = IntCounterVec::new(
    Opts::new("worker_jobs_processed_total", "Queue jobs processed, by job name and outcome"),
    &["job_name", "status"],
  )
  .expect("metric definition is valid");
  REGISTRY.register(Box::new(counter.clone())).expect("metric not yet registered");
  counter
});

static ACTIVE_JOBS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
  let gauge = IntGaugeVec::new(
    Opts::new("worker_active_jobs", "Jobs currently being executed, by job name"),
    &["job_name"],
  )
  .expect("metric definition is valid");
  REGISTRY.register(Box::new(gauge.clone())).expect("metric not yet registered");
  gauge
});

pub fn record_deployment(status: &str, service_type: &str) {
  DEPLOYMENTS_TOTAL.with_label_values(&[status, service_type]).inc();
}

pub fn record_job(job_name: &str, status: &str) {
  JOBS_PROCESSED_TOTAL.with_label_values(&[job_name, status]).inc();
}

pub fn set_active_jobs(job_name: &str, count: i64) {
  ACTIVE_JOBS.with_label_values(&[job_name]).set(count);
}

/// Prometheus text exposition format, as served by `GET /metrics`.
pub fn encode_text() -> anyhow::Result<String> {
  let encoder = TextEncoder::new();
  let families = REGISTRY.gather();
  let mut buffer = Vec::new();
  encoder.encode(&families, &mut buffer)?;
  Ok(String::from_utf8(buffer)?)
}

/// The same gathered families reshaped as JSON, as served by
/// `GET /metrics/json`.
pub fn encode_json() -> Value {
  let families = REGISTRY.gather();
  let metrics: Vec<Value> = families
    .iter()
    .map(|family| {
      let samples: Vec<Value> = family
        .get_metric()
        .iter()
        .map(|metric| {
          let labels: Value = metric
            .get_label()
            .iter()
            .map(|pair| (pair.name().to_string(), Value::String(pair.value().to_string())))
            .collect::<serde_json::Map<_, _>>()
            .into();
          let value = if metric.has_counter() {
            metric.get_counter().value()
          } else if metric.has_gauge() {
            metric.get_gauge().value()
          } else {
            0.0
          };
          json!({ "labels": labels, "value": value })
        })
        .collect();
      json!({
        "name": family.name(),
        "help": family.help(),
        "samples": samples,
      })
    })
    .collect();
  json!({ "metrics": metrics })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recorded_deployment_appears_in_text_exposition() {
    record_deployment("success", "DOCKER");
    let text = encode_text().unwrap();
    assert!(text.contains("worker_deployments_total"));
    assert!(text.contains("status=\"success\""));
  }

  #[test]
  fn recorded_job_appears_in_json_view() {
    record_job("deployments", "completed");
    let json = encode_json();
    let text = json.to_string();
    assert!(text.contains("worker_jobs_processed_total"));
    assert!(text.contains("deployments"));
  }

  #[test]
  fn active_jobs_gauge_reflects_last_set_value() {
    set_active_jobs("deployments", 3);
    let text = encode_text().unwrap();
    assert!(text.contains("worker_active_jobs"));
  }
}
