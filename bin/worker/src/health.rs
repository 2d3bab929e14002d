//! Health & Metrics Surface: a single read-only HTTP server exposing
//! `GET /health`, `GET /metrics`, `GET /metrics/json`. Binding is best
//! effort — if the configured port is already in use the surface is
//! disabled with a warning and the worker keeps running.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;

use crate::metrics;
use crate::queue::{Queue, QueueDepth};

pub struct HealthState {
  start: Instant,
  redis_client: redis::Client,
  queue_name: String,
  queue: Arc<dyn Queue>,
  completed: AtomicU64,
  failed: AtomicU64,
}

impl HealthState {
  pub fn new(redis_url: &str, queue_name: impl Into<String>, queue: Arc<dyn Queue>) -> anyhow::Result<Self> {
    Ok(Self {
      start: Instant::now(),
      redis_client: redis::Client::open(redis_url)?,
      queue_name: queue_name.into(),
      queue,
      completed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
    })
  }

  pub fn record_completed(&self) {
    self.completed.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_failed(&self) {
    self.failed.fetch_add(1, Ordering::Relaxed);
  }

  async fn redis_connected(&self) -> bool {
    match self.redis_client.get_multiplexed_async_connection().await {
      Ok(mut conn) => {
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
      }
      Err(_) => false,
    }
  }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct RedisHealth {
  connected: bool,
  status: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct QueueHealth {
  name: String,
  waiting: u64,
  active: u64,
  completed: u64,
  failed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct HealthResponse {
  status: String,
  uptime: u64,
  redis: RedisHealth,
  queue: QueueHealth,
  timestamp: i64,
}

/// Pure assembly of the response body, kept separate from the handler so it
/// can be unit-tested without a live Redis connection or HTTP round-trip.
fn build_response(
  redis_connected: bool,
  uptime: u64,
  queue_name: &str,
  depth: QueueDepth,
  completed: u64,
  failed: u64,
) -> (StatusCode, HealthResponse) {
  let healthy = redis_connected;
  let body = HealthResponse {
    status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
    uptime,
    redis: RedisHealth {
      connected: redis_connected,
      status: if redis_connected { "ok" } else { "unreachable" }.to_string(),
    },
    queue: QueueHealth {
      name: queue_name.to_string(),
      waiting: depth.waiting,
      active: depth.active,
      completed,
      failed,
    },
    timestamp: chrono::Utc::now().timestamp(),
  };
  let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
  (status_code, body)
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
  let redis_connected = state.redis_connected().await;
  let depth = state.queue.depth(&state.queue_name).await.unwrap_or_default();
  let (status_code, body) = build_response(
    redis_connected,
    state.start.elapsed().as_secs(),
    &state.queue_name,
    depth,
    state.completed.load(Ordering::Relaxed),
    state.failed.load(Ordering::Relaxed),
  );
  (status_code, Json(body))
}

async fn metrics_handler() -> impl IntoResponse {
  match metrics::encode_text() {
    Ok(body) => (StatusCode::OK, body),
    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {e:#}")),
  }
}

async fn metrics_json_handler() -> impl IntoResponse {
  Json(metrics::encode_json())
}

pub fn router(state: Arc<HealthState>) -> Router {
  Router::new()
    .route("/health", get(health_handler))
    .route("/metrics", get(metrics_handler))
    .route("/metrics/json", get(metrics_json_handler))
    .with_state(state)
}

/// Binds the health server, or logs a warning and returns `None` if the
/// port is already taken — this surface is informational, never worth
/// crashing the worker over.
pub async fn spawn(port: u16, state: Arc<HealthState>) -> Option<tokio::task::JoinHandle<()>> {
  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = match tokio::net::TcpListener::bind(addr).await {
    Ok(listener) => listener,
    Err(e) => {
      tracing::warn!(port, error = %e, "health/metrics port unavailable, surface disabled");
      return None;
    }
  };
  tracing::info!(%addr, "health/metrics surface listening");
  let app = router(state);
  Some(tokio::spawn(async move {
    if let Err(e) = axum::serve(listener, app).await {
      tracing::warn!(error = %e, "health/metrics server exited");
    }
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unhealthy_when_redis_disconnected() {
    let (status, body) =
      build_response(false, 42, "deployments", QueueDepth { waiting: 3, active: 1 }, 10, 2);
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.status, "unhealthy");
    assert!(!body.redis.connected);
  }

  #[test]
  fn healthy_when_redis_connected_reports_queue_depth() {
    let (status, body) =
      build_response(true, 100, "deployments", QueueDepth { waiting: 0, active: 2 }, 50, 1);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "healthy");
    assert_eq!(body.queue.active, 2);
    assert_eq!(body.queue.completed, 50);
    assert_eq!(body.queue.failed, 1);
    assert_eq!(body.uptime, 100);
  }
}
