//! Queue Runtime wire model: `deployments` and `service-cleanup`
//! are Redis lists addressed through this trait, so a future broker swap
//! never touches orchestrator code.
//!
//! `claim` performs a reliable hand-off (`BLMOVE` from the queue list into
//! an in-flight list keyed by worker id) so a crash mid-job leaves the job
//! recoverable by restart-time requeueing of anything still sitting in the
//! in-flight list. `nack` requeues subject to a small max-attempt counter
//! carried in an envelope distinct from the job payload itself.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

/// The two queue names. Kept here, next to the wire model they address,
/// rather than duplicated at each call site.
pub const DEPLOYMENTS_QUEUE: &str = "deployments";
pub const SERVICE_CLEANUP_QUEUE: &str = "service-cleanup";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEnvelope {
  attempt: u32,
  payload: String,
}

/// A job handed back by `claim`, carrying enough to `ack`/`nack` it later.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
  pub queue: String,
  pub payload: String,
  pub attempt: u32,
  raw: String,
}

/// Queue depth snapshot for the Health surface: `waiting` is the
/// main list length, `active` the in-flight list length for this worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
  pub waiting: u64,
  pub active: u64,
}

#[async_trait]
pub trait Queue: Send + Sync {
  async fn enqueue(&self, queue: &str, payload: &str) -> anyhow::Result<()>;

  /// Blocks up to `timeout` for a job. Returns `None` on timeout, not an
  /// error — an empty queue is the expected steady state.
  async fn claim(
    &self,
    queue: &str,
    timeout: Duration,
  ) -> anyhow::Result<Option<ClaimedJob>>;

  async fn ack(&self, job: &ClaimedJob) -> anyhow::Result<()>;

  /// Requeues the job with its attempt counter incremented, unless the
  /// job has exhausted `max_attempts`, in which case it is dropped from
  /// the in-flight list and not retried.
  async fn nack(&self, job: &ClaimedJob) -> anyhow::Result<()>;

  async fn depth(&self, queue: &str) -> anyhow::Result<QueueDepth>;
}

pub struct RedisQueue {
  conn: ConnectionManager,
  worker_id: String,
  max_attempts: u32,
}

impl RedisQueue {
  pub async fn connect(
    url: &str,
    worker_id: impl Into<String>,
    max_attempts: u32,
  ) -> anyhow::Result<Self> {
    let client = redis::Client::open(url)?;
    let conn = client.get_connection_manager().await?;
    Ok(Self { conn, worker_id: worker_id.into(), max_attempts })
  }

  fn queue_key(queue: &str) -> String {
    format!("queue:{queue}")
  }

  fn in_flight_key(&self, queue: &str) -> String {
    format!("queue:{queue}:inflight:{}", self.worker_id)
  }

  /// Jobs left in this worker's in-flight list from a previous, crashed
  /// run. Callers should requeue these once at startup.
  pub async fn recover_stuck(&self, queue: &str) -> anyhow::Result<usize> {
    let mut conn = self.conn.clone();
    let in_flight = self.in_flight_key(queue);
    let main = Self::queue_key(queue);
    let mut moved = 0;
    loop {
      let raw: Option<String> = conn.rpoplpush(&in_flight, &main).await?;
      if raw.is_none() {
        break;
      }
      moved += 1;
    }
    Ok(moved)
  }
}

#[async_trait]
impl Queue for RedisQueue {
  async fn enqueue(&self, queue: &str, payload: &str) -> anyhow::Result<()> {
    let envelope = QueueEnvelope { attempt: 0, payload: payload.to_string() };
    let json = serde_json::to_string(&envelope)?;
    let mut conn = self.conn.clone();
    conn.rpush::<_, _, ()>(Self::queue_key(queue), json).await?;
    Ok(())
  }

  async fn claim(
    &self,
    queue: &str,
    timeout: Duration,
  ) -> anyhow::Result<Option<ClaimedJob>> {
    let mut conn = self.conn.clone();
    let raw: Option<String> = redis::cmd("BLMOVE")
      .arg(Self::queue_key(queue))
      .arg(self.in_flight_key(queue))
      .arg("LEFT")
      .arg("RIGHT")
      .arg(timeout.as_secs_f64().max(0.0))
      .query_async(&mut conn)
      .await?;
    let Some(raw) = raw else {
      return Ok(None);
    };
    let envelope: QueueEnvelope = serde_json::from_str(&raw)?;
    Ok(Some(ClaimedJob {
      queue: queue.to_string(),
      payload: envelope.payload,
      attempt: envelope.attempt,
      raw,
    }))
  }

  async fn ack(&self, job: &ClaimedJob) -> anyhow::Result<()> {
    let mut conn = self.conn.clone();
    conn
      .lrem::<_, _, ()>(self.in_flight_key(&job.queue), 1, &job.raw)
      .await?;
    Ok(())
  }

  async fn nack(&self, job: &ClaimedJob) -> anyhow::Result<()> {
    let mut conn = self.conn.clone();
    conn
      .lrem::<_, _, ()>(self.in_flight_key(&job.queue), 1, &job.raw)
      .await?;

    if job.attempt + 1 >= self.max_attempts {
      tracing::warn!(
        queue = %job.queue,
        attempt = job.attempt,
        "job exhausted retry budget, dropping"
      );
      return Ok(());
    }

    let envelope =
      QueueEnvelope { attempt: job.attempt + 1, payload: job.payload.clone() };
    let json = serde_json::to_string(&envelope)?;
    conn.rpush::<_, _, ()>(Self::queue_key(&job.queue), json).await?;
    Ok(())
  }

  async fn depth(&self, queue: &str) -> anyhow::Result<QueueDepth> {
    let mut conn = self.conn.clone();
    let waiting: u64 = conn.llen(Self::queue_key(queue)).await?;
    let active: u64 = conn.llen(self.in_flight_key(queue)).await?;
    Ok(QueueDepth { waiting, active })
  }
}

/// In-memory `Queue` for orchestrator and integration tests.
pub mod testing {
  use std::collections::{HashMap, VecDeque};
  use std::sync::Mutex;

  use super::*;

  #[derive(Default)]
  pub struct FakeQueue {
    queues: Mutex<HashMap<String, VecDeque<QueueEnvelope>>>,
    max_attempts: u32,
  }

  impl FakeQueue {
    pub fn new(max_attempts: u32) -> Self {
      Self { queues: Mutex::default(), max_attempts }
    }

    pub fn len(&self, queue: &str) -> usize {
      self.queues.lock().unwrap().get(queue).map_or(0, VecDeque::len)
    }
  }

  #[async_trait]
  impl Queue for FakeQueue {
    async fn enqueue(&self, queue: &str, payload: &str) -> anyhow::Result<()> {
      self
        .queues
        .lock()
        .unwrap()
        .entry(queue.to_string())
        .or_default()
        .push_back(QueueEnvelope { attempt: 0, payload: payload.to_string() });
      Ok(())
    }

    async fn claim(
      &self,
      queue: &str,
      _timeout: Duration,
    ) -> anyhow::Result<Option<ClaimedJob>> {
      let envelope =
        self.queues.lock().unwrap().get_mut(queue).and_then(VecDeque::pop_front);
      Ok(envelope.map(|envelope| ClaimedJob {
        queue: queue.to_string(),
        payload: envelope.payload.clone(),
        attempt: envelope.attempt,
        raw: serde_json::to_string(&envelope).unwrap(),
      }))
    }

    async fn ack(&self, _job: &ClaimedJob) -> anyhow::Result<()> {
      Ok(())
    }

    async fn nack(&self, job: &ClaimedJob) -> anyhow::Result<()> {
      if job.attempt + 1 >= self.max_attempts {
        return Ok(());
      }
      self
        .queues
        .lock()
        .unwrap()
        .entry(job.queue.clone())
        .or_default()
        .push_back(QueueEnvelope {
          attempt: job.attempt + 1,
          payload: job.payload.clone(),
        });
      Ok(())
    }

    async fn depth(&self, queue: &str) -> anyhow::Result<QueueDepth> {
      Ok(QueueDepth { waiting: self.len(queue) as u64, active: 0 })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::FakeQueue;
  use super::*;

  #[tokio::test]
  async fn claim_returns_none_on_empty_queue() {
    let queue = FakeQueue::new(3);
    let claimed = queue.claim("deployments", Duration::from_millis(1)).await.unwrap();
    assert!(claimed.is_none());
  }

  #[tokio::test]
  async fn enqueue_then_claim_roundtrips_payload() {
    let queue = FakeQueue::new(3);
    queue.enqueue("deployments", "job-1").await.unwrap();
    let claimed =
      queue.claim("deployments", Duration::from_millis(1)).await.unwrap().unwrap();
    assert_eq!(claimed.payload, "job-1");
    assert_eq!(claimed.attempt, 0);
  }

  #[tokio::test]
  async fn nack_requeues_with_incremented_attempt_until_budget_exhausted() {
    let queue = FakeQueue::new(2);
    queue.enqueue("deployments", "job-1").await.unwrap();
    let first = queue.claim("deployments", Duration::from_millis(1)).await.unwrap().unwrap();
    assert_eq!(first.attempt, 0);
    queue.nack(&first).await.unwrap();

    let second = queue.claim("deployments", Duration::from_millis(1)).await.unwrap().unwrap();
    assert_eq!(second.attempt, 1);
    queue.nack(&second).await.unwrap();

    let third = queue.claim("deployments", Duration::from_millis(1)).await.unwrap();
    assert!(third.is_none(), "job should have been dropped after exhausting retry budget");
  }

  #[tokio::test]
  async fn depth_reports_waiting_jobs() {
    let queue = FakeQueue::new(3);
    queue.enqueue("deployments", "job-1").await.unwrap();
    queue.enqueue("deployments", "job-2").await.unwrap();
    let depth = queue.depth("deployments").await.unwrap();
    assert_eq!(depth.waiting, 2);
    assert_eq!(depth.active, 0);
  }
}
