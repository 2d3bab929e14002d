//! Distributed Status Lock: lease-based mutual exclusion over a
//! shared key-value store, keyed by service id. Used exclusively around the
//! final database write that flips a Service's status.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use uuid::Uuid;

const DELETE_IF_EQUAL_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

#[derive(Debug, Error)]
pub enum LockError {
  #[error("lock store error: {0}")]
  Store(#[from] redis::RedisError),

  #[error("failed to acquire lock for '{0}' after {1} attempts")]
  AcquisitionExhausted(String, u32),
}

/// Tuning knobs: TTL bounded `[1s, 60s]`, retry count and jittered backoff
/// bounded `[50ms, 5000ms]` / `[0ms, 1000ms]`.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
  pub ttl: Duration,
  pub max_retries: u32,
  pub base_delay: Duration,
  pub jitter: Duration,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(10),
      max_retries: 10,
      base_delay: Duration::from_millis(200),
      jitter: Duration::from_millis(100),
    }
  }
}

/// A held lease, released on `drop` best-effort but ideally via an explicit
/// `release` call so release errors are observable.
pub struct Lease {
  key: String,
  token: String,
}

/// A lock store keyed by service id. Implementations must guarantee that
/// acquisition is atomic (`SET key token NX PX ttl`) and release only
/// succeeds when the caller still holds the token (delete-if-equal).
#[async_trait]
pub trait StatusLock: Send + Sync {
  async fn try_acquire(
    &self,
    service_id: &str,
    ttl: Duration,
  ) -> Result<Option<Lease>, LockError>;

  async fn release(&self, lease: &Lease) -> Result<bool, LockError>;
}

/// Acquires the lease with retry-with-jitter, runs `f`, and releases the
/// lease afterward regardless of `f`'s outcome. Mirrors a scoped `withLock`
/// helper rather than exposing acquire/release as separate calls.
pub async fn with_lock<L, F, Fut, T, E>(
  lock: &L,
  service_id: &str,
  config: LockConfig,
  f: F,
) -> Result<T, E>
where
  L: StatusLock + ?Sized,
  F: FnOnce() -> Fut,
  Fut: std::future::Future<Output = Result<T, E>>,
  E: From<LockError>,
{
  let lease = acquire_with_retry(lock, service_id, config).await?;
  let result = f().await;
  if let Err(e) = lock.release(&lease).await {
    tracing::warn!(service_id, error = %e, "failed to release status lock");
  }
  result
}

async fn acquire_with_retry<L: StatusLock + ?Sized>(
  lock: &L,
  service_id: &str,
  config: LockConfig,
) -> Result<Lease, LockError> {
  for attempt in 0..config.max_retries {
    if let Some(lease) = lock.try_acquire(service_id, config.ttl).await? {
      return Ok(lease);
    }
    let jitter_ms = rand::rng().random_range(0..=config.jitter.as_millis() as u64);
    let delay = config.base_delay + Duration::from_millis(jitter_ms);
    tracing::debug!(service_id, attempt, delay_ms = delay.as_millis() as u64, "lock busy, retrying");
    tokio::time::sleep(delay).await;
  }
  Err(LockError::AcquisitionExhausted(service_id.to_string(), config.max_retries))
}

/// Redis-backed `StatusLock`: `status:lock:<serviceId>` holding a UUIDv4
/// token, acquired with `SET NX PX` and released with a delete-if-equal Lua
/// script so a lease can never be released by a worker that no longer holds
/// it (e.g. after its TTL expired and another worker took over).
pub struct RedisStatusLock {
  conn: ConnectionManager,
  delete_if_equal: redis::Script,
}

impl RedisStatusLock {
  pub async fn connect(url: &str) -> Result<Self, LockError> {
    let client = redis::Client::open(url)?;
    let conn = client.get_connection_manager().await?;
    Ok(Self { conn, delete_if_equal: redis::Script::new(DELETE_IF_EQUAL_SCRIPT) })
  }

  fn key(service_id: &str) -> String {
    format!("status:lock:{service_id}")
  }
}

#[async_trait]
impl StatusLock for RedisStatusLock {
  async fn try_acquire(
    &self,
    service_id: &str,
    ttl: Duration,
  ) -> Result<Option<Lease>, LockError> {
    let key = Self::key(service_id);
    let token = Uuid::new_v4().to_string();
    let mut conn = self.conn.clone();
    let acquired: bool = redis::cmd("SET")
      .arg(&key)
      .arg(&token)
      .arg("NX")
      .arg("PX")
      .arg(ttl.as_millis() as u64)
      .query_async::<Option<String>>(&mut conn)
      .await?
      .is_some();
    if acquired {
      Ok(Some(Lease { key, token }))
    } else {
      Ok(None)
    }
  }

  async fn release(&self, lease: &Lease) -> Result<bool, LockError> {
    let mut conn = self.conn.clone();
    let deleted: i64 = self
      .delete_if_equal
      .key(&lease.key)
      .arg(&lease.token)
      .invoke_async(&mut conn)
      .await?;
    Ok(deleted == 1)
  }
}

/// In-memory `StatusLock` for orchestrator and integration tests — no Redis
/// needed. Public (not `#[cfg(test)]`) so downstream crates' test suites can
/// use it too.
pub mod testing {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct FakeStatusLock {
    held: Mutex<HashMap<String, String>>,
  }

  impl FakeStatusLock {
    pub fn is_empty(&self) -> bool {
      self.held.lock().unwrap().is_empty()
    }
  }

  #[async_trait]
  impl StatusLock for FakeStatusLock {
    async fn try_acquire(
      &self,
      service_id: &str,
      _ttl: Duration,
    ) -> Result<Option<Lease>, LockError> {
      let key = format!("status:lock:{service_id}");
      let mut held = self.held.lock().unwrap();
      if held.contains_key(&key) {
        return Ok(None);
      }
      let token = Uuid::new_v4().to_string();
      held.insert(key.clone(), token.clone());
      Ok(Some(Lease { key, token }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool, LockError> {
      let mut held = self.held.lock().unwrap();
      if held.get(&lease.key) == Some(&lease.token) {
        held.remove(&lease.key);
        Ok(true)
      } else {
        Ok(false)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::FakeStatusLock;
  use super::*;

  #[tokio::test]
  async fn with_lock_runs_body_exactly_once_and_releases() {
    let lock = FakeStatusLock::default();
    let mut ran = 0;
    let result: Result<(), LockError> =
      with_lock(&lock, "svc-1", LockConfig::default(), || async {
        ran += 1;
        Ok(())
      })
      .await;
    assert!(result.is_ok());
    assert_eq!(ran, 1);
    assert!(lock.is_empty());
  }

  #[tokio::test]
  async fn second_acquire_fails_while_held() {
    let lock = FakeStatusLock::default();
    let lease = lock.try_acquire("svc-1", Duration::from_secs(10)).await.unwrap();
    assert!(lease.is_some());
    let second = lock.try_acquire("svc-1", Duration::from_secs(10)).await.unwrap();
    assert!(second.is_none());
  }

  #[tokio::test]
  async fn release_is_noop_if_token_does_not_match() {
    let lock = FakeStatusLock::default();
    let lease = lock.try_acquire("svc-1", Duration::from_secs(10)).await.unwrap().unwrap();
    let forged = Lease { key: lease.key.clone(), token: "not-the-token".to_string() };
    let released = lock.release(&forged).await.unwrap();
    assert!(!released);
    // Original lease can still release.
    assert!(lock.release(&lease).await.unwrap());
  }

  #[tokio::test]
  async fn acquire_exhausts_and_errors_when_always_busy() {
    struct AlwaysBusy;
    #[async_trait]
    impl StatusLock for AlwaysBusy {
      async fn try_acquire(
        &self,
        _service_id: &str,
        _ttl: Duration,
      ) -> Result<Option<Lease>, LockError> {
        Ok(None)
      }
      async fn release(&self, _lease: &Lease) -> Result<bool, LockError> {
        Ok(true)
      }
    }
    let config = LockConfig {
      max_retries: 2,
      base_delay: Duration::from_millis(1),
      jitter: Duration::from_millis(1),
      ttl: Duration::from_secs(1),
    };
    let result = acquire_with_retry(&AlwaysBusy, "svc-1", config).await;
    assert!(matches!(result, Err(LockError::AcquisitionExhausted(_, 2))));
  }
}
