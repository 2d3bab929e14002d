//! Log Bus: a per-deployment fan-out of raw log chunks to anyone
//! currently streaming that deployment's output. The bus keeps no history —
//! a subscriber that joins after a chunk was published never sees it. The
//! orchestrator, not the bus, accumulates the blob it eventually persists.
//!
//! Grounded on the broadcast-channel-per-deployment shape of a build-log
//! manager, minus the history buffer that shape usually carries.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

pub struct LogBus {
  channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for LogBus {
  fn default() -> Self {
    Self::new()
  }
}

impl LogBus {
  pub fn new() -> Self {
    Self { channels: Mutex::new(HashMap::new()) }
  }

  /// Publishes a chunk to any live subscribers of `deployment_id`. A no-op
  /// (not an error) when nobody is listening.
  pub fn publish(&self, deployment_id: &str, chunk: impl Into<String>) {
    let channels = self.channels.lock().unwrap();
    if let Some(sender) = channels.get(deployment_id) {
      let _ = sender.send(chunk.into());
    }
  }

  /// Subscribes to future chunks for `deployment_id`, creating the topic if
  /// it doesn't exist yet. The returned receiver only sees chunks published
  /// after this call.
  pub fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<String> {
    let mut channels = self.channels.lock().unwrap();
    channels
      .entry(deployment_id.to_string())
      .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
      .subscribe()
  }

  /// Drops the topic once a deployment reaches a terminal state and its log
  /// blob has been persisted. Any subscriber still holding a receiver keeps
  /// it — dropping the sender just ends their stream.
  pub fn close(&self, deployment_id: &str) {
    self.channels.lock().unwrap().remove(deployment_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn late_subscriber_does_not_see_past_chunks() {
    let bus = LogBus::new();
    bus.publish("dep-1", "chunk before subscribe");
    let mut rx = bus.subscribe("dep-1");
    bus.publish("dep-1", "chunk after subscribe");
    assert_eq!(rx.recv().await.unwrap(), "chunk after subscribe");
  }

  #[tokio::test]
  async fn publish_with_no_subscribers_does_not_panic() {
    let bus = LogBus::new();
    bus.publish("dep-none", "nobody is listening");
  }

  #[tokio::test]
  async fn multiple_subscribers_each_receive_published_chunks() {
    let bus = LogBus::new();
    let mut rx1 = bus.subscribe("dep-1");
    let mut rx2 = bus.subscribe("dep-1");
    bus.publish("dep-1", "hello");
    assert_eq!(rx1.recv().await.unwrap(), "hello");
    assert_eq!(rx2.recv().await.unwrap(), "hello");
  }

  #[tokio::test]
  async fn close_ends_stream_for_existing_subscriber() {
    let bus = LogBus::new();
    let mut rx = bus.subscribe("dep-1");
    bus.close("dep-1");
    assert!(rx.recv().await.is_err());
  }
}
