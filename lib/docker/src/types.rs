use std::collections::{BTreeMap, HashMap};

/// What to create a container from`).
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
  pub name: String,
  pub image: String,
  pub env: Vec<String>,
  pub labels: BTreeMap<String, String>,
  pub cmd: Vec<String>,
  pub entrypoint: Vec<String>,
  pub working_dir: Option<String>,
  /// `host:container[:ro]` bind specs.
  pub binds: Vec<String>,
  /// `container_port/proto -> host_port`, empty when the container only
  /// needs to be reachable via the reverse proxy's internal network.
  pub port_bindings: HashMap<String, Option<String>>,
  pub network: Option<String>,
  pub memory_limit_bytes: Option<i64>,
  pub nano_cpus: Option<i64>,
  pub auto_remove: bool,
  /// Docker restart-policy name (`"always"`, `"unless-stopped"`, ...), unset
  /// for short-lived builder containers.
  pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
  Created,
  Running,
  Paused,
  Restarting,
  Exited,
  Dead,
  Unknown,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
  pub id: String,
  pub name: String,
  pub image: String,
  pub state: ContainerState,
  pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerInspect {
  pub id: String,
  pub name: String,
  pub state: ContainerState,
  pub exit_code: Option<i64>,
  pub labels: BTreeMap<String, String>,
}

/// Label/state filter for `list-containers`. Label filters are an
/// intersection.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
  pub labels: BTreeMap<String, String>,
  pub all: bool,
}

impl ContainerFilter {
  pub fn by_label(key: impl Into<String>, value: impl Into<String>) -> Self {
    let mut labels = BTreeMap::new();
    labels.insert(key.into(), value.into());
    Self { labels, all: true }
  }
}

/// A build/pull progress event. Every streaming adapter call yields a
/// lazy sequence of these until the underlying call ends or errors.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
  Status { id: Option<String>, status: String },
  Progress { id: Option<String>, progress: String },
  Stream(String),
  Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSpec {
  pub name: String,
  pub driver: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkSummary {
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeSpec {
  pub name: String,
  pub driver: Option<String>,
  pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VolumeSummary {
  pub name: String,
  pub driver: String,
  pub labels: BTreeMap<String, String>,
}

/// Filter for `list-images`: `dangling` mirrors Docker's
/// `dangling=true/false` filter, left `None` to list every image.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
  pub dangling: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ImageSummary {
  pub id: String,
  pub tags: Vec<String>,
  pub created_at: i64,
}

/// A single interleaved chunk of exec output, tagged by stream, matching
/// an `exec-in-container` contract of "stream + exit-code".
#[derive(Debug, Clone)]
pub enum ExecChunk {
  Stdout(Vec<u8>),
  Stderr(Vec<u8>),
}

impl ExecChunk {
  pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
    match self {
      ExecChunk::Stdout(bytes) | ExecChunk::Stderr(bytes) => {
        String::from_utf8_lossy(bytes)
      }
    }
  }
}
