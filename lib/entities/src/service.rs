use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of workload a Service materializes to. The database-backed
/// variants are handled uniformly by the `DatabaseDeploymentStrategy`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ServiceType {
  Docker,
  Static,
  Compose,
  Postgres,
  Redis,
  Mysql,
  Mongodb,
  Mariadb,
  Cassandra,
  Elasticsearch,
  Couchdb,
  Rabbitmq,
  Neo4j,
  Zookeeper,
  Clickhouse,
  Influxdb,
}

impl ServiceType {
  /// The managed-database set — these are pulled from a curated tag and
  /// never built.
  pub const DATABASE_TYPES: &'static [ServiceType] = &[
    ServiceType::Postgres,
    ServiceType::Redis,
    ServiceType::Mysql,
    ServiceType::Mongodb,
    ServiceType::Mariadb,
    ServiceType::Cassandra,
    ServiceType::Elasticsearch,
    ServiceType::Couchdb,
    ServiceType::Rabbitmq,
    ServiceType::Neo4j,
    ServiceType::Zookeeper,
    ServiceType::Clickhouse,
    ServiceType::Influxdb,
  ];

  pub fn is_database(&self) -> bool {
    Self::DATABASE_TYPES.contains(self)
  }

  /// The curated image tag pulled for each managed database type.
  /// Fixed, version-pinned references; not user-overridable.
  pub fn curated_image_tag(&self) -> Option<&'static str> {
    Some(match self {
      ServiceType::Postgres => "postgres:16-alpine",
      ServiceType::Redis => "redis:7-alpine",
      ServiceType::Mysql => "mysql:8",
      ServiceType::Mongodb => "mongo:7",
      ServiceType::Mariadb => "mariadb:11",
      ServiceType::Cassandra => "cassandra:5",
      ServiceType::Elasticsearch => {
        "docker.elastic.co/elasticsearch/elasticsearch:8.15.0"
      }
      ServiceType::Couchdb => "couchdb:3",
      ServiceType::Rabbitmq => "rabbitmq:3-management-alpine",
      ServiceType::Neo4j => "neo4j:5",
      ServiceType::Zookeeper => "zookeeper:3.9",
      ServiceType::Clickhouse => "clickhouse/clickhouse-server:24",
      ServiceType::Influxdb => "influxdb:2",
      ServiceType::Docker | ServiceType::Static | ServiceType::Compose => {
        return None;
      }
    })
  }

  /// The data directory bind-mounted for single-container managed databases
  /// (`helvetia-data-<serviceName>:<mount>`), carried across the blue/green
  /// swap so restarting a managed database doesn't lose its volume.
  pub fn data_mount_path(&self) -> Option<&'static str> {
    Some(match self {
      ServiceType::Postgres => "/var/lib/postgresql/data",
      ServiceType::Mysql | ServiceType::Mariadb => "/var/lib/mysql",
      ServiceType::Mongodb => "/data/db",
      ServiceType::Redis => "/data",
      ServiceType::Cassandra => "/var/lib/cassandra",
      ServiceType::Elasticsearch => "/usr/share/elasticsearch/data",
      ServiceType::Couchdb => "/opt/couchdb/data",
      ServiceType::Rabbitmq => "/var/lib/rabbitmq",
      ServiceType::Neo4j => "/data",
      ServiceType::Zookeeper => "/data",
      ServiceType::Clickhouse => "/var/lib/clickhouse",
      ServiceType::Influxdb => "/var/lib/influxdb2",
      ServiceType::Docker | ServiceType::Static | ServiceType::Compose => {
        return None;
      }
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ServiceStatus {
  Pending,
  Building,
  Running,
  Failed,
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DeploymentStatus {
  Pending,
  Building,
  Success,
  Failed,
}

/// The user-facing unit of deployment. The worker only ever mutates
/// `status`, and only under the Status Lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub r#type: ServiceType,
  pub status: ServiceStatus,
  pub environment_id: String,
  pub custom_domain: Option<String>,
  pub deleted_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

/// One attempt to materialize a Service. Immutable once it reaches a
/// terminal status (`Success` or `Failed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
  pub id: String,
  pub service_id: String,
  pub status: DeploymentStatus,
  pub image_tag: Option<String>,
  pub logs: String,
  pub created_at: DateTime<Utc>,
}

impl Deployment {
  pub fn is_terminal(&self) -> bool {
    matches!(self.status, DeploymentStatus::Success | DeploymentStatus::Failed)
  }
}
