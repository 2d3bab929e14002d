use std::collections::BTreeMap;

use crate::sanitize::sanitize_name;
use crate::service::ServiceType;

pub const SERVICE_ID_LABEL: &str = "helvetia.serviceId";
pub const SERVICE_TYPE_LABEL: &str = "helvetia.type";
/// Label Docker Compose itself stamps onto every container and volume in a
/// stack, keyed by the `-p` project name.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Everything needed to build the routing-label block a container must
/// carry for the reverse proxy to discover it.
#[derive(Debug, Clone)]
pub struct RoutingContext {
  pub service_id: String,
  pub service_type: ServiceType,
  pub service_name: String,
  pub username: String,
  pub project_name: String,
  pub environment_name: String,
  pub platform_domain: String,
  pub custom_domain: Option<String>,
  pub port: u16,
}

impl RoutingContext {
  /// `<sanitizedUsername>-<projectName>-<environmentName>-<serviceName>`,
  /// with absent segments elided.
  pub fn router_id(&self) -> String {
    let name = sanitize_name(&self.service_name);
    [
      &self.username,
      &self.project_name,
      &self.environment_name,
    ]
    .into_iter()
    .filter(|s| !s.is_empty())
    .map(sanitize_name)
    .chain(std::iter::once(name))
    .collect::<Vec<_>>()
    .join("-")
  }

  /// The Host() rule hosts: `<name>.<platformDomain>`, `<name>.localhost`,
  /// the optional custom domain, `<project>-<name>.<platformDomain>`, and
  /// the long form `<user>.<project>.<env>.<name>.<platformDomain>`.
  pub fn hosts(&self) -> Vec<String> {
    let name = sanitize_name(&self.service_name);
    let mut hosts = vec![
      format!("{name}.{}", self.platform_domain),
      format!("{name}.localhost"),
    ];

    if let Some(domain) = &self.custom_domain {
      if !domain.is_empty() {
        hosts.push(domain.clone());
      }
    }

    if !self.project_name.is_empty() {
      hosts.push(format!(
        "{}-{name}.{}",
        sanitize_name(&self.project_name),
        self.platform_domain
      ));
    }

    if !self.username.is_empty()
      && !self.project_name.is_empty()
      && !self.environment_name.is_empty()
    {
      hosts.push(format!(
        "{}.{}.{}.{name}.{}",
        sanitize_name(&self.username),
        sanitize_name(&self.project_name),
        sanitize_name(&self.environment_name),
        self.platform_domain
      ));
    }

    hosts
  }

  fn rule(&self) -> String {
    self
      .hosts()
      .iter()
      .map(|h| format!("Host(`{h}`)"))
      .collect::<Vec<_>>()
      .join(" || ")
  }

  /// The full label set written onto every container this worker creates:
  /// identity labels plus the traefik routing block.
  pub fn labels(&self) -> BTreeMap<String, String> {
    let router_id = self.router_id();
    let mut labels = BTreeMap::new();
    labels.insert(SERVICE_ID_LABEL.to_string(), self.service_id.clone());
    labels
      .insert(SERVICE_TYPE_LABEL.to_string(), self.service_type.to_string());
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
      format!("traefik.http.routers.{router_id}.rule"),
      self.rule(),
    );
    labels.insert(
      format!("traefik.http.routers.{router_id}.entrypoints"),
      "web".to_string(),
    );
    labels.insert(
      format!("traefik.http.services.{router_id}.loadbalancer.server.port"),
      self.port.to_string(),
    );
    labels
  }
}

/// The bare identity label set, with no routing block — used when
/// attaching only `helvetia.serviceId`/`helvetia.type` is required (e.g.
/// the builder container carries neither).
pub fn service_identity_labels(
  service_id: &str,
  service_type: ServiceType,
) -> BTreeMap<String, String> {
  let mut labels = BTreeMap::new();
  labels.insert(SERVICE_ID_LABEL.to_string(), service_id.to_string());
  labels.insert(SERVICE_TYPE_LABEL.to_string(), service_type.to_string());
  labels
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx() -> RoutingContext {
    RoutingContext {
      service_id: "svc_1".into(),
      service_type: ServiceType::Docker,
      service_name: "My Static Site".into(),
      username: "alice".into(),
      project_name: "acme".into(),
      environment_name: "prod".into(),
      platform_domain: "helvetia.cloud".into(),
      custom_domain: Some("example.com".into()),
      port: 3000,
    }
  }

  #[test]
  fn router_id_joins_non_empty_segments() {
    assert_eq!(ctx().router_id(), "alice-acme-prod-my-static-site");
  }

  #[test]
  fn router_id_elides_absent_segments() {
    let mut c = ctx();
    c.username.clear();
    c.project_name.clear();
    assert_eq!(c.router_id(), "prod-my-static-site");
  }

  #[test]
  fn hosts_include_custom_domain_and_long_form() {
    let hosts = ctx().hosts();
    assert!(hosts.contains(&"my-static-site.helvetia.cloud".to_string()));
    assert!(hosts.contains(&"my-static-site.localhost".to_string()));
    assert!(hosts.contains(&"example.com".to_string()));
    assert!(
      hosts.contains(&"alice.acme.prod.my-static-site.helvetia.cloud".to_string())
    );
  }

  #[test]
  fn labels_carry_service_id_and_port() {
    let labels = ctx().labels();
    assert_eq!(labels.get(SERVICE_ID_LABEL).unwrap(), "svc_1");
    let router_id = ctx().router_id();
    assert_eq!(
      labels
        .get(&format!(
          "traefik.http.services.{router_id}.loadbalancer.server.port"
        ))
        .unwrap(),
      "3000"
    );
  }
}
