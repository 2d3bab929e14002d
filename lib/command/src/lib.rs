//! Dockerfile & Compose-override synthesis.
//!
//! A small typed builder API in place of template-string interpolation:
//! callers assemble a `DockerfileBuilder` instruction by instruction and
//! render it once at the end, so the emission order invariants (ARG before
//! COPY, ENV after COPY, EXPOSE, exec-form CMD) are enforced by the type
//! rather than by string surgery.

use std::borrow::Cow;
use std::fmt::Write as _;

use entities::EnvironmentVar;
use shell_escape::unix::escape;

/// Renders a Dockerfile, always in the order: `FROM` (build stage, if any),
/// `ARG`s, `COPY`/`RUN` body lines, `FROM` (runtime stage, if any), `ARG`s
/// re-declared as `ENV`, `EXPOSE`, exec-form `CMD`.
#[derive(Debug, Default, Clone)]
pub struct DockerfileBuilder {
  build_stage: Option<String>,
  runtime_stage: Option<String>,
  env_keys: Vec<String>,
  body: Vec<String>,
  runtime_body: Vec<String>,
  workdir: Option<String>,
  expose: Option<u16>,
  cmd: Vec<String>,
}

impl DockerfileBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Single-stage Dockerfile `FROM` (the `DockerDeploymentStrategy` case).
  pub fn from_image(mut self, image: impl Into<String>) -> Self {
    self.runtime_stage = Some(image.into());
    self
  }

  /// Two-stage Dockerfile: `build_image` produces the runtime artifacts,
  /// `runtime_image` serves them (the `StaticDeploymentStrategy` case).
  pub fn two_stage(
    mut self,
    build_image: impl Into<String>,
    runtime_image: impl Into<String>,
  ) -> Self {
    self.build_stage = Some(build_image.into());
    self.runtime_stage = Some(runtime_image.into());
    self
  }

  pub fn workdir(mut self, dir: impl Into<String>) -> Self {
    self.workdir = Some(dir.into());
    self
  }

  /// Registers an env-var key to be `ARG`-declared before `COPY` and
  /// re-declared as `ENV` after it. The value itself is supplied at build
  /// time via `--build-arg`, never baked as a literal into the Dockerfile.
  pub fn env_key(mut self, key: impl Into<String>) -> Self {
    self.env_keys.push(key.into());
    self
  }

  pub fn env_keys<I: IntoIterator<Item = EnvironmentVar>>(
    mut self,
    vars: I,
  ) -> Self {
    for var in vars {
      self.env_keys.push(var.variable);
    }
    self
  }

  /// Appends a raw instruction line (`COPY . .`, `RUN npm ci`, ...) to the
  /// body, run after the stage's `ARG`s and before its `ENV` re-declaration.
  pub fn instruction(mut self, line: impl Into<String>) -> Self {
    self.body.push(line.into());
    self
  }

  /// Appends a line to the runtime stage specifically — the only way to put
  /// anything (e.g. `COPY --from=build ...`) into a two-stage build's final
  /// image, since [`instruction`](Self::instruction) targets the build
  /// stage once one exists.
  pub fn runtime_instruction(mut self, line: impl Into<String>) -> Self {
    self.runtime_body.push(line.into());
    self
  }

  pub fn expose(mut self, port: u16) -> Self {
    self.expose = Some(port);
    self
  }

  /// Sets the exec-form `CMD`, safely quoting each argument. Splitting on
  /// whitespace is intentional: the worker never accepts a structured
  /// argv from the job envelope, only a single start-command string.
  pub fn cmd(mut self, command: &str) -> Self {
    self.cmd = command.split_whitespace().map(str::to_string).collect();
    self
  }

  pub fn render(&self) -> String {
    let mut out = String::new();

    if let Some(build_stage) = &self.build_stage {
      let _ = writeln!(out, "FROM {build_stage} AS build");
      for key in &self.env_keys {
        let _ = writeln!(out, "ARG {key}");
      }
      if let Some(workdir) = &self.workdir {
        let _ = writeln!(out, "WORKDIR {workdir}");
      }
      for line in &self.body {
        let _ = writeln!(out, "{line}");
      }
      let _ = writeln!(out);
    }

    let runtime = self.runtime_stage.as_deref().unwrap_or("scratch");
    let _ = writeln!(out, "FROM {runtime}");

    if self.build_stage.is_none() {
      for key in &self.env_keys {
        let _ = writeln!(out, "ARG {key}");
      }
      if let Some(workdir) = &self.workdir {
        let _ = writeln!(out, "WORKDIR {workdir}");
      }
      for line in &self.body {
        let _ = writeln!(out, "{line}");
      }
    }

    for line in &self.runtime_body {
      let _ = writeln!(out, "{line}");
    }

    for key in &self.env_keys {
      let _ = writeln!(out, "ENV {key}=${key}");
    }

    if let Some(port) = self.expose {
      let _ = writeln!(out, "EXPOSE {port}");
    }

    if !self.cmd.is_empty() {
      let quoted = self
        .cmd
        .iter()
        .map(|arg| format!("\"{}\"", arg.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ");
      let _ = writeln!(out, "CMD [{quoted}]");
    }

    out
  }
}

/// `--build-arg KEY=value` flags for every env var, quoted the way
/// `parse_build_args` does it for Docker CLI invocations, adapted for use
/// inside a builder-container exec command string.
pub fn build_args(vars: &[EnvironmentVar]) -> String {
  let mut out = String::new();
  for var in vars {
    let _ = write!(out, " --build-arg {}={}", var.variable, quote(&var.value));
  }
  out
}

/// Shell-quotes a value for safe interpolation into an exec command string
/// run inside the builder container (e.g. an `ENV K=V` line or a
/// `--build-arg` flag). Delegates to `shell_escape`: a value with no shell
/// metacharacters passes through unquoted, anything else is single-quoted.
pub fn quote(value: &str) -> String {
  escape(Cow::Borrowed(value)).into_owned()
}

/// A Compose override file: attaches routing labels and identity
/// labels to the user's `mainService`, joins it to `helvetia-net` and the
/// project's private network, and injects env-vars/volumes. Rendered as
/// YAML text rather than via a generic serializer so indentation and key
/// order stay stable and readable in persisted build logs.
#[derive(Debug, Clone)]
pub struct ComposeOverrideBuilder {
  main_service: String,
  project_network: String,
  labels: Vec<(String, String)>,
  env: Vec<EnvironmentVar>,
  volumes: Vec<(String, String)>,
}

impl ComposeOverrideBuilder {
  pub fn new(main_service: impl Into<String>, project_network: impl Into<String>) -> Self {
    Self {
      main_service: main_service.into(),
      project_network: project_network.into(),
      labels: Vec::new(),
      env: Vec::new(),
      volumes: Vec::new(),
    }
  }

  pub fn labels(mut self, labels: impl IntoIterator<Item = (String, String)>) -> Self {
    self.labels.extend(labels);
    self
  }

  pub fn env(mut self, env: Vec<EnvironmentVar>) -> Self {
    self.env = env;
    self
  }

  pub fn volumes(mut self, volumes: impl IntoIterator<Item = (String, String)>) -> Self {
    self.volumes.extend(volumes);
    self
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "services:");
    let _ = writeln!(out, "  {}:", self.main_service);
    let _ = writeln!(out, "    networks:");
    let _ = writeln!(out, "      - helvetia-net");
    if !self.project_network.is_empty() {
      let _ = writeln!(out, "      - {}", self.project_network);
    }

    if !self.labels.is_empty() {
      let _ = writeln!(out, "    labels:");
      for (key, value) in &self.labels {
        let _ = writeln!(out, "      {key}: \"{}\"", value.replace('"', "\\\""));
      }
    }

    if !self.env.is_empty() {
      let _ = writeln!(out, "    environment:");
      for var in &self.env {
        let _ = writeln!(
          out,
          "      {}: \"{}\"",
          var.variable,
          var.value.replace('"', "\\\"")
        );
      }
    }

    if !self.volumes.is_empty() {
      let _ = writeln!(out, "    volumes:");
      for (source, target) in &self.volumes {
        let _ = writeln!(out, "      - {source}:{target}");
      }
    }

    let _ = writeln!(out, "networks:");
    let _ = writeln!(out, "  helvetia-net:");
    let _ = writeln!(out, "    external: true");

    out
  }
}

/// Nginx/static server config fragment for the SPA fallback the
/// `StaticDeploymentStrategy` bakes into its runtime stage.
pub fn spa_fallback_config(listen_port: u16, root: &str) -> String {
  format!(
    "server {{\n  listen {listen_port};\n  root {root};\n  location / {{\n    try_files $uri $uri/ /index.html;\n  }}\n}}\n"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn docker_dockerfile_orders_arg_before_copy_and_env_after() {
    let vars = vec![EnvironmentVar::new("API_KEY", "secret")];
    let rendered = DockerfileBuilder::new()
      .from_image("node:20-alpine")
      .workdir("/app")
      .env_keys(vars)
      .instruction("COPY . .")
      .instruction("RUN npm ci")
      .expose(3000)
      .cmd("node server.js")
      .render();

    let arg_pos = rendered.find("ARG API_KEY").unwrap();
    let copy_pos = rendered.find("COPY . .").unwrap();
    let env_pos = rendered.find("ENV API_KEY=$API_KEY").unwrap();
    assert!(arg_pos < copy_pos);
    assert!(copy_pos < env_pos);
    assert!(rendered.contains("EXPOSE 3000"));
    assert!(rendered.contains("CMD [\"node\", \"server.js\"]"));
  }

  #[test]
  fn two_stage_dockerfile_keeps_build_stage_args_separate_from_runtime() {
    let rendered = DockerfileBuilder::new()
      .two_stage("node:20-alpine", "nginx:alpine")
      .instruction("COPY . .")
      .instruction("RUN npm run build")
      .expose(80)
      .cmd("nginx -g daemon off;")
      .render();

    assert!(rendered.contains("FROM node:20-alpine AS build"));
    assert!(rendered.contains("FROM nginx:alpine"));
    assert!(rendered.contains("EXPOSE 80"));
  }

  #[test]
  fn cmd_is_exec_form_with_quoted_args() {
    let rendered = DockerfileBuilder::new()
      .from_image("alpine")
      .cmd("sh -c \"echo hi\"")
      .render();
    assert!(rendered.starts_with("FROM alpine") || rendered.contains("FROM alpine"));
    assert!(rendered.contains("CMD ["));
  }

  #[test]
  fn build_args_quotes_each_value() {
    let vars = vec![
      EnvironmentVar::new("PLAIN", "value"),
      EnvironmentVar::new("SPACED", "has space"),
    ];
    let rendered = build_args(&vars);
    assert!(rendered.contains("--build-arg PLAIN="));
    assert!(rendered.contains("--build-arg SPACED="));
  }

  #[test]
  fn quote_wraps_values_with_shell_metacharacters() {
    assert_eq!(quote("simple"), "simple");
    let quoted = quote("it's a test; rm -rf /");
    assert!(quoted.starts_with('\''));
  }

  #[test]
  fn compose_override_attaches_networks_and_labels() {
    let rendered = ComposeOverrideBuilder::new("web", "acme_default")
      .labels([("helvetia.serviceId".to_string(), "svc_1".to_string())])
      .env(vec![EnvironmentVar::new("PORT", "3000")])
      .volumes([("data".to_string(), "/data".to_string())])
      .render();

    assert!(rendered.contains("services:"));
    assert!(rendered.contains("  web:"));
    assert!(rendered.contains("- helvetia-net"));
    assert!(rendered.contains("- acme_default"));
    assert!(rendered.contains("helvetia.serviceId"));
    assert!(rendered.contains("PORT:"));
    assert!(rendered.contains("- data:/data"));
  }

  #[test]
  fn spa_fallback_config_contains_try_files() {
    let config = spa_fallback_config(80, "/app/dist");
    assert!(config.contains("try_files $uri $uri/ /index.html"));
    assert!(config.contains("listen 80"));
  }
}
