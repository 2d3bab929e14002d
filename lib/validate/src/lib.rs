//! Dockerfile & Env Validator: static checks run by the orchestrator's
//! VALIDATE stage before anything is built. `valid=false` is fatal — the
//! orchestrator never creates a container on top of a failed validation.

use entities::EnvironmentVar;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

const RESERVED_ENV_NAMES: &[&str] = &["PATH", "HOME", "USER", "SHELL", "TERM"];

const DOCKERFILE_INSTRUCTIONS: &[&str] = &[
  "FROM", "RUN", "CMD", "LABEL", "EXPOSE", "ENV", "ADD", "COPY", "ENTRYPOINT",
  "VOLUME", "USER", "WORKDIR", "ARG", "ONBUILD", "STOPSIGNAL", "HEALTHCHECK",
  "SHELL",
];

static ENV_NAME_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

impl ValidationResult {
  fn ok() -> Self {
    Self { valid: true, errors: Vec::new(), warnings: Vec::new() }
  }

  fn merge(mut self, other: ValidationResult) -> Self {
    self.valid = self.valid && other.valid;
    self.errors.extend(other.errors);
    self.warnings.extend(other.warnings);
    self
  }
}

/// Validates the job's env-var map (`VALIDATION_ENV` on failure).
pub fn validate_env_vars(vars: &[EnvironmentVar]) -> ValidationResult {
  let mut result = ValidationResult::ok();

  for var in vars {
    if !ENV_NAME_PATTERN.is_match(&var.variable) {
      result.valid = false;
      result.errors.push(format!(
        "env var name '{}' does not match ^[A-Za-z_][A-Za-z0-9_]*$",
        var.variable
      ));
    }
    if var.value.contains('\n') || var.value.contains('\r') {
      result.valid = false;
      result.errors.push(format!(
        "env var '{}' value must not contain newlines",
        var.variable
      ));
    }
    if RESERVED_ENV_NAMES.contains(&var.variable.as_str()) {
      result
        .warnings
        .push(format!("env var '{}' shadows a reserved OS variable", var.variable));
    }
    if var.value.len() > 10_000 {
      result.warnings.push(format!(
        "env var '{}' value is {} chars, exceeds 10,000",
        var.variable,
        var.value.len()
      ));
    }
  }

  result
}

/// Validates a generated Dockerfile fragment (`VALIDATION_DOCKERFILE` on
/// failure).
pub fn validate_dockerfile(contents: &str) -> ValidationResult {
  let mut result = ValidationResult::ok();

  let lines: Vec<&str> = contents.lines().collect();
  let meaningful = |line: &&str| {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
  };

  let Some(first) = lines.iter().find(meaningful) else {
    result.valid = false;
    result.errors.push("dockerfile is empty".to_string());
    return result;
  };

  if !first.trim_start().to_uppercase().starts_with("FROM ") {
    result.valid = false;
    result.errors.push("first instruction must be FROM".to_string());
  }

  let mut saw_cmd_or_entrypoint = false;

  for line in lines.iter().filter(meaningful) {
    let trimmed = line.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let instruction = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();
    let upper = instruction.to_uppercase();

    if !DOCKERFILE_INSTRUCTIONS.contains(&upper.as_str()) {
      result.valid = false;
      result.errors.push(format!("unrecognized instruction '{instruction}'"));
      continue;
    }

    if upper != "FROM" && rest.is_empty() {
      result.valid = false;
      result.errors.push(format!("instruction '{upper}' requires an argument"));
      continue;
    }

    match upper.as_str() {
      "FROM" if rest.is_empty() => {
        result.valid = false;
        result.errors.push("FROM must name an image".to_string());
      }
      "WORKDIR" if rest.is_empty() => {
        result.valid = false;
        result.errors.push("WORKDIR must name a path".to_string());
      }
      "ENV" => {
        if !is_valid_env_instruction(rest) {
          result.valid = false;
          result.errors.push(format!("ENV instruction malformed: '{rest}'"));
        }
      }
      "EXPOSE" => {
        for spec in rest.split_whitespace() {
          let port_part = spec.split('/').next().unwrap_or(spec);
          match port_part.parse::<u32>() {
            Ok(port) if (1..=65535).contains(&port) => {}
            _ => {
              result.valid = false;
              result
                .errors
                .push(format!("EXPOSE port '{spec}' out of range [1, 65535]"));
            }
          }
        }
      }
      "CMD" | "ENTRYPOINT" => {
        saw_cmd_or_entrypoint = true;
        if is_shell_form(rest)
          && (rest.contains("&&") || rest.contains("||") || rest.contains('|'))
        {
          result.warnings.push(format!(
            "{upper} uses shell form with chained commands ('&&'/'||'/'|')"
          ));
        }
      }
      _ => {}
    }
  }

  if !saw_cmd_or_entrypoint {
    result.warnings.push("no CMD or ENTRYPOINT instruction present".to_string());
  }

  result
}

fn is_valid_env_instruction(rest: &str) -> bool {
  if rest.is_empty() {
    return false;
  }
  if rest.contains('=') {
    let key = rest.split('=').next().unwrap_or_default();
    !key.is_empty()
  } else {
    rest.split_whitespace().count() >= 2
  }
}

/// Shell form is any CMD/ENTRYPOINT argument that isn't the JSON-array exec
/// form (`["executable", "arg"]`).
fn is_shell_form(rest: &str) -> bool {
  !rest.trim_start().starts_with('[')
}

pub fn validate_all(
  dockerfile: &str,
  vars: &[EnvironmentVar],
) -> ValidationResult {
  validate_dockerfile(dockerfile).merge(validate_env_vars(vars))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_empty_dockerfile() {
    let result = validate_dockerfile("");
    assert!(!result.valid);
  }

  #[test]
  fn rejects_dockerfile_not_starting_with_from() {
    let result = validate_dockerfile("RUN echo hi\nFROM alpine\n");
    assert!(!result.valid);
  }

  #[test]
  fn accepts_minimal_valid_dockerfile() {
    let result =
      validate_dockerfile("FROM alpine\nCMD [\"/bin/sh\"]\n");
    assert!(result.valid);
    assert!(result.errors.is_empty());
  }

  #[test]
  fn warns_on_missing_cmd_and_entrypoint() {
    let result = validate_dockerfile("FROM alpine\nWORKDIR /app\n");
    assert!(result.valid);
    assert!(result.warnings.iter().any(|w| w.contains("CMD or ENTRYPOINT")));
  }

  #[test]
  fn warns_on_shell_form_chaining() {
    let result =
      validate_dockerfile("FROM alpine\nCMD echo hi && echo bye\n");
    assert!(result.valid);
    assert!(result.warnings.iter().any(|w| w.contains("shell form")));
  }

  #[test]
  fn rejects_unrecognized_instruction() {
    let result = validate_dockerfile("FROM alpine\nFOOBAR baz\n");
    assert!(!result.valid);
  }

  #[test]
  fn rejects_expose_port_out_of_range() {
    let result = validate_dockerfile("FROM alpine\nEXPOSE 99999\n");
    assert!(!result.valid);
  }

  #[test]
  fn rejects_bad_env_var_name() {
    let result = validate_env_vars(&[EnvironmentVar::new("1BAD", "x")]);
    assert!(!result.valid);
  }

  #[test]
  fn rejects_env_var_value_with_newline() {
    let result =
      validate_env_vars(&[EnvironmentVar::new("OK_NAME", "line1\nline2")]);
    assert!(!result.valid);
  }

  #[test]
  fn warns_on_reserved_env_name() {
    let result = validate_env_vars(&[EnvironmentVar::new("PATH", "/usr/bin")]);
    assert!(result.valid);
    assert!(result.warnings.iter().any(|w| w.contains("reserved")));
  }

  #[test]
  fn warns_on_oversized_env_value() {
    let big = "x".repeat(10_001);
    let result = validate_env_vars(&[EnvironmentVar::new("BIG", big)]);
    assert!(result.valid);
    assert!(result.warnings.iter().any(|w| w.contains("exceeds 10,000")));
  }
}
