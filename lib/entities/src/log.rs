use serde::{Deserialize, Serialize};

use crate::timestamp_ms;

/// A single stage of build/deploy output, the unit the orchestrator
/// accumulates into the build-log buffer and hands to the Log Bus.
///
/// Stage name, the command that ran, its stdout/stderr, and whether it
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

impl Log {
  /// An informational log entry with no associated command.
  pub fn simple(stage: impl Into<String>, message: impl Into<String>) -> Self {
    let ts = timestamp_ms();
    Self {
      stage: stage.into(),
      command: String::new(),
      stdout: message.into(),
      stderr: String::new(),
      success: true,
      start_ts: ts,
      end_ts: ts,
    }
  }

  /// An error log entry; `success` is false so `all_logs_success` callers
  /// short-circuit on it.
  pub fn error(stage: impl Into<String>, message: impl Into<String>) -> Self {
    let ts = timestamp_ms();
    Self {
      stage: stage.into(),
      command: String::new(),
      stdout: String::new(),
      stderr: message.into(),
      success: false,
      start_ts: ts,
      end_ts: ts,
    }
  }

  /// Render as the flat text that gets pushed through the Scrubber to the
  /// Log Bus and the persisted blob.
  pub fn render(&self) -> String {
    let mut out = format!("=== {} ===\n", self.stage);
    if !self.command.is_empty() {
      out.push_str(&format!("$ {}\n", self.command));
    }
    if !self.stdout.is_empty() {
      out.push_str(&self.stdout);
      out.push('\n');
    }
    if !self.stderr.is_empty() {
      out.push_str(&self.stderr);
      out.push('\n');
    }
    out
  }
}

/// True if every log in the slice succeeded; used to short-circuit
/// multi-stage pipelines as soon as one stage fails.
pub fn all_logs_success(logs: &[Log]) -> bool {
  logs.iter().all(|log| log.success)
}

/// Strips NULs and control bytes (`U+0000..U+0008`, `U+000B..U+000C`,
/// `U+000E..U+001F`, `U+007F`) and truncates to `max_chars`, the
/// normalization the orchestrator applies to a deployment's log blob before
/// persistence. Not applied to chunks en route to the Log Bus —
/// only to the final persisted record.
pub fn normalize_log_blob(blob: &str, max_chars: usize) -> String {
  blob
    .chars()
    .filter(|c| {
      let code = *c as u32;
      !matches!(code, 0x00..=0x08 | 0x0B..=0x0C | 0x0E..=0x1F | 0x7F)
    })
    .take(max_chars)
    .collect()
}

#[cfg(test)]
mod normalize_tests {
  use super::normalize_log_blob;

  #[test]
  fn strips_control_bytes() {
    let input = "hello\u{0000}\u{0001}\u{000B}world\u{007F}";
    assert_eq!(normalize_log_blob(input, 1000), "helloworld");
  }

  #[test]
  fn preserves_newlines_and_tabs() {
    let input = "line one\nline two\ttabbed";
    assert_eq!(normalize_log_blob(input, 1000), input);
  }

  #[test]
  fn truncates_to_max_chars() {
    let input = "abcdefghij";
    assert_eq!(normalize_log_blob(input, 5), "abcde");
  }
}
