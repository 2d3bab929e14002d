//! Deterministic secret scrubbing for build/deploy log output.
//!
//! Uses `svi::replace_in_string` to mask interpolated secrets in command
//! output before it reaches an alerter or a log sink, generalized here to
//! the worker's own secret set (job env-var
//! values) rather than `core_config().secrets`.

const SENTINEL: &str = "***";

/// A reusable replacer built once per job from its env-var values. Matching
/// is longest-first so that a secret which is a substring of another never
/// causes partial masking of the longer one.
#[derive(Debug, Clone, Default)]
pub struct Scrubber {
  replacers: Vec<(String, String)>,
}

impl Scrubber {
  /// Builds a scrubber from the job's secret values. Empty strings are
  /// dropped (masking them would scrub everything) and duplicates are
  /// collapsed before sorting longest-first.
  pub fn new<I, S>(secrets: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut seen = std::collections::HashSet::new();
    let mut values: Vec<String> = secrets
      .into_iter()
      .map(Into::into)
      .filter(|s| !s.is_empty())
      .filter(|s| seen.insert(s.clone()))
      .collect();
    values.sort_by(|a, b| b.len().cmp(&a.len()));

    let replacers =
      values.into_iter().map(|secret| (secret, SENTINEL.to_string())).collect();
    Self { replacers }
  }

  pub fn is_empty(&self) -> bool {
    self.replacers.is_empty()
  }

  /// Scrubs a single chunk. Chunks are independent — no state carries
  /// across calls, so a secret split across a chunk boundary is not caught.
  pub fn scrub(&self, chunk: &str) -> String {
    if self.replacers.is_empty() {
      return chunk.to_string();
    }
    svi::replace_in_string(chunk, &self.replacers)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn masks_exact_secret_spans() {
    let scrubber = Scrubber::new(["hunter2".to_string()]);
    let out = scrubber.scrub("password=hunter2 ok");
    assert!(!out.contains("hunter2"));
    assert!(out.contains(SENTINEL));
  }

  #[test]
  fn longest_first_avoids_partial_masking() {
    let scrubber =
      Scrubber::new(["ab".to_string(), "abcdef".to_string()]);
    let out = scrubber.scrub("token is abcdef here");
    assert_eq!(out, "token is *** here");
  }

  #[test]
  fn chunk_with_no_secret_is_unchanged() {
    let scrubber = Scrubber::new(["hunter2".to_string()]);
    assert_eq!(scrubber.scrub("nothing secret here"), "nothing secret here");
  }

  #[test]
  fn empty_secret_values_are_ignored() {
    let scrubber = Scrubber::new(["".to_string(), "".to_string()]);
    assert!(scrubber.is_empty());
    assert_eq!(scrubber.scrub("anything"), "anything");
  }

  #[test]
  fn duplicate_secrets_do_not_duplicate_replacers() {
    let scrubber =
      Scrubber::new(["dup".to_string(), "dup".to_string()]);
    assert_eq!(scrubber.replacers.len(), 1);
  }
}
