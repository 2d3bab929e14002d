/// Reduces an arbitrary string to a DNS label: lowercase ASCII alphanumerics
/// and hyphens, no leading/trailing/doubled hyphen, at most 63 characters,
/// falling back to `"service"` when nothing survives.
///
/// Idempotent: `sanitize_name(&sanitize_name(x)) == sanitize_name(x)` for
/// every input, which is exercised directly in the property tests below.
pub fn sanitize_name(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut last_was_hyphen = false;

  for ch in input.chars() {
    let lower = ch.to_ascii_lowercase();
    if lower.is_ascii_alphanumeric() {
      out.push(lower);
      last_was_hyphen = false;
    } else if !last_was_hyphen && !out.is_empty() {
      // Collapse any run of non-alphanumerics into a single hyphen,
      // but never start the string with one.
      out.push('-');
      last_was_hyphen = true;
    }
  }

  while out.ends_with('-') {
    out.pop();
  }

  if out.len() > 63 {
    out.truncate(63);
    while out.ends_with('-') {
      out.pop();
    }
  }

  if out.is_empty() { "service".to_string() } else { out }
}

#[cfg(test)]
mod tests {
  use super::sanitize_name;

  #[test]
  fn idempotent() {
    for input in [
      "My Cool App!!",
      "---leading-hyphens",
      "trailing-hyphens---",
      "UPPER_CASE_123",
      "already-sane",
      "",
      "   ",
      "a".repeat(200).as_str(),
      "🎉emoji🎉party🎉",
    ] {
      let once = sanitize_name(input);
      let twice = sanitize_name(&once);
      assert_eq!(once, twice, "not idempotent for {input:?}");
    }
  }

  #[test]
  fn is_dns_label_or_empty_fallback() {
    let re =
      regex_shape(&sanitize_name("My Cool App!! --- 123 ___ weee"));
    assert!(re, "result was not a valid DNS label");
  }

  #[test]
  fn empty_input_falls_back_to_service() {
    assert_eq!(sanitize_name(""), "service");
    assert_eq!(sanitize_name("   "), "service");
    assert_eq!(sanitize_name("!!!"), "service");
  }

  #[test]
  fn never_exceeds_63_chars() {
    let long = "a-".repeat(100);
    assert!(sanitize_name(&long).len() <= 63);
  }

  #[test]
  fn no_consecutive_hyphens() {
    let out = sanitize_name("a---b___c   d");
    assert!(!out.contains("--"));
  }

  /// Minimal DNS label check without pulling in a regex dependency just for
  /// this crate's tests: `[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?`.
  fn regex_shape(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
      return false;
    }
    let bytes = s.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) {
      return false;
    }
    if bytes.len() == 1 {
      return true;
    }
    if !is_alnum(*bytes.last().unwrap()) {
      return false;
    }
    bytes[1..bytes.len() - 1]
      .iter()
      .all(|&b| is_alnum(b) || b == b'-')
  }
}
