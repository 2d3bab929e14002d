use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A random 6-character suffix for blue/green container names
/// and builder container names, so concurrent jobs never collide on name.
pub fn random_suffix() -> String {
  let mut rng = rand::rng();
  (0..6).map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn suffix_is_six_lowercase_alphanumeric_chars() {
    let suffix = random_suffix();
    assert_eq!(suffix.len(), 6);
    assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
  }
}
