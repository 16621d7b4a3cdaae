//! Query keys.
//!
//! A key is an ordered list of segments, e.g. `todos / 1 / 10 / search / status / user`.
//! Two reads with equal segments share a cache slot, and invalidation matches
//! on whole leading segments, so `todo/1` never matches `todo/10`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  segments: Vec<String>,
}

impl QueryKey {
  pub fn new(root: impl Into<String>) -> Self {
    Self {
      segments: vec![root.into()],
    }
  }

  /// Append a segment.
  pub fn with(mut self, segment: impl ToString) -> Self {
    self.segments.push(segment.to_string());
    self
  }

  /// Append an optional segment; `None` is stored as an empty segment so
  /// positions stay stable.
  pub fn with_opt(self, segment: Option<impl ToString>) -> Self {
    match segment {
      Some(s) => self.with(s),
      None => self.with(""),
    }
  }

  /// Stable string form used by storage backends.
  ///
  /// Each segment is form-urlencoded, so the `:` separator never appears
  /// inside a segment.
  pub fn encode(&self) -> String {
    self
      .segments
      .iter()
      .map(|s| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>())
      .collect::<Vec<_>>()
      .join(":")
  }

  #[cfg(test)]
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.segments.starts_with(&prefix.segments)
  }
}

/// Segment-wise prefix match on encoded keys.
pub fn encoded_matches(encoded: &str, prefix: &str) -> bool {
  encoded == prefix
    || (encoded.len() > prefix.len()
      && encoded.starts_with(prefix)
      && encoded.as_bytes()[prefix.len()] == b':')
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.segments.join("/"))
  }
}
