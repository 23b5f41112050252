//! Cache entry types

use std::time::{Duration, Instant};

/// A cached string value with expiry and access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: String,
  pub expires_at: Option<Instant>,
  pub accessed_at: Instant,
  pub access_count: u64,
  /// Size in bytes (approximate, key included)
  pub size: usize,
}

impl CacheEntry {
  pub fn new(key: &str, value: String, ttl: Option<Duration>) -> Self {
    let now = Instant::now();
    let size = key.len() + value.len();
    Self {
      value,
      expires_at: ttl.map(|d| now + d),
      accessed_at: now,
      access_count: 0,
      size,
    }
  }

  pub fn is_expired(&self) -> bool {
    self
      .expires_at
      .map(|exp| Instant::now() >= exp)
      .unwrap_or(false)
  }

  pub fn touch(&mut self) {
    self.accessed_at = Instant::now();
    self.access_count += 1;
  }
}
