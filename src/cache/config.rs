//! Cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::store::EvictionPolicy;

/// Cache mode: builtin in-memory or an external Redis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
  /// In-memory cache (default)
  #[default]
  Builtin,
  /// External Redis server
  Redis,
}

impl std::fmt::Display for CacheMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheMode::Builtin => write!(f, "builtin"),
      CacheMode::Redis => write!(f, "redis"),
    }
  }
}

impl std::str::FromStr for CacheMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "builtin" | "memory" | "inmemory" => Ok(CacheMode::Builtin),
      "redis" | "proxy" | "external" => Ok(CacheMode::Redis),
      _ => Err(format!("Unknown cache mode: {}", s)),
    }
  }
}

/// Connection settings for an external Redis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheProxyConfig {
  /// Full connection URL; overrides the discrete fields when set
  pub url: Option<String>,
  pub host: String,
  pub port: u16,
  pub password: Option<String>,
  pub database: u8,
  pub tls_enabled: bool,
}

impl Default for CacheProxyConfig {
  fn default() -> Self {
    Self {
      url: None,
      host: default_host(),
      port: default_redis_port(),
      password: None,
      database: 0,
      tls_enabled: false,
    }
  }
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_redis_port() -> u16 {
  6379
}

impl CacheProxyConfig {
  /// Generate Redis connection URL
  pub fn connection_url(&self) -> String {
    if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
      return url.to_string();
    }
    let scheme = if self.tls_enabled { "rediss" } else { "redis" };
    let auth = match &self.password {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!(
      "{}://{}{}:{}/{}",
      scheme, auth, self.host, self.port, self.database
    )
  }
}

/// Cache section of the server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub mode: CacheMode,

  /// Lifetime of every banner cache key, in seconds
  pub banner_ttl_secs: u64,

  /// Maximum memory for the builtin store (e.g., "256mb", "1gb")
  pub max_memory: String,

  /// Eviction policy when memory limit is reached
  pub eviction: EvictionPolicy,

  /// How often the builtin store sweeps expired keys (0 = never)
  pub sweep_interval_secs: u64,

  pub redis: CacheProxyConfig,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      mode: CacheMode::default(),
      banner_ttl_secs: default_banner_ttl_secs(),
      max_memory: default_max_memory(),
      eviction: EvictionPolicy::default(),
      sweep_interval_secs: default_sweep_interval_secs(),
      redis: CacheProxyConfig::default(),
    }
  }
}

fn default_banner_ttl_secs() -> u64 {
  600 // 10 minutes
}

fn default_max_memory() -> String {
  "256mb".to_string()
}

fn default_sweep_interval_secs() -> u64 {
  60
}

impl CacheConfig {
  /// Parse memory size string (e.g., "256mb", "1gb") to bytes
  pub fn max_memory_bytes(&self) -> Result<usize, anyhow::Error> {
    parse_memory_size(&self.max_memory)
      .ok_or_else(|| anyhow::anyhow!("invalid cache.max_memory: {:?}", self.max_memory))
  }

  pub fn banner_ttl(&self) -> Duration {
    Duration::from_secs(self.banner_ttl_secs)
  }

  pub fn sweep_interval(&self) -> Option<Duration> {
    (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
  }
}

/// Parse a memory size string to bytes
/// Supports: b, kb, mb, gb (case insensitive)
pub fn parse_memory_size(s: &str) -> Option<usize> {
  let s = s.trim().to_lowercase();

  let (digits, multiplier) = if let Some(n) = s.strip_suffix("gb") {
    (n, 1024 * 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("mb") {
    (n, 1024 * 1024)
  } else if let Some(n) = s.strip_suffix("kb") {
    (n, 1024)
  } else if let Some(n) = s.strip_suffix('b') {
    (n, 1)
  } else {
    // Assume bytes if no suffix
    (s.as_str(), 1)
  };

  digits
    .trim()
    .parse::<usize>()
    .ok()
    .and_then(|n| n.checked_mul(multiplier))
}
