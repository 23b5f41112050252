use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::service::PopulationConfig;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax. Substituted values are copied
/// verbatim and never expanded again.
pub(crate) fn expand_env_vars(input: &str) -> String {
  let mut result = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('$') {
    result.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      if let Some(end) = braced.find('}') {
        result.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
        rest = &braced[end + 1..];
        continue;
      }
      // Unterminated ${ is kept as-is
      result.push_str(&rest[pos..]);
      return result;
    }

    let var_len = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if var_len == 0 {
      result.push('$');
    } else {
      result.push_str(&std::env::var(&after[..var_len]).unwrap_or_default());
    }
    rest = &after[var_len..];
  }

  result.push_str(rest);
  result
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
  #[default]
  Postgres,
  Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub backend: BackendType,
  #[serde(default)]
  pub postgres: PostgresSection,
  #[serde(default)]
  pub sqlite: SqliteSection,
  #[serde(default)]
  pub logging: LoggingSection,
  #[serde(default)]
  pub auth: AuthSection,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub population: PopulationConfig,
  #[serde(default)]
  pub limits: LimitsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_http_port")]
  pub port: u16,
  /// CORS allowed origins
  /// Use ["*"] for permissive mode, or specify origins like ["http://localhost:3000"]
  #[serde(default)]
  pub cors_origins: Vec<String>,
}

fn default_host() -> String {
  "0.0.0.0".into()
}

fn default_http_port() -> u16 {
  8080
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_http_port(),
      cors_origins: vec!["*".to_string()],
    }
  }
}

/// Static bearer tokens. Disabled auth treats every caller as admin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub admin_token: Option<String>,
  #[serde(default)]
  pub user_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
  /// Per-request deadline in milliseconds (0 = no timeout)
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
  30000 // 30 seconds
}

impl Default for LimitsSection {
  fn default() -> Self {
    Self {
      request_timeout_ms: default_request_timeout_ms(),
    }
  }
}

impl LimitsSection {
  pub fn request_timeout(&self) -> Option<Duration> {
    (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSection {
  #[serde(default = "default_pg_url")]
  pub url: String,
  #[serde(default = "default_max_conn")]
  pub max_connections: usize,
}
fn default_pg_url() -> String {
  "postgres://localhost/banners".into()
}
fn default_max_conn() -> usize {
  20
}
impl Default for PostgresSection {
  fn default() -> Self {
    Self {
      url: default_pg_url(),
      max_connections: default_max_conn(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSection {
  #[serde(default = "default_sqlite_path")]
  pub path: String,
}
fn default_sqlite_path() -> String {
  "banners.db".into()
}
impl Default for SqliteSection {
  fn default() -> Self {
    Self {
      path: default_sqlite_path(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    let config: Self = serde_yaml::from_str(&expanded)?;
    config.cache.max_memory_bytes()?;
    Ok(config)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    Self::find_and_load_in(".")
  }

  /// Look for `bannerd.yaml` / `bannerd.yml` in `dir`
  pub fn find_and_load_in(dir: impl AsRef<Path>) -> Result<Option<Self>, anyhow::Error> {
    for name in ["bannerd.yaml", "bannerd.yml"] {
      let p = dir.as_ref().join(name);
      if p.exists() {
        tracing::info!("Loading config from {}", p.display());
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }
}
