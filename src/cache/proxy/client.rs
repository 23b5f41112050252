//! Redis client backing the cache with an external server

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::time::Duration;

use crate::cache::config::CacheProxyConfig;
use crate::cache::store::{CacheStore, CacheStoreError};

/// Cache store that forwards to an external Redis server
pub struct RedisProxyClient {
  connection: ConnectionManager,
}

impl RedisProxyClient {
  /// Create a new Redis proxy client from configuration
  pub async fn new(config: &CacheProxyConfig) -> Result<Self, RedisError> {
    Self::connect(&config.connection_url()).await
  }

  /// Connect using a `redis://` or `rediss://` URL
  pub async fn connect(url: &str) -> Result<Self, RedisError> {
    let client = Client::open(url)?;
    let connection = ConnectionManager::new(client).await?;

    Ok(Self { connection })
  }

  /// Test the connection to Redis
  pub async fn test_connection(&self) -> Result<(), RedisError> {
    let mut conn = self.connection.clone();
    redis::cmd("PING").query_async::<()>(&mut conn).await?;
    Ok(())
  }
}

/// Redis SETEX needs whole seconds, at least one
fn ttl_secs(ttl: Duration) -> u64 {
  ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisProxyClient {
  async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
    let mut conn = self.connection.clone();
    let value: Option<String> = conn.get(key).await?;
    Ok(value)
  }

  async fn set_many(
    &self,
    entries: Vec<(String, String)>,
    ttl: Option<Duration>,
  ) -> Result<(), CacheStoreError> {
    if entries.is_empty() {
      return Ok(());
    }

    let mut pipe = redis::pipe();
    for (key, value) in &entries {
      match ttl {
        Some(duration) => pipe.set_ex(key, value, ttl_secs(duration)).ignore(),
        None => pipe.set(key, value).ignore(),
      };
    }

    let mut conn = self.connection.clone();
    pipe.query_async::<()>(&mut conn).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ttl_secs_rounds_up_to_one() {
    assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
    assert_eq!(ttl_secs(Duration::from_secs(600)), 600);
  }
}
