//! Cache store implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::entry::CacheEntry;

/// Eviction policy when memory limit is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
  /// Least Recently Used
  #[default]
  Lru,
  /// Least Frequently Used
  Lfu,
  /// Random eviction
  Random,
  /// Don't evict, return error on memory limit
  NoEviction,
}

impl std::str::FromStr for EvictionPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "lru" => Ok(EvictionPolicy::Lru),
      "lfu" => Ok(EvictionPolicy::Lfu),
      "random" => Ok(EvictionPolicy::Random),
      "noeviction" | "no-eviction" | "no_eviction" => Ok(EvictionPolicy::NoEviction),
      _ => Err(format!("Unknown eviction policy: {}", s)),
    }
  }
}

impl std::fmt::Display for EvictionPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EvictionPolicy::Lru => write!(f, "lru"),
      EvictionPolicy::Lfu => write!(f, "lfu"),
      EvictionPolicy::Random => write!(f, "random"),
      EvictionPolicy::NoEviction => write!(f, "noeviction"),
    }
  }
}

/// Store operation error
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheStoreError {
  #[error("OOM: out of memory")]
  OutOfMemory,
  #[error("invalid value: {0}")]
  InvalidValue(String),
  #[error("cache backend error: {0}")]
  Backend(String),
}

impl From<redis::RedisError> for CacheStoreError {
  fn from(e: redis::RedisError) -> Self {
    CacheStoreError::Backend(e.to_string())
  }
}

/// String key/value store with per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;
  /// Write a group of keys with one shared TTL in a single round trip
  async fn set_many(
    &self,
    entries: Vec<(String, String)>,
    ttl: Option<Duration>,
  ) -> Result<(), CacheStoreError>;
}

/// In-memory cache store implementation
pub struct InMemoryCacheStore {
  data: RwLock<HashMap<String, CacheEntry>>,
  memory_used: AtomicUsize,
  memory_limit: usize,
  eviction_policy: EvictionPolicy,
}

impl InMemoryCacheStore {
  pub fn new(memory_limit: usize, eviction_policy: EvictionPolicy) -> Self {
    Self {
      data: RwLock::new(HashMap::new()),
      memory_used: AtomicUsize::new(0),
      memory_limit,
      eviction_policy,
    }
  }

  /// Number of live (unexpired) keys
  pub fn key_count(&self) -> usize {
    self.data.read().values().filter(|e| !e.is_expired()).count()
  }

  /// Remove every expired entry, returning how many were dropped
  pub fn evict_expired(&self) -> usize {
    let mut data = self.data.write();
    let expired_keys: Vec<String> = data
      .iter()
      .filter(|(_, entry)| entry.is_expired())
      .map(|(k, _)| k.clone())
      .collect();

    let count = expired_keys.len();
    for key in expired_keys {
      if let Some(entry) = data.remove(&key) {
        self.memory_used.fetch_sub(entry.size, Ordering::Relaxed);
      }
    }
    count
  }

  /// Evict entries until `needed` more bytes fit (based on policy)
  fn evict_for_space(
    &self,
    data: &mut HashMap<String, CacheEntry>,
    needed: usize,
  ) -> Result<(), CacheStoreError> {
    let current_used = self.memory_used.load(Ordering::Relaxed);
    if current_used + needed <= self.memory_limit {
      return Ok(());
    }
    if self.eviction_policy == EvictionPolicy::NoEviction || needed > self.memory_limit {
      return Err(CacheStoreError::OutOfMemory);
    }

    let to_free = (current_used + needed).saturating_sub(self.memory_limit);
    let mut freed = 0usize;

    while freed < to_free && !data.is_empty() {
      let key_to_evict = match self.eviction_policy {
        EvictionPolicy::Lru => data
          .iter()
          .min_by_key(|(_, entry)| entry.accessed_at)
          .map(|(k, _)| k.clone()),
        EvictionPolicy::Lfu => data
          .iter()
          .min_by_key(|(_, entry)| entry.access_count)
          .map(|(k, _)| k.clone()),
        EvictionPolicy::Random => {
          let keys: Vec<_> = data.keys().cloned().collect();
          keys.choose(&mut rand::thread_rng()).cloned()
        }
        EvictionPolicy::NoEviction => None,
      };

      let Some(key) = key_to_evict else { break };
      if let Some(entry) = data.remove(&key) {
        freed += entry.size;
      }
    }

    self.memory_used.fetch_sub(freed, Ordering::Relaxed);

    if freed >= to_free {
      Ok(())
    } else {
      Err(CacheStoreError::OutOfMemory)
    }
  }

  fn insert_locked(
    &self,
    data: &mut HashMap<String, CacheEntry>,
    key: String,
    value: String,
    ttl: Option<Duration>,
  ) -> Result<(), CacheStoreError> {
    let entry = CacheEntry::new(&key, value, ttl);

    // The replaced entry's bytes are released before making room
    if let Some(old) = data.remove(&key) {
      self.memory_used.fetch_sub(old.size, Ordering::Relaxed);
    }
    self.evict_for_space(data, entry.size)?;

    self.memory_used.fetch_add(entry.size, Ordering::Relaxed);
    data.insert(key, entry);
    Ok(())
  }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
  async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
    let mut data = self.data.write();

    let Some(entry) = data.get_mut(key) else {
      return Ok(None);
    };

    if entry.is_expired() {
      if let Some(expired_entry) = data.remove(key) {
        self
          .memory_used
          .fetch_sub(expired_entry.size, Ordering::Relaxed);
      }
      return Ok(None);
    }

    entry.touch();
    Ok(Some(entry.value.clone()))
  }

  async fn set_many(
    &self,
    entries: Vec<(String, String)>,
    ttl: Option<Duration>,
  ) -> Result<(), CacheStoreError> {
    let mut data = self.data.write();
    for (key, value) in entries {
      self.insert_locked(&mut data, key, value, ttl)?;
    }
    Ok(())
  }
}
