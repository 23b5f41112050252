//! Background cache population
//!
//! Cache writes after a read miss are handed to a fixed pool of workers
//! through a bounded queue. Submitting never waits: when the queue is full
//! or shut down the write is dropped and counted. Workers live independently
//! of the request that produced the job.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::cache::BannerCache;
use crate::types::Banner;

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
  pub workers: usize,
  pub queue_capacity: usize,
}

impl Default for PopulationConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      queue_capacity: 1024,
    }
  }
}

/// Snapshot of populator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulatorStats {
  pub submitted: u64,
  pub completed: u64,
  pub failed: u64,
  pub dropped: u64,
}

impl PopulatorStats {
  /// Jobs accepted but not yet finished
  pub fn pending(&self) -> u64 {
    self
      .submitted
      .saturating_sub(self.completed + self.failed)
  }
}

#[derive(Default)]
struct Counters {
  submitted: AtomicU64,
  completed: AtomicU64,
  failed: AtomicU64,
  dropped: AtomicU64,
}

pub struct CachePopulator {
  tx: Mutex<Option<mpsc::Sender<Banner>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  counters: Arc<Counters>,
}

impl CachePopulator {
  /// Spawn the worker pool. Must be called inside a tokio runtime.
  pub fn new(cache: BannerCache, config: &PopulationConfig) -> Self {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let counters = Arc::new(Counters::default());

    let workers = (0..config.workers.max(1))
      .map(|worker| {
        let rx = rx.clone();
        let cache = cache.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
          loop {
            // Only the receive is serialized; writes run concurrently
            let job = rx.lock().await.recv().await;
            let Some(banner) = job else { break };

            match cache.put(&banner).await {
              Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
              }
              Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                  worker,
                  banner_id = banner.id,
                  error = %e,
                  "failed to cache banner"
                );
              }
            }
          }
          tracing::debug!(worker, "cache populator worker stopped");
        })
      })
      .collect();

    Self {
      tx: Mutex::new(Some(tx)),
      workers: Mutex::new(workers),
      counters,
    }
  }

  /// Queue a banner for caching. Returns false if the job was dropped.
  pub fn submit(&self, banner: Banner) -> bool {
    let guard = self.tx.lock();
    let Some(tx) = guard.as_ref() else {
      self.counters.dropped.fetch_add(1, Ordering::Relaxed);
      tracing::debug!(banner_id = banner.id, "cache populator stopped, dropping write");
      return false;
    };

    match tx.try_send(banner) {
      Ok(()) => {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        true
      }
      Err(TrySendError::Full(banner)) => {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(banner_id = banner.id, "cache populator queue full, dropping write");
        false
      }
      Err(TrySendError::Closed(banner)) => {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(banner_id = banner.id, "cache populator closed, dropping write");
        false
      }
    }
  }

  pub fn stats(&self) -> PopulatorStats {
    PopulatorStats {
      submitted: self.counters.submitted.load(Ordering::Relaxed),
      completed: self.counters.completed.load(Ordering::Relaxed),
      failed: self.counters.failed.load(Ordering::Relaxed),
      dropped: self.counters.dropped.load(Ordering::Relaxed),
    }
  }

  /// Stop intake, let workers drain what is queued, and wait for them
  pub async fn shutdown(&self) {
    drop(self.tx.lock().take());

    let workers = std::mem::take(&mut *self.workers.lock());
    for handle in workers {
      if let Err(e) = handle.await {
        tracing::warn!(error = %e, "cache populator worker panicked");
      }
    }

    let stats = self.stats();
    tracing::info!(
      completed = stats.completed,
      failed = stats.failed,
      dropped = stats.dropped,
      "cache populator stopped"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EvictionPolicy, InMemoryCacheStore};
  use chrono::Utc;
  use std::time::Duration;

  fn banner(id: i64) -> Banner {
    let now = Utc::now();
    Banner {
      id,
      tag_ids: vec![id],
      feature_id: 1,
      content: serde_json::Map::new(),
      is_active: true,
      created_at: now,
      updated_at: now,
    }
  }

  fn cache() -> (BannerCache, Arc<InMemoryCacheStore>) {
    let store = Arc::new(InMemoryCacheStore::new(1 << 20, EvictionPolicy::Lru));
    (
      BannerCache::new(store.clone(), Duration::from_secs(60)),
      store,
    )
  }

  #[tokio::test]
  async fn test_shutdown_drains_queue() {
    let (cache, store) = cache();
    let populator = CachePopulator::new(
      cache,
      &PopulationConfig {
        workers: 2,
        queue_capacity: 64,
      },
    );

    for id in 1..=20 {
      assert!(populator.submit(banner(id)));
    }
    populator.shutdown().await;

    let stats = populator.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.completed, 20);
    assert_eq!(stats.pending(), 0);
    // One pair key and one document key per banner
    assert_eq!(store.key_count(), 40);
  }

  #[tokio::test]
  async fn test_submit_after_shutdown_is_dropped() {
    let (cache, _) = cache();
    let populator = CachePopulator::new(cache, &PopulationConfig::default());
    populator.shutdown().await;

    assert!(!populator.submit(banner(1)));
    assert_eq!(populator.stats().dropped, 1);
  }

  #[tokio::test(flavor = "current_thread")]
  async fn test_full_queue_drops_without_blocking() {
    let (cache, _) = cache();
    let populator = CachePopulator::new(
      cache,
      &PopulationConfig {
        workers: 1,
        queue_capacity: 2,
      },
    );

    // On a current-thread runtime workers cannot run until we yield
    let accepted = (1..=5).filter(|id| populator.submit(banner(*id))).count();
    assert_eq!(accepted, 2);
    assert_eq!(populator.stats().dropped, 3);

    populator.shutdown().await;
    assert_eq!(populator.stats().completed, 2);
  }
}
