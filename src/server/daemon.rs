use std::sync::Arc;
use tokio::sync::broadcast;

use super::routes::{router, AppState};
use super::ServerConfig;
use crate::cache::{BannerCache, CacheMode, CacheStore, InMemoryCacheStore, RedisProxyClient};
use crate::db::{BannerStore, FeatureValidator, TagValidator};
use crate::service::{BannerResolver, CachePopulator};

/// The store plus the reference validators, usually one backend behind three views
#[derive(Clone)]
pub struct Backends {
  pub store: Arc<dyn BannerStore>,
  pub features: Arc<dyn FeatureValidator>,
  pub tags: Arc<dyn TagValidator>,
}

impl Backends {
  pub fn from_backend<B>(backend: Arc<B>) -> Self
  where
    B: BannerStore + FeatureValidator + TagValidator + 'static,
  {
    Self {
      store: backend.clone(),
      features: backend.clone(),
      tags: backend,
    }
  }
}

pub struct Daemon {
  config: ServerConfig,
  resolver: Arc<BannerResolver>,
  /// Builtin store, swept periodically; None in redis mode
  local_cache: Option<Arc<InMemoryCacheStore>>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub async fn new(config: ServerConfig, backends: Backends) -> Result<Self, anyhow::Error> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let (cache_store, local_cache) = match config.cache.mode {
      CacheMode::Builtin => {
        let store = Arc::new(InMemoryCacheStore::new(
          config.cache.max_memory_bytes()?,
          config.cache.eviction,
        ));
        tracing::info!(
          max_memory = %config.cache.max_memory,
          eviction = %config.cache.eviction,
          "Using builtin cache"
        );
        (store.clone() as Arc<dyn CacheStore>, Some(store))
      }
      CacheMode::Redis => {
        let client = RedisProxyClient::new(&config.cache.redis).await?;
        client.test_connection().await?;
        tracing::info!("Using redis cache");
        (Arc::new(client) as Arc<dyn CacheStore>, None)
      }
    };

    let cache = BannerCache::new(cache_store, config.cache.banner_ttl());
    let populator = Arc::new(CachePopulator::new(cache.clone(), &config.population));
    tracing::info!(
      workers = config.population.workers,
      queue_capacity = config.population.queue_capacity,
      cache_mode = %config.cache.mode,
      ttl_secs = config.cache.banner_ttl_secs,
      "Cache populator started"
    );

    let resolver = Arc::new(BannerResolver::new(
      backends.store,
      backends.features,
      backends.tags,
      cache,
      populator,
    ));

    Ok(Self {
      config,
      resolver,
      local_cache,
      shutdown_tx,
    })
  }

  pub fn resolver(&self) -> &Arc<BannerResolver> {
    &self.resolver
  }

  /// Trigger graceful shutdown
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let mut shutdown_rx = self.shutdown_tx.subscribe();

    tracing::info!("Initializing database schema...");
    self.resolver.store().init_schema().await?;

    if let (Some(store), Some(interval)) =
      (self.local_cache.clone(), self.config.cache.sweep_interval())
    {
      let mut sweep_shutdown = self.shutdown_tx.subscribe();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
          tokio::select! {
            _ = ticker.tick() => {
              let expired = store.evict_expired();
              if expired > 0 {
                tracing::debug!(expired, live = store.key_count(), "Swept expired cache entries");
              }
            }
            _ = sweep_shutdown.recv() => break,
          }
        }
      });
    }

    let app = router(
      AppState::new(self.resolver.clone(), self.config.auth.clone()),
      &self.config,
    );

    let addr = self.config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("bannerd listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        tracing::info!("HTTP server shutting down");
      })
      .await?;

    // Queued cache writes finish before exit
    self.resolver.populator().shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
  }
}
