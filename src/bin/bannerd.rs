use banners::cache::{CacheMode, EvictionPolicy};
use banners::db::{PostgresBackend, SqliteBackend};
use banners::server::{BackendType, Backends, Daemon, ServerConfig};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "bannerd", about = "Banner resolution server", version)]
struct Args {
  #[arg(long, env = "BANNERD_PG_URL")]
  pg_url: Option<String>,
  #[arg(long, env = "BANNERD_SQLITE_PATH")]
  sqlite: Option<String>,
  #[arg(long, env = "BANNERD_REDIS_URL")]
  redis_url: Option<String>,
  #[arg(short, long)]
  port: Option<u16>,
  #[arg(long)]
  host: Option<String>,
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  /// Banner cache TTL in seconds
  #[arg(long)]
  banner_ttl: Option<u64>,
  /// Cache mode: builtin or redis
  #[arg(long, env = "BANNERD_CACHE_MODE")]
  cache_mode: Option<CacheMode>,
  /// Eviction policy of the builtin cache
  #[arg(long)]
  eviction: Option<EvictionPolicy>,
  /// Memory limit of the builtin cache (e.g. 256mb)
  #[arg(long)]
  max_memory: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    ServerConfig::from_file(path)?
  } else {
    ServerConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(url) = args.pg_url {
    config.postgres.url = url;
    config.backend = BackendType::Postgres;
  }
  if let Some(path) = args.sqlite {
    config.sqlite.path = path;
    config.backend = BackendType::Sqlite;
  }
  if let Some(url) = args.redis_url {
    config.cache.redis.url = Some(url);
    config.cache.mode = CacheMode::Redis;
  }
  if let Some(port) = args.port {
    config.server.port = port;
  }
  if let Some(host) = args.host {
    config.server.host = host;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }
  if let Some(ttl) = args.banner_ttl {
    config.cache.banner_ttl_secs = ttl;
  }
  if let Some(mode) = args.cache_mode {
    config.cache.mode = mode;
  }
  if let Some(policy) = args.eviction {
    config.cache.eviction = policy;
  }
  if let Some(size) = args.max_memory {
    config.cache.max_memory = size;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let backends = match config.backend {
    BackendType::Postgres => {
      tracing::info!("Using PostgreSQL backend");
      Backends::from_backend(Arc::new(PostgresBackend::new(
        &config.postgres.url,
        config.postgres.max_connections,
      )?))
    }
    BackendType::Sqlite => {
      tracing::info!("Using SQLite backend at {}", config.sqlite.path);
      Backends::from_backend(Arc::new(SqliteBackend::new(&config.sqlite.path).await?))
    }
  };

  let daemon = Arc::new(Daemon::new(config, backends).await?);
  let daemon_clone = daemon.clone();

  // Handle shutdown signals (SIGINT, SIGTERM)
  tokio::spawn(async move {
    shutdown_signal().await;
    daemon_clone.shutdown();
  });

  daemon.run().await
}

async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c()
      .await
      .expect("Failed to install Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("Failed to install SIGTERM handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
