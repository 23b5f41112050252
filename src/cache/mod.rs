//! Banner caching layer
//!
//! Provides:
//! - A string key/value `CacheStore` with per-key TTL
//! - An in-memory store with memory limits and eviction policies
//! - A Redis-backed store for sharing the cache between instances
//! - `BannerCache`, the two-step banner lookup used by the resolver

mod banner;
pub mod config;
mod entry;
pub mod proxy;
mod store;

pub use banner::{data_key, pair_key, BannerCache};
pub use config::{parse_memory_size, CacheConfig, CacheMode, CacheProxyConfig};
pub use proxy::RedisProxyClient;
pub use store::{CacheStore, CacheStoreError, EvictionPolicy, InMemoryCacheStore};
