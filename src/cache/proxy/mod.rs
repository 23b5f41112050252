//! External Redis backend for the cache

mod client;

pub use client::RedisProxyClient;
