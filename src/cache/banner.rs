//! Banner read-through cache on top of a [`CacheStore`]
//!
//! Two key families are written per banner:
//! - `banner:feature_id={f},tag_id={t}` holds the banner id for a pair
//! - `banner-data:{id}` holds the full banner document as JSON
//!
//! Both share one TTL. The view is derived and may be stale up to that TTL.

use std::sync::Arc;
use std::time::Duration;

use super::store::{CacheStore, CacheStoreError};
use crate::types::{Banner, BannerId, FeatureId, TagId};

pub fn pair_key(feature_id: FeatureId, tag_id: TagId) -> String {
  format!("banner:feature_id={feature_id},tag_id={tag_id}")
}

pub fn data_key(id: BannerId) -> String {
  format!("banner-data:{id}")
}

#[derive(Clone)]
pub struct BannerCache {
  store: Arc<dyn CacheStore>,
  ttl: Duration,
}

impl BannerCache {
  pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
    Self { store, ttl }
  }

  /// Two-step lookup. A miss at either step is `Ok(None)`; an unreadable
  /// value is `InvalidValue`.
  pub async fn get(
    &self,
    feature_id: FeatureId,
    tag_id: TagId,
  ) -> Result<Option<Banner>, CacheStoreError> {
    let Some(raw_id) = self.store.get(&pair_key(feature_id, tag_id)).await? else {
      return Ok(None);
    };
    let id: BannerId = raw_id
      .trim()
      .parse()
      .map_err(|_| CacheStoreError::InvalidValue(format!("banner id {raw_id:?}")))?;

    let Some(document) = self.store.get(&data_key(id)).await? else {
      return Ok(None);
    };
    serde_json::from_str(&document)
      .map(Some)
      .map_err(|e| CacheStoreError::InvalidValue(format!("banner {id}: {e}")))
  }

  /// Write every pair key and the document key in one pipelined batch
  pub async fn put(&self, banner: &Banner) -> Result<(), CacheStoreError> {
    let document = serde_json::to_string(banner)
      .map_err(|e| CacheStoreError::InvalidValue(e.to_string()))?;

    let id = banner.id.to_string();
    let mut entries: Vec<(String, String)> = banner
      .pairs()
      .map(|(f, t)| (pair_key(f, t), id.clone()))
      .collect();
    entries.push((data_key(banner.id), document));

    self.store.set_many(entries, Some(self.ttl)).await
  }
}
