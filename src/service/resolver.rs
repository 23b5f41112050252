use std::sync::Arc;

use super::error::BannerError;
use super::populator::CachePopulator;
use crate::cache::BannerCache;
use crate::db::sanitize::normalize_tag_ids;
use crate::db::{BannerStore, FeatureValidator, TagValidator};
use crate::types::{
  Banner, BannerFilter, BannerId, BannerPatch, FeatureId, NewBanner, Patch, TagId,
};

/// Orchestrates the cache-aside read path and the validated write path
pub struct BannerResolver {
  store: Arc<dyn BannerStore>,
  features: Arc<dyn FeatureValidator>,
  tags: Arc<dyn TagValidator>,
  cache: BannerCache,
  populator: Arc<CachePopulator>,
}

impl BannerResolver {
  pub fn new(
    store: Arc<dyn BannerStore>,
    features: Arc<dyn FeatureValidator>,
    tags: Arc<dyn TagValidator>,
    cache: BannerCache,
    populator: Arc<CachePopulator>,
  ) -> Self {
    Self {
      store,
      features,
      tags,
      cache,
      populator,
    }
  }

  pub fn store(&self) -> &Arc<dyn BannerStore> {
    &self.store
  }

  pub fn populator(&self) -> &Arc<CachePopulator> {
    &self.populator
  }

  /// Banner bound to `(feature_id, tag_id)`.
  ///
  /// With `use_last_revision` the store is read directly. Otherwise the cache
  /// answers when it can; on a miss the store result is returned right away
  /// and cached in the background. Cache failures degrade to a miss.
  pub async fn resolve_for_user(
    &self,
    feature_id: FeatureId,
    tag_id: TagId,
    use_last_revision: bool,
  ) -> Result<Banner, BannerError> {
    if use_last_revision {
      return self.load_pair(feature_id, tag_id).await;
    }

    match self.cache.get(feature_id, tag_id).await {
      Ok(Some(banner)) => return Ok(banner),
      Ok(None) => {}
      Err(e) => {
        tracing::warn!(
          feature_id,
          tag_id,
          error = %e,
          "banner cache read failed, falling back to store"
        );
      }
    }

    let banner = self.load_pair(feature_id, tag_id).await?;
    self.populator.submit(banner.clone());
    Ok(banner)
  }

  async fn load_pair(&self, feature_id: FeatureId, tag_id: TagId) -> Result<Banner, BannerError> {
    self
      .store
      .list(&BannerFilter::pair(feature_id, tag_id).with_limit(1))
      .await?
      .into_iter()
      .next()
      .ok_or(BannerError::NotFound)
  }

  /// Listing straight from the store; never cached
  pub async fn list(&self, filter: &BannerFilter) -> Result<Vec<Banner>, BannerError> {
    Ok(self.store.list(filter).await?)
  }

  pub async fn get_by_id(&self, id: BannerId) -> Result<Banner, BannerError> {
    Ok(self.store.get_by_id(id).await?)
  }

  /// Validate references and pair uniqueness, then insert.
  /// Checks stop at the first failing tag.
  pub async fn create(&self, banner: NewBanner) -> Result<BannerId, BannerError> {
    let tag_ids =
      normalize_tag_ids(&banner.tag_ids).map_err(|e| BannerError::InvalidInput(e.to_string()))?;
    if banner.content.is_empty() {
      return Err(BannerError::InvalidInput("content must not be empty".into()));
    }

    if !self.features.feature_exists(banner.feature_id).await? {
      return Err(BannerError::FeatureNotExists);
    }

    for &tag_id in &tag_ids {
      if !self.tags.tag_exists(tag_id).await? {
        return Err(BannerError::TagNotExists);
      }
      if self
        .store
        .exists_by_feature_tag(banner.feature_id, tag_id)
        .await?
      {
        return Err(BannerError::AlreadyExists);
      }
    }

    let id = self
      .store
      .create(&NewBanner { tag_ids, ..banner })
      .await?;
    tracing::info!(banner_id = id, "banner created");
    Ok(id)
  }

  /// Partial update. The cache is left to expire on its own.
  pub async fn update(&self, id: BannerId, patch: &BannerPatch) -> Result<(), BannerError> {
    if matches!(&patch.tag_ids, Patch::Set(tags) if tags.is_empty()) {
      return Err(BannerError::InvalidInput("tag_ids must not be empty".into()));
    }
    if matches!(&patch.content, Patch::Set(content) if content.is_empty()) {
      return Err(BannerError::InvalidInput("content must not be empty".into()));
    }

    if !self.store.exists_by_id(id).await? {
      return Err(BannerError::NotFound);
    }

    self.store.update(id, patch).await?;
    tracing::info!(banner_id = id, "banner updated");
    Ok(())
  }

  pub async fn delete_by_id(&self, id: BannerId) -> Result<(), BannerError> {
    self.store.delete_by_id(id).await?;
    tracing::info!(banner_id = id, "banner deleted");
    Ok(())
  }
}
