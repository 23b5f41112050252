use async_trait::async_trait;

use super::sanitize::InputError;
use crate::types::{Banner, BannerFilter, BannerId, BannerPatch, FeatureId, NewBanner, TagId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("banner not found")]
  NotFound,
  /// The `(feature, tag)` pair is already bound to another banner
  #[error("banner already exists for this feature and tag")]
  AlreadyExists,
  #[error(transparent)]
  Input(#[from] InputError),
  #[error("postgres error: {0}")]
  Postgres(#[from] tokio_postgres::Error),
  #[error("postgres pool error: {0}")]
  Pool(#[from] deadpool_postgres::PoolError),
  #[error("sqlite error: {0}")]
  Sqlite(#[from] tokio_rusqlite::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("malformed stored row: {0}")]
  Decode(String),
}

/// Durable storage of banners and their tag associations
#[async_trait]
pub trait BannerStore: Send + Sync {
  async fn init_schema(&self) -> Result<(), StoreError>;

  /// Cheap round trip used by readiness checks
  async fn ping(&self) -> Result<(), StoreError>;

  async fn exists_by_id(&self, id: BannerId) -> Result<bool, StoreError>;

  /// True iff some banner currently references this exact pair
  async fn exists_by_feature_tag(
    &self,
    feature_id: FeatureId,
    tag_id: TagId,
  ) -> Result<bool, StoreError>;

  /// Banners matching every provided filter, in insertion order
  async fn list(&self, filter: &BannerFilter) -> Result<Vec<Banner>, StoreError>;

  async fn get_by_id(&self, id: BannerId) -> Result<Banner, StoreError>;

  /// Insert the banner row and its tag rows in one transaction
  async fn create(&self, banner: &NewBanner) -> Result<BannerId, StoreError>;

  /// Apply a partial update atomically. Fails with `AlreadyExists` and
  /// leaves every column untouched if the resulting pairs collide with
  /// another banner.
  async fn update(&self, id: BannerId, patch: &BannerPatch) -> Result<(), StoreError>;

  /// Delete a banner; its tag rows cascade
  async fn delete_by_id(&self, id: BannerId) -> Result<(), StoreError>;
}

/// Existence check against the `features` reference table
#[async_trait]
pub trait FeatureValidator: Send + Sync {
  async fn feature_exists(&self, id: FeatureId) -> Result<bool, StoreError>;
}

/// Existence check against the `tags` reference table
#[async_trait]
pub trait TagValidator: Send + Sync {
  async fn tag_exists(&self, id: TagId) -> Result<bool, StoreError>;
}
