use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Patch;

pub type BannerId = i64;
pub type FeatureId = i64;
pub type TagId = i64;

/// Opaque banner payload. Stored and served as-is.
pub type Content = serde_json::Map<String, serde_json::Value>;

/// A banner as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
  #[serde(rename = "banner_id")]
  pub id: BannerId,
  pub tag_ids: Vec<TagId>,
  pub feature_id: FeatureId,
  pub content: Content,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Banner {
  /// Every `(feature, tag)` pair this banner answers for
  pub fn pairs(&self) -> impl Iterator<Item = (FeatureId, TagId)> + '_ {
    self.tag_ids.iter().map(move |tag| (self.feature_id, *tag))
  }
}

/// Fields of a banner that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBanner {
  pub tag_ids: Vec<TagId>,
  pub feature_id: FeatureId,
  pub content: Content,
  pub is_active: bool,
}

/// Partial update. Every field left `Unchanged` keeps its stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BannerPatch {
  #[serde(default)]
  pub tag_ids: Patch<Vec<TagId>>,
  #[serde(default)]
  pub feature_id: Patch<FeatureId>,
  #[serde(default)]
  pub content: Patch<Content>,
  #[serde(default)]
  pub is_active: Patch<bool>,
}
