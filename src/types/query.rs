use serde::{Deserialize, Serialize};

use super::{FeatureId, TagId};

/// Equality filters and pagination for banner listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerFilter {
  pub feature_id: Option<FeatureId>,
  pub tag_id: Option<TagId>,
  pub limit: Option<usize>,
  pub offset: Option<usize>,
}

impl BannerFilter {
  /// Filter selecting the banner bound to exactly one `(feature, tag)` pair
  pub fn pair(feature_id: FeatureId, tag_id: TagId) -> Self {
    Self {
      feature_id: Some(feature_id),
      tag_id: Some(tag_id),
      limit: None,
      offset: None,
    }
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}
