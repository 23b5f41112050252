use crate::db::StoreError;

/// Failures surfaced by [`BannerResolver`](super::BannerResolver)
#[derive(Debug, thiserror::Error)]
pub enum BannerError {
  #[error("banner not found")]
  NotFound,
  #[error("banner already exists")]
  AlreadyExists,
  #[error("banner feature not exists")]
  FeatureNotExists,
  #[error("banner tag not exists")]
  TagNotExists,
  #[error("invalid input: {0}")]
  InvalidInput(String),
  /// Store or connection failure; never retried
  #[error(transparent)]
  Store(StoreError),
}

impl From<StoreError> for BannerError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::NotFound => BannerError::NotFound,
      StoreError::AlreadyExists => BannerError::AlreadyExists,
      StoreError::Input(e) => BannerError::InvalidInput(e.to_string()),
      other => BannerError::Store(other),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::InputError;

  #[test]
  fn test_store_error_translation() {
    assert!(matches!(
      BannerError::from(StoreError::NotFound),
      BannerError::NotFound
    ));
    assert!(matches!(
      BannerError::from(StoreError::AlreadyExists),
      BannerError::AlreadyExists
    ));
    assert!(matches!(
      BannerError::from(StoreError::Input(InputError::EmptyTagSet)),
      BannerError::InvalidInput(_)
    ));
    assert!(matches!(
      BannerError::from(StoreError::Decode("x".into())),
      BannerError::Store(_)
    ));
  }
}
