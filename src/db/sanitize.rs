//! Input checks applied before values reach SQL.
//!
//! Every query is parameterized; these checks bound pagination and normalize
//! tag sets so both backends see identical inputs.

use crate::types::TagId;

/// Largest page a single listing may request
pub const MAX_LIMIT: usize = 100_000;

/// Largest offset a single listing may request
pub const MAX_OFFSET: usize = 1_000_000;

/// Upper bound on tags attached to one banner
pub const MAX_TAGS_PER_BANNER: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
  #[error("limit too large: {0} > {max}", max = MAX_LIMIT)]
  LimitTooLarge(usize),
  #[error("offset too large: {0} > {max}", max = MAX_OFFSET)]
  OffsetTooLarge(usize),
  #[error("tag_ids must not be empty")]
  EmptyTagSet,
  #[error("too many tags: {0} > {max}", max = MAX_TAGS_PER_BANNER)]
  TooManyTags(usize),
}

pub fn validate_limit(limit: usize) -> Result<(), InputError> {
  if limit > MAX_LIMIT {
    return Err(InputError::LimitTooLarge(limit));
  }
  Ok(())
}

pub fn validate_offset(offset: usize) -> Result<(), InputError> {
  if offset > MAX_OFFSET {
    return Err(InputError::OffsetTooLarge(offset));
  }
  Ok(())
}

/// Drop repeated tag ids, keeping the first occurrence of each.
/// Rejects empty and oversized sets.
pub fn normalize_tag_ids(tag_ids: &[TagId]) -> Result<Vec<TagId>, InputError> {
  if tag_ids.is_empty() {
    return Err(InputError::EmptyTagSet);
  }

  let mut seen = std::collections::HashSet::with_capacity(tag_ids.len());
  let unique: Vec<TagId> = tag_ids
    .iter()
    .copied()
    .filter(|tag| seen.insert(*tag))
    .collect();

  if unique.len() > MAX_TAGS_PER_BANNER {
    return Err(InputError::TooManyTags(unique.len()));
  }
  Ok(unique)
}

/// Convert a validated page bound to the signed type both drivers bind
pub(crate) fn to_sql_bound(value: usize) -> i64 {
  i64::try_from(value).unwrap_or(i64::MAX)
}
