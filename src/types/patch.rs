use serde::{Deserialize, Deserializer};

/// A field in a partial update: either left alone or replaced.
///
/// Deserializes from an optional value, so an absent field and an explicit
/// `null` both mean `Unchanged`. Use together with `#[serde(default)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch<T> {
  Unchanged,
  Set(T),
}

impl<T> Default for Patch<T> {
  fn default() -> Self {
    Patch::Unchanged
  }
}

impl<T> Patch<T> {
  pub fn as_set(&self) -> Option<&T> {
    match self {
      Patch::Set(v) => Some(v),
      Patch::Unchanged => None,
    }
  }

  /// Value after applying the patch on top of `current`
  pub fn resolve(self, current: T) -> T {
    match self {
      Patch::Set(v) => v,
      Patch::Unchanged => current,
    }
  }
}

impl<T> From<Option<T>> for Patch<T> {
  fn from(value: Option<T>) -> Self {
    match value {
      Some(v) => Patch::Set(v),
      None => Patch::Unchanged,
    }
  }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Option::<T>::deserialize(deserializer).map(Patch::from)
  }
}
