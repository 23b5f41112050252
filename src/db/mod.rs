mod backend;
mod postgres;
pub mod sanitize;
mod sqlite;

pub use backend::{BannerStore, FeatureValidator, StoreError, TagValidator};
pub use postgres::PostgresBackend;
pub use sanitize::InputError;
pub use sqlite::SqliteBackend;
