mod auth;
mod config;
mod daemon;
mod routes;

pub use auth::{authenticate, AuthError, Role};
pub use config::{
  AuthSection, BackendType, LimitsSection, LoggingSection, PostgresSection, ServerConfig,
  ServerSection, SqliteSection,
};
pub use daemon::{Backends, Daemon};
pub use routes::{router, AppState};
