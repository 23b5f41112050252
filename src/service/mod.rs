//! Banner resolution: cache-aside reads and validated writes

mod error;
mod populator;
mod resolver;

pub use error::BannerError;
pub use populator::{CachePopulator, PopulationConfig, PopulatorStats};
pub use resolver::BannerResolver;
