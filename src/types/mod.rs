mod banner;
mod patch;
mod query;

pub use banner::{Banner, BannerId, BannerPatch, Content, FeatureId, NewBanner, TagId};
pub use patch::Patch;
pub use query::BannerFilter;
