pub mod dedup;
pub mod normalize;
pub mod quality;

pub use dedup::{deduplicate, Deduplicated};
pub use normalize::{fan_out_weather, Normalized, Normalizer};
pub use quality::{Filtered, QualityFilter};
