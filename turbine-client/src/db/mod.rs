mod measurement_queries;

pub use measurement_queries::{asset_history, fetch_measurement};
