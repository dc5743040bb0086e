mod measurement;

pub use measurement::{CanonicalMeasurement, MeasurementField, MeasurementKey};
