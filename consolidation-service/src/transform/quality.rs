use std::collections::BTreeMap;

use time::{macros::datetime, OffsetDateTime};
use turbine_client::domain::{CanonicalMeasurement, MeasurementField};

use crate::config::{FieldBounds, QualityConfig};
use crate::pipeline::InvalidKeyError;
use crate::transform::normalize::{ASSET_ID, TIMESTAMP};

const MAX_ASSET_ID_CHARS: usize = 5;

/// A measurement after quality control, with the fields that were nulled.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub measurement: CanonicalMeasurement,
    pub nulled: Vec<MeasurementField>,
}

/// Nulls implausible measurement values and validates the key.
///
/// Rules:
/// - each numeric field outside its bounds is set to null, never clamped;
/// - asset_id must be 1–5 characters;
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01).
#[derive(Debug, Clone)]
pub struct QualityFilter {
    bounds: BTreeMap<MeasurementField, FieldBounds>,
}

impl QualityFilter {
    pub fn new(cfg: &QualityConfig) -> Self {
        Self {
            bounds: cfg.effective_bounds(),
        }
    }

    pub fn apply(&self, mut m: CanonicalMeasurement) -> Result<Filtered, InvalidKeyError> {
        validate_key(&m)?;

        let mut nulled = Vec::new();
        for (field, bounds) in &self.bounds {
            let slot = m.field_mut(*field);
            if let Some(v) = *slot {
                if !bounds.contains(v) {
                    *slot = None;
                    nulled.push(*field);
                }
            }
        }

        Ok(Filtered {
            measurement: m,
            nulled,
        })
    }
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::new(&QualityConfig::default())
    }
}

fn validate_key(m: &CanonicalMeasurement) -> Result<(), InvalidKeyError> {
    let len = m.asset_id.chars().count();
    if len == 0 || len > MAX_ASSET_ID_CHARS || m.asset_id.trim() != m.asset_id {
        return Err(InvalidKeyError::new(
            ASSET_ID,
            format!("'{}' must be 1-{MAX_ASSET_ID_CHARS} characters", m.asset_id),
        ));
    }

    let min_ts: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts: OffsetDateTime = datetime!(2100-01-01 00:00:00 UTC);
    if m.ts < min_ts || m.ts >= max_ts {
        return Err(InvalidKeyError::new(TIMESTAMP, "timestamp out of allowed range"));
    }

    Ok(())
}
