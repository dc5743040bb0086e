use serde::Serialize;
use turbine_client::domain::{CanonicalMeasurement, MeasurementField};

/// Content-derived batch identifier.
///
/// Computed from the prepared records (ingestion time excluded), so a retry
/// of the same raw batch reports the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn from_records(records: &[CanonicalMeasurement]) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(&(records.len() as u64).to_le_bytes());
        for m in records {
            hash_str(&mut h, &m.asset_id);
            h.update(&m.ts.unix_timestamp_nanos().to_le_bytes());
            for field in MeasurementField::ALL {
                hash_opt_f64(&mut h, m.get(field));
            }
            hash_opt_bool(&mut h, m.planned_outage);
            hash_opt_bool(&mut h, m.unplanned_outage);
            hash_str(&mut h, &m.source);
        }
        let hex = h.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hasher.update(&x.to_bits().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_opt_bool(hasher: &mut blake3::Hasher, v: Option<bool>) {
    let tag: u8 = match v {
        None => 0,
        Some(false) => 1,
        Some(true) => 2,
    };
    hasher.update(&[tag]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn m(wind: Option<f64>, ingested_at: time::OffsetDateTime) -> CanonicalMeasurement {
        let mut m = CanonicalMeasurement::new(
            "T001",
            datetime!(2025-10-01 10:00:00 UTC),
            "db_sensor",
            ingested_at,
        );
        m.wind_ms = wind;
        m
    }

    #[test]
    fn batch_id_ignores_ingestion_time() {
        let a = BatchId::from_records(&[m(Some(5.0), datetime!(2025-10-01 11:00:00 UTC))]);
        let b = BatchId::from_records(&[m(Some(5.0), datetime!(2025-10-02 09:30:00 UTC))]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn batch_id_distinguishes_null_from_value() {
        let now = datetime!(2025-10-01 11:00:00 UTC);
        assert_ne!(
            BatchId::from_records(&[m(None, now)]),
            BatchId::from_records(&[m(Some(0.0), now)])
        );
    }
}
