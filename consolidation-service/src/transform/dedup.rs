use std::collections::HashMap;

use turbine_client::domain::{CanonicalMeasurement, MeasurementKey};

#[derive(Debug, Clone, PartialEq)]
pub struct Deduplicated {
    /// At most one record per key, in first-occurrence order of the key.
    pub records: Vec<CanonicalMeasurement>,
    /// Records folded into an earlier record with the same key.
    pub merged_away: usize,
}

/// Collapse records sharing `(asset_id, ts)` into one, in arrival order.
///
/// Later records are merged into the first record for their key with the
/// same coalesce rule the storage upsert applies: later non-null values win,
/// nulls never overwrite, and `source` follows the later record. The map only
/// indexes into the output vector, so output order never depends on hashing.
pub fn deduplicate(batch: Vec<CanonicalMeasurement>) -> Deduplicated {
    let mut positions: HashMap<MeasurementKey, usize> = HashMap::with_capacity(batch.len());
    let mut records: Vec<CanonicalMeasurement> = Vec::with_capacity(batch.len());
    let mut merged_away = 0;

    for m in batch {
        match positions.get(&m.key()) {
            Some(&pos) => {
                records[pos].merge_newer(&m);
                merged_away += 1;
            }
            None => {
                positions.insert(m.key(), records.len());
                records.push(m);
            }
        }
    }

    Deduplicated {
        records,
        merged_away,
    }
}
