use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use turbine_client::domain::{CanonicalMeasurement, MeasurementKey};

use super::{MeasurementStore, StoreError};

/// Ordered in-memory table with the same merge semantics as the Postgres
/// upsert.
///
/// A batch is staged against a snapshot of the rows it touches and only
/// published once every record has been applied, so a failure part-way
/// leaves the table untouched. The table lock is held for the whole batch,
/// which serializes concurrent batches.
#[derive(Debug, Default)]
pub struct InMemoryMeasurementStore {
    rows: Mutex<BTreeMap<MeasurementKey, CanonicalMeasurement>>,
    fail_after: Mutex<Option<usize>>,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `merge_batch` call with more than `applied` records
    /// fail after applying `applied` of them. One-shot: smaller batches
    /// leave the fault armed.
    pub fn fail_next_after(&self, applied: usize) {
        *lock(&self.fail_after) = Some(applied);
    }

    pub fn get(&self, key: &MeasurementKey) -> Option<CanonicalMeasurement> {
        lock(&self.rows).get(key).cloned()
    }

    /// All rows in key order.
    pub fn snapshot(&self) -> Vec<CanonicalMeasurement> {
        lock(&self.rows).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.rows).is_empty()
    }
}

// A panic while holding the lock cannot leave a half-applied batch behind,
// since rows are only extended after staging completes.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl MeasurementStore for InMemoryMeasurementStore {
    async fn merge_batch(&self, batch: &[CanonicalMeasurement]) -> Result<u64, StoreError> {
        let fail_after = {
            let mut armed = lock(&self.fail_after);
            match *armed {
                Some(n) if n < batch.len() => armed.take(),
                _ => None,
            }
        };
        let mut rows = lock(&self.rows);

        let mut staged: BTreeMap<MeasurementKey, CanonicalMeasurement> = BTreeMap::new();
        for (applied, incoming) in batch.iter().enumerate() {
            if fail_after == Some(applied) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure after {applied} of {} records",
                    batch.len()
                )));
            }

            let key = incoming.key();
            let merged = match staged.get(&key).or_else(|| rows.get(&key)) {
                Some(existing) => {
                    let mut row = existing.clone();
                    row.merge_newer(incoming);
                    row
                }
                None => incoming.clone(),
            };
            staged.insert(key, merged);
        }

        rows.extend(staged);
        Ok(batch.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn m(asset: &str, source: &str) -> CanonicalMeasurement {
        CanonicalMeasurement::new(
            asset,
            datetime!(2025-10-01 10:00:00 UTC),
            source,
            datetime!(2025-10-01 12:00:00 UTC),
        )
    }

    #[tokio::test]
    async fn partial_record_does_not_erase_stored_values() {
        let store = InMemoryMeasurementStore::new();

        let mut stored = m("T001", "csv_production");
        stored.energy_kwh = Some(120.5);
        store.merge_batch(&[stored.clone()]).await.unwrap();

        let mut incoming = m("T001", "api_weather");
        incoming.wind_ms = Some(8.2);
        store.merge_batch(&[incoming]).await.unwrap();

        let row = store.get(&stored.key()).unwrap();
        assert_eq!(row.energy_kwh, Some(120.5));
        assert_eq!(row.wind_ms, Some(8.2));
        assert_eq!(row.source, "api_weather");
    }

    #[tokio::test]
    async fn injected_failure_leaves_table_untouched() {
        let store = InMemoryMeasurementStore::new();
        let mut seed = m("T000", "db_sensor");
        seed.wind_ms = Some(3.0);
        store.merge_batch(&[seed.clone()]).await.unwrap();

        let mut update = seed.clone();
        update.wind_ms = Some(9.0);
        let batch = vec![update, m("T001", "db_sensor"), m("T002", "db_sensor")];

        store.fail_next_after(2);
        assert!(store.merge_batch(&batch).await.is_err());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&seed.key()).unwrap().wind_ms, Some(3.0));

        // Fault is one-shot.
        assert_eq!(store.merge_batch(&batch).await.unwrap(), 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn fault_stays_armed_through_smaller_batches() {
        let store = InMemoryMeasurementStore::new();
        store.fail_next_after(3);

        let small = vec![m("T001", "db_sensor"), m("T002", "db_sensor"), m("T003", "db_sensor")];
        assert_eq!(store.merge_batch(&small).await.unwrap(), 3);

        let large = vec![
            m("T004", "db_sensor"),
            m("T005", "db_sensor"),
            m("T006", "db_sensor"),
            m("T007", "db_sensor"),
        ];
        assert!(store.merge_batch(&large).await.is_err());
        assert_eq!(store.len(), 3);
        assert_eq!(store.merge_batch(&large).await.unwrap(), 4);
    }
}
