use std::time::Duration;

use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use turbine_client::domain::CanonicalMeasurement;

use super::{MeasurementStore, StoreError};

const INSERT_PREFIX: &str = "INSERT INTO consolidated_measurements (asset_id, ts, temperature_k, wind_ms, \
     vibration_mm_s, consumption_kwh, energy_kwh, planned_outage, unplanned_outage, source, ingested_at) ";

// Null incoming values keep the stored value; `source` always follows the
// latest write.
const UPSERT_CLAUSE: &str = r#"
    ON CONFLICT (asset_id, ts) DO UPDATE SET
      temperature_k = COALESCE(EXCLUDED.temperature_k, consolidated_measurements.temperature_k),
      wind_ms = COALESCE(EXCLUDED.wind_ms, consolidated_measurements.wind_ms),
      vibration_mm_s = COALESCE(EXCLUDED.vibration_mm_s, consolidated_measurements.vibration_mm_s),
      consumption_kwh = COALESCE(EXCLUDED.consumption_kwh, consolidated_measurements.consumption_kwh),
      energy_kwh = COALESCE(EXCLUDED.energy_kwh, consolidated_measurements.energy_kwh),
      planned_outage = COALESCE(EXCLUDED.planned_outage, consolidated_measurements.planned_outage),
      unplanned_outage = COALESCE(EXCLUDED.unplanned_outage, consolidated_measurements.unplanned_outage),
      source = EXCLUDED.source,
      ingested_at = EXCLUDED.ingested_at
"#;

/// Coalescing upsert into `consolidated_measurements`.
///
/// Each batch runs in one SERIALIZABLE transaction; statements are chunked
/// to `chunk_size` rows but commit together. `statement_timeout` bounds
/// every statement server-side.
pub struct PostgresMeasurementStore {
    pool: PgPool,
    chunk_size: usize,
    statement_timeout: Duration,
}

impl PostgresMeasurementStore {
    pub fn new(pool: PgPool, chunk_size: usize, statement_timeout: Duration) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
            statement_timeout,
        }
    }

    fn upsert_statement(chunk: &[CanonicalMeasurement]) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::<Postgres>::new(INSERT_PREFIX);
        builder.push_values(chunk, |mut b, m| {
            b.push_bind(&m.asset_id)
                .push_bind(m.ts)
                .push_bind(m.temperature_k)
                .push_bind(m.wind_ms)
                .push_bind(m.vibration_mm_s)
                .push_bind(m.consumption_kwh)
                .push_bind(m.energy_kwh)
                .push_bind(m.planned_outage)
                .push_bind(m.unplanned_outage)
                .push_bind(&m.source)
                .push_bind(m.ingested_at);
        });
        builder.push(UPSERT_CLAUSE);
        builder
    }
}

#[async_trait::async_trait]
impl MeasurementStore for PostgresMeasurementStore {
    async fn merge_batch(&self, batch: &[CanonicalMeasurement]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        // SET does not accept bind parameters.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let mut applied = 0;
        for chunk in batch.chunks(self.chunk_size) {
            let mut statement = Self::upsert_statement(chunk);
            applied += statement.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(records = batch.len(), applied, "consolidated_measurements upsert committed");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn upsert_statement_coalesces_every_measurement_column() {
        let m = CanonicalMeasurement::new(
            "T001",
            datetime!(2025-10-01 10:00:00 UTC),
            "db_sensor",
            datetime!(2025-10-01 12:00:00 UTC),
        );
        let records = [m];
        let builder = PostgresMeasurementStore::upsert_statement(&records);
        let sql = builder.sql();

        assert!(sql.starts_with("INSERT INTO consolidated_measurements"));
        assert!(sql.contains("ON CONFLICT (asset_id, ts) DO UPDATE SET"));
        for col in [
            "temperature_k",
            "wind_ms",
            "vibration_mm_s",
            "consumption_kwh",
            "energy_kwh",
            "planned_outage",
            "unplanned_outage",
        ] {
            assert!(
                sql.contains(&format!(
                    "{col} = COALESCE(EXCLUDED.{col}, consolidated_measurements.{col})"
                )),
                "missing coalesce for {col}"
            );
        }
        assert!(sql.contains("source = EXCLUDED.source"));
        assert!(sql.contains("$11"));
    }
}
