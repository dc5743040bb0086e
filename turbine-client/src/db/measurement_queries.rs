use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{CanonicalMeasurement, MeasurementKey};

/// Fetch the consolidated row for a single key, if any.
pub async fn fetch_measurement(
    pool: &PgPool,
    key: &MeasurementKey,
) -> Result<Option<CanonicalMeasurement>> {
    let row = sqlx::query_as::<_, CanonicalMeasurement>(
        r#"
        SELECT
            asset_id,
            ts,
            temperature_k,
            wind_ms,
            vibration_mm_s,
            consumption_kwh,
            energy_kwh,
            planned_outage,
            unplanned_outage,
            source,
            ingested_at
        FROM consolidated_measurements
        WHERE asset_id = $1
          AND ts = $2
        "#,
    )
    .bind(&key.asset_id)
    .bind(key.ts)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch a time-ordered history for a single asset over `[start, end)`.
pub async fn asset_history(
    pool: &PgPool,
    asset_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<CanonicalMeasurement>> {
    let rows = sqlx::query_as::<_, CanonicalMeasurement>(
        r#"
        SELECT
            asset_id,
            ts,
            temperature_k,
            wind_ms,
            vibration_mm_s,
            consumption_kwh,
            energy_kwh,
            planned_outage,
            unplanned_outage,
            source,
            ingested_at
        FROM consolidated_measurements
        WHERE asset_id = $1
          AND ts >= $2
          AND ts <  $3
        ORDER BY ts
        "#,
    )
    .bind(asset_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
