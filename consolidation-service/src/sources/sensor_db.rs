use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::pipeline::{BatchSource, RawRecord, SourceError, SourceKind};

#[derive(Debug, Clone, sqlx::FromRow)]
struct RawSensorRow {
    turbine_id: String,
    ts_utc: PrimitiveDateTime,
    wind_speed_mps: Option<f64>,
    temperature_k: Option<f64>,
    vibration_mm_s: Option<f64>,
    consumption_kwh: Option<f64>,
}

impl From<RawSensorRow> for RawRecord {
    fn from(r: RawSensorRow) -> Self {
        // `ts_utc` is stored without zone but is UTC by contract, so it is
        // handed over zoned and never goes through the naive policy.
        let mut raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", r.turbine_id)
            .with("ts_utc", r.ts_utc.assume_utc());
        for (name, value) in [
            ("wind_speed_mps", r.wind_speed_mps),
            ("temperature_k", r.temperature_k),
            ("vibration_mm_s", r.vibration_mm_s),
            ("consumption_kwh", r.consumption_kwh),
        ] {
            raw = match value {
                Some(v) => raw.with(name, v),
                None => raw.with_null(name),
            };
        }
        raw
    }
}

/// Internal telemetry from `raw_measurements` over a lookback window.
pub struct SensorDbSource {
    pool: PgPool,
    lookback_minutes: i32,
}

impl SensorDbSource {
    pub fn new(pool: PgPool, lookback_minutes: i32) -> Self {
        Self {
            pool,
            lookback_minutes,
        }
    }
}

#[async_trait::async_trait]
impl BatchSource for SensorDbSource {
    fn name(&self) -> &'static str {
        "sensor_db"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let rows = sqlx::query_as::<_, RawSensorRow>(
            r#"
            SELECT
                turbine_id,
                ts_utc,
                wind_speed_mps,
                temperature_k,
                vibration_mm_s,
                consumption_kwh
            FROM raw_measurements
            WHERE ts_utc >= (now() AT TIME ZONE 'UTC') - make_interval(mins => $1)
            ORDER BY ts_utc, turbine_id
            "#,
        )
        .bind(self.lookback_minutes)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(rows = rows.len(), lookback_minutes = self.lookback_minutes, "sensor rows extracted");
        Ok(rows.into_iter().map(RawRecord::from).collect())
    }
}
