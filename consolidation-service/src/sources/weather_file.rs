use std::path::PathBuf;

use serde::Deserialize;
use time::UtcOffset;

use crate::pipeline::{BatchSource, RawRecord, RawValue, SourceError, SourceKind};
use crate::transform::normalize::parse_naive;

/// Hourly forecast document in the Open-Meteo response shape.
#[derive(Debug, Deserialize)]
pub struct WeatherDocument {
    /// Offset of the local times in `hourly.time`, when the API was asked
    /// for a timezone.
    pub utc_offset_seconds: Option<i32>,
    pub hourly: Option<HourlySeries>,
}

#[derive(Debug, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default, alias = "wind_speed_10m")]
    pub windspeed_10m: Vec<Option<f64>>,
}

/// One weather record per hour, without an asset id; the orchestrator fans
/// them out to the assets of the batch.
pub fn weather_records(doc: &WeatherDocument) -> Result<Vec<RawRecord>, SourceError> {
    let Some(hourly) = &doc.hourly else {
        return Ok(Vec::new());
    };
    let offset = doc
        .utc_offset_seconds
        .map(UtcOffset::from_whole_seconds)
        .transpose()
        .map_err(|e| SourceError::Invalid(format!("invalid utc_offset_seconds: {e}")))?;

    let records = hourly
        .time
        .iter()
        .enumerate()
        .map(|(i, t)| {
            // With a known offset the local time is pinned here; otherwise the
            // text goes to the Normalizer and its naive-timestamp policy.
            let ts = match (offset, parse_naive(t)) {
                (Some(offset), Some(local)) => RawValue::Timestamp(local.assume_offset(offset)),
                _ => RawValue::Text(t.clone()),
            };
            let mut raw = RawRecord::new(SourceKind::Weather);
            raw.fields.insert("time".to_string(), Some(ts));
            raw.fields.insert(
                "temperature_2m".to_string(),
                hourly.temperature_2m.get(i).copied().flatten().map(RawValue::Float),
            );
            raw.fields.insert(
                "windspeed_10m".to_string(),
                hourly.windspeed_10m.get(i).copied().flatten().map(RawValue::Float),
            );
            raw
        })
        .collect();
    Ok(records)
}

/// Weather observations exported to a JSON file by the weather-API client.
pub struct WeatherFileSource {
    path: PathBuf,
}

impl WeatherFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl BatchSource for WeatherFileSource {
    fn name(&self) -> &'static str {
        "weather_file"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let doc: WeatherDocument = serde_json::from_str(&contents)?;
        let records = weather_records(&doc)?;
        tracing::info!(hours = records.len(), path = %self.path.display(), "weather observations loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn hourly_series_become_asset_less_weather_records() {
        let doc: WeatherDocument = serde_json::from_str(
            r#"{
                "utc_offset_seconds": 7200,
                "hourly": {
                    "time": ["2025-10-01T12:00", "2025-10-01T13:00"],
                    "temperature_2m": [18.5, null],
                    "wind_speed_10m": [21.6, 25.2]
                }
            }"#,
        )
        .unwrap();

        let records = weather_records(&doc).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, SourceKind::Weather);
        assert_eq!(
            records[0].lookup(&["time"]),
            Some(&RawValue::Timestamp(datetime!(2025-10-01 12:00:00 +02:00)))
        );
        assert_eq!(records[0].lookup(&["temperature_2m"]), Some(&RawValue::Float(18.5)));
        assert_eq!(records[1].fields.get("temperature_2m"), Some(&None));
        assert_eq!(records[1].lookup(&["windspeed_10m"]), Some(&RawValue::Float(25.2)));
        assert!(records[0].lookup(&["asset_id", "turbine_id"]).is_none());
    }

    #[test]
    fn missing_offset_leaves_time_as_text() {
        let doc: WeatherDocument = serde_json::from_str(
            r#"{"hourly": {"time": ["2025-10-01T12:00"], "temperature_2m": [10.0], "windspeed_10m": [5.0]}}"#,
        )
        .unwrap();

        let records = weather_records(&doc).unwrap();
        assert_eq!(
            records[0].lookup(&["time"]),
            Some(&RawValue::Text("2025-10-01T12:00".into()))
        );
    }

    #[test]
    fn document_without_hourly_block_is_empty() {
        let doc: WeatherDocument = serde_json::from_str(r#"{"utc_offset_seconds": 0}"#).unwrap();
        assert!(weather_records(&doc).unwrap().is_empty());
    }
}
