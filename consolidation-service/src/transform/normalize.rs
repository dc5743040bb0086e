use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};
use turbine_client::domain::CanonicalMeasurement;

use crate::config::{EngineConfig, SourceUnits, SpeedUnit, TemperatureUnit};
use crate::pipeline::{MalformedRecordError, RawRecord, RawValue, SourceKind};

pub const ASSET_ID: &str = "asset_id";
pub const TIMESTAMP: &str = "timestamp";

/// Raw field names each source may use for each canonical field, in lookup
/// order. An empty list means the field is not part of that source's schema.
struct SourceSchema {
    asset_id: &'static [&'static str],
    timestamp: &'static [&'static str],
    temperature: &'static [&'static str],
    wind_speed: &'static [&'static str],
    vibration_mm_s: &'static [&'static str],
    consumption_kwh: &'static [&'static str],
    energy_kwh: &'static [&'static str],
    planned_outage: &'static [&'static str],
    unplanned_outage: &'static [&'static str],
}

const ASSET_ID_NAMES: &[&str] = &["asset_id", "turbine_id", "turbin_id"];

const PRODUCTION: SourceSchema = SourceSchema {
    asset_id: ASSET_ID_NAMES,
    timestamp: &["timestamp", "date"],
    temperature: &[],
    wind_speed: &[],
    vibration_mm_s: &[],
    consumption_kwh: &[],
    energy_kwh: &["energy_kwh", "energie_kWh", "energie_kwh"],
    planned_outage: &["planned_outage", "arret_planifie"],
    unplanned_outage: &["unplanned_outage", "arret_non_planifie"],
};

const SENSOR: SourceSchema = SourceSchema {
    asset_id: ASSET_ID_NAMES,
    timestamp: &["timestamp", "date", "ts_utc"],
    temperature: &["temperature_k", "temperature"],
    wind_speed: &["wind_ms", "wind_speed_mps", "wind_speed"],
    vibration_mm_s: &["vibration_mm_s"],
    consumption_kwh: &["consumption_kwh"],
    energy_kwh: &[],
    planned_outage: &[],
    unplanned_outage: &[],
};

const WEATHER: SourceSchema = SourceSchema {
    asset_id: ASSET_ID_NAMES,
    timestamp: &["timestamp", "time", "date"],
    temperature: &["temperature", "temperature_2m", "temperature_c"],
    wind_speed: &["wind_speed", "windspeed_10m", "wind_speed_10m", "wind_kmh"],
    vibration_mm_s: &[],
    consumption_kwh: &[],
    energy_kwh: &[],
    planned_outage: &[],
    unplanned_outage: &[],
};

fn schema(source: SourceKind) -> &'static SourceSchema {
    match source {
        SourceKind::Production => &PRODUCTION,
        SourceKind::Sensor => &SENSOR,
        SourceKind::Weather => &WEATHER,
    }
}

const NAIVE_FORMATS: &[&[FormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
];

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Offset-bearing layouts outside strict RFC 3339: optional seconds, a space
/// separator, basic (`+0200`) offsets.
const ZONED_FORMATS: &[&[FormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute][offset_hour sign:mandatory][offset_minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute][offset_hour sign:mandatory][offset_minute]"),
];

pub fn celsius_to_kelvin(c: f64) -> f64 {
    c + 273.15
}

pub fn fahrenheit_to_kelvin(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0 + 273.15
}

pub fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

/// Parse a timestamp carrying an explicit offset.
pub fn parse_zoned(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    OffsetDateTime::parse(s, &Rfc3339).ok().or_else(|| {
        ZONED_FORMATS
            .iter()
            .find_map(|fmt| OffsetDateTime::parse(s, *fmt).ok())
    })
}

/// Parse a zone-less timestamp in one of the accepted layouts. A bare date
/// means midnight.
pub fn parse_naive(s: &str) -> Option<PrimitiveDateTime> {
    let s = s.trim();
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| PrimitiveDateTime::parse(s, *fmt).ok())
        .or_else(|| Date::parse(s, DATE_FORMAT).ok().map(|d| d.midnight()))
}

/// Canonical form of an asset identifier: trimmed, upper-case.
pub fn canonical_asset_id(value: &RawValue) -> Option<String> {
    let id = match value {
        RawValue::Text(s) => s.trim().to_uppercase(),
        RawValue::Int(i) => i.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Result of normalizing one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub measurement: CanonicalMeasurement,
    /// Non-key fields that could not be converted and were left null.
    pub field_errors: Vec<MalformedRecordError>,
}

/// Converts raw per-source records into canonical measurements.
#[derive(Debug, Clone)]
pub struct Normalizer {
    granularity_secs: i64,
    naive_offset: Option<UtcOffset>,
    engine: EngineConfig,
}

impl Normalizer {
    pub fn new(engine: &EngineConfig) -> anyhow::Result<Self> {
        if engine.key_granularity_secs <= 0 {
            anyhow::bail!(
                "key granularity must be positive, got {}s",
                engine.key_granularity_secs
            );
        }
        let naive_offset = engine
            .naive_timestamps
            .offset()
            .map_err(|e| anyhow::anyhow!("invalid naive timestamp offset: {e}"))?;
        Ok(Self {
            granularity_secs: engine.key_granularity_secs,
            naive_offset,
            engine: engine.clone(),
        })
    }

    fn units(&self, source: SourceKind) -> SourceUnits {
        match source {
            SourceKind::Production => self.engine.units.production,
            SourceKind::Sensor => self.engine.units.sensor,
            SourceKind::Weather => self.engine.units.weather,
        }
    }

    /// Canonical asset id of a raw record, if it carries a usable one.
    pub fn asset_id_of(&self, raw: &RawRecord) -> Option<String> {
        raw.lookup(schema(raw.source).asset_id)
            .and_then(canonical_asset_id)
    }

    pub fn normalize(
        &self,
        raw: &RawRecord,
        ingested_at: OffsetDateTime,
    ) -> Result<Normalized, MalformedRecordError> {
        let schema = schema(raw.source);
        let units = self.units(raw.source);

        let asset_id = match raw.lookup(schema.asset_id) {
            None => return Err(MalformedRecordError::new(ASSET_ID, "missing")),
            Some(v) => canonical_asset_id(v)
                .ok_or_else(|| MalformedRecordError::new(ASSET_ID, format!("unusable value {v:?}")))?,
        };
        let ts = match raw.lookup(schema.timestamp) {
            None => return Err(MalformedRecordError::new(TIMESTAMP, "missing")),
            Some(v) => self.parse_timestamp(v)?,
        };

        let mut m = CanonicalMeasurement::new(asset_id, ts, raw.source.tag(), ingested_at);
        let mut field_errors = Vec::new();

        let mut number = |names: &[&str], field: &'static str| -> Option<f64> {
            let value = raw.lookup(names)?;
            match parse_number(value) {
                Ok(v) => v,
                Err(reason) => {
                    field_errors.push(MalformedRecordError::new(field, reason));
                    None
                }
            }
        };

        m.temperature_k = number(schema.temperature, "temperature_k").map(|t| match units.temperature {
            TemperatureUnit::Kelvin => t,
            TemperatureUnit::Celsius => celsius_to_kelvin(t),
            TemperatureUnit::Fahrenheit => fahrenheit_to_kelvin(t),
        });
        m.wind_ms = number(schema.wind_speed, "wind_ms").map(|w| match units.wind_speed {
            SpeedUnit::MetresPerSecond => w,
            SpeedUnit::KilometresPerHour => kmh_to_ms(w),
        });
        m.vibration_mm_s = number(schema.vibration_mm_s, "vibration_mm_s");
        m.consumption_kwh = number(schema.consumption_kwh, "consumption_kwh");
        m.energy_kwh = number(schema.energy_kwh, "energy_kwh");

        let mut flag = |names: &[&str], field: &'static str| -> Option<bool> {
            let value = raw.lookup(names)?;
            match parse_bool(value) {
                Ok(v) => v,
                Err(reason) => {
                    field_errors.push(MalformedRecordError::new(field, reason));
                    None
                }
            }
        };
        m.planned_outage = flag(schema.planned_outage, "planned_outage");
        m.unplanned_outage = flag(schema.unplanned_outage, "unplanned_outage");

        Ok(Normalized {
            measurement: m,
            field_errors,
        })
    }

    /// Parse, convert to UTC and align to the key granularity.
    fn parse_timestamp(&self, value: &RawValue) -> Result<OffsetDateTime, MalformedRecordError> {
        let utc = match value {
            RawValue::Timestamp(ts) => *ts,
            RawValue::NaiveTimestamp(p) => self.resolve_naive(*p)?,
            RawValue::Int(secs) => OffsetDateTime::from_unix_timestamp(*secs)
                .map_err(|e| MalformedRecordError::new(TIMESTAMP, e.to_string()))?,
            RawValue::Text(s) => match parse_zoned(s) {
                Some(ts) => ts,
                None => {
                    let naive = parse_naive(s).ok_or_else(|| {
                        MalformedRecordError::new(TIMESTAMP, format!("unrecognised timestamp '{s}'"))
                    })?;
                    self.resolve_naive(naive)?
                }
            },
            other => {
                return Err(MalformedRecordError::new(
                    TIMESTAMP,
                    format!("not a timestamp: {other:?}"),
                ))
            }
        }
        .to_offset(UtcOffset::UTC);

        self.align(utc)
    }

    fn resolve_naive(&self, p: PrimitiveDateTime) -> Result<OffsetDateTime, MalformedRecordError> {
        match self.naive_offset {
            Some(offset) => Ok(p.assume_offset(offset)),
            None => Err(MalformedRecordError::new(
                TIMESTAMP,
                "timestamp has no zone and naive timestamps are rejected",
            )),
        }
    }

    fn align(&self, ts: OffsetDateTime) -> Result<OffsetDateTime, MalformedRecordError> {
        let secs = ts.unix_timestamp();
        let aligned = secs - secs.rem_euclid(self.granularity_secs);
        OffsetDateTime::from_unix_timestamp(aligned)
            .map_err(|e| MalformedRecordError::new(TIMESTAMP, e.to_string()))
    }
}

/// `Ok(None)` for an empty cell; `Err` for anything that is not a finite
/// number.
fn parse_number(value: &RawValue) -> Result<Option<f64>, String> {
    let v = match value {
        RawValue::Float(f) => *f,
        RawValue::Int(i) => *i as f64,
        RawValue::Text(s) if s.trim().is_empty() => return Ok(None),
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid number '{s}': {e}"))?,
        other => return Err(format!("not a number: {other:?}")),
    };
    if v.is_finite() {
        Ok(Some(v))
    } else {
        Err(format!("not a finite number: {v}"))
    }
}

/// Accepts `0`, `1`, `true`, `false`, `t`, `f` (case-insensitive).
fn parse_bool(value: &RawValue) -> Result<Option<bool>, String> {
    match value {
        RawValue::Bool(b) => Ok(Some(*b)),
        RawValue::Int(0) => Ok(Some(false)),
        RawValue::Int(1) => Ok(Some(true)),
        RawValue::Float(f) if *f == 0.0 => Ok(Some(false)),
        RawValue::Float(f) if *f == 1.0 => Ok(Some(true)),
        RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "t" => Ok(Some(true)),
            "0" | "false" | "f" => Ok(Some(false)),
            _ => Err(format!("invalid boolean '{s}'")),
        },
        other => Err(format!("invalid boolean {other:?}")),
    }
}

/// Replicate asset-less weather records to every active asset of the batch.
///
/// Active assets are those named by non-weather records, in first-occurrence
/// order. Each returned record carries the index of the raw record it came
/// from. Weather records that cannot be fanned out are passed through
/// unchanged so the Normalizer reports them.
pub fn fan_out_weather(normalizer: &Normalizer, batch: Vec<RawRecord>) -> Vec<(usize, RawRecord)> {
    let mut active: Vec<String> = Vec::new();
    for raw in batch.iter().filter(|r| r.source != SourceKind::Weather) {
        if let Some(id) = normalizer.asset_id_of(raw) {
            if !active.contains(&id) {
                active.push(id);
            }
        }
    }

    let mut out = Vec::with_capacity(batch.len());
    for (index, raw) in batch.into_iter().enumerate() {
        let needs_fan_out = raw.source == SourceKind::Weather
            && normalizer.asset_id_of(&raw).is_none()
            && !active.is_empty();
        if !needs_fan_out {
            out.push((index, raw));
            continue;
        }
        for id in &active {
            let mut copy = raw.clone();
            copy.fields
                .insert(ASSET_ID.to_string(), Some(RawValue::Text(id.clone())));
            out.push((index, copy));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NaiveTimestampPolicy;
    use time::macros::{datetime, offset};

    fn normalizer() -> Normalizer {
        Normalizer::new(&EngineConfig::default()).unwrap()
    }

    fn now() -> OffsetDateTime {
        datetime!(2025-10-01 12:00:00 UTC)
    }

    #[test]
    fn celsius_converts_to_kelvin() {
        assert!((celsius_to_kelvin(20.0) - 293.15).abs() < 1e-9);
        assert!((fahrenheit_to_kelvin(32.0) - 273.15).abs() < 1e-9);
        assert!((kmh_to_ms(36.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn weather_record_is_converted_to_si() {
        let raw = RawRecord::new(SourceKind::Weather)
            .with("turbine_id", "T001")
            .with("time", "2025-10-01T10:00")
            .with("temperature_2m", 20.0)
            .with("windspeed_10m", 36.0);

        let n = normalizer().normalize(&raw, now()).unwrap();
        let m = n.measurement;
        assert!((m.temperature_k.unwrap() - 293.15).abs() < 1e-9);
        assert!((m.wind_ms.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(m.ts, datetime!(2025-10-01 10:00:00 UTC));
        assert_eq!(m.source, "api_weather");
        assert!(n.field_errors.is_empty());
    }

    #[test]
    fn production_record_maps_csv_columns() {
        let raw = RawRecord::new(SourceKind::Production)
            .with("turbin_id", " t002 ")
            .with("date", "2025-10-03")
            .with("energie_kWh", "15230")
            .with("arret_planifie", "0")
            .with("arret_non_planifie", "T")
            .with("wind_ms", 9.0);

        let m = normalizer().normalize(&raw, now()).unwrap().measurement;
        assert_eq!(m.asset_id, "T002");
        assert_eq!(m.ts, datetime!(2025-10-03 00:00:00 UTC));
        assert_eq!(m.energy_kwh, Some(15230.0));
        assert_eq!(m.planned_outage, Some(false));
        assert_eq!(m.unplanned_outage, Some(true));
        // Not part of the production schema.
        assert_eq!(m.wind_ms, None);
    }

    #[test]
    fn empty_cells_stay_null() {
        let raw = RawRecord::new(SourceKind::Production)
            .with("turbin_id", "T001")
            .with("date", "2025-10-03")
            .with("energie_kWh", "")
            .with("arret_planifie", "");

        let n = normalizer().normalize(&raw, now()).unwrap();
        assert_eq!(n.measurement.energy_kwh, None);
        assert_eq!(n.measurement.planned_outage, None);
        assert_eq!(n.measurement.unplanned_outage, None);
        assert!(n.field_errors.is_empty());
    }

    #[test]
    fn bad_boolean_nulls_only_that_field() {
        let raw = RawRecord::new(SourceKind::Production)
            .with("turbin_id", "T001")
            .with("date", "2025-10-03")
            .with("energie_kWh", 100.0)
            .with("arret_planifie", "yes");

        let n = normalizer().normalize(&raw, now()).unwrap();
        assert_eq!(n.measurement.planned_outage, None);
        assert_eq!(n.measurement.energy_kwh, Some(100.0));
        assert_eq!(n.field_errors.len(), 1);
        assert_eq!(n.field_errors[0].field, "planned_outage");
    }

    #[test]
    fn unparseable_number_is_a_field_error() {
        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "2025-10-01 10:00:00")
            .with("vibration_mm_s", "n/a")
            .with("consumption_kwh", 12.5);

        let n = normalizer().normalize(&raw, now()).unwrap();
        assert_eq!(n.measurement.vibration_mm_s, None);
        assert_eq!(n.measurement.consumption_kwh, Some(12.5));
        assert_eq!(n.field_errors[0].field, "vibration_mm_s");
    }

    #[test]
    fn missing_key_is_malformed() {
        let raw = RawRecord::new(SourceKind::Sensor).with("ts_utc", "2025-10-01 10:00:00");
        let err = normalizer().normalize(&raw, now()).unwrap_err();
        assert_eq!(err.field, ASSET_ID);

        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "yesterday");
        let err = normalizer().normalize(&raw, now()).unwrap_err();
        assert_eq!(err.field, TIMESTAMP);
    }

    #[test]
    fn zoned_timestamps_convert_to_utc_and_align() {
        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "2025-10-01T12:42:17+02:00");

        let m = normalizer().normalize(&raw, now()).unwrap().measurement;
        assert_eq!(m.ts, datetime!(2025-10-01 10:00:00 UTC));
        assert_eq!(m.ts.offset(), UtcOffset::UTC);
    }

    #[test]
    fn zoned_text_layouts_are_accepted() {
        for ts in [
            "2025-10-01T12:00:00+02:00",
            "2025-10-01 12:00:00+02:00",
            "2025-10-01T12:00+02:00",
            "2025-10-01 12:00+02:00",
            "2025-10-01T12:00:00+0200",
            "2025-10-01 12:00:00+0200",
            "2025-10-01T12:00+0200",
            "2025-10-01 12:00+0200",
            "2025-10-01 12:00:00.250+02:00",
        ] {
            let raw = RawRecord::new(SourceKind::Sensor)
                .with("turbine_id", "T001")
                .with("ts_utc", ts);
            let m = normalizer()
                .normalize(&raw, now())
                .unwrap_or_else(|e| panic!("{ts}: {e}"))
                .measurement;
            assert_eq!(m.ts, datetime!(2025-10-01 10:00:00 UTC), "{ts}");
        }
    }

    #[test]
    fn zoned_text_ignores_the_naive_policy() {
        let engine = EngineConfig {
            naive_timestamps: NaiveTimestampPolicy::Reject,
            ..EngineConfig::default()
        };
        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "2025-10-01T12:00-0130");

        let m = Normalizer::new(&engine).unwrap().normalize(&raw, now()).unwrap().measurement;
        assert_eq!(m.ts, datetime!(2025-10-01 13:00:00 UTC));
    }

    #[test]
    fn invalid_engine_settings_are_refused() {
        let engine = EngineConfig {
            key_granularity_secs: 0,
            ..EngineConfig::default()
        };
        assert!(Normalizer::new(&engine).is_err());

        let engine = EngineConfig {
            naive_timestamps: NaiveTimestampPolicy::FixedOffset { hours: 30, minutes: 0 },
            ..EngineConfig::default()
        };
        assert!(Normalizer::new(&engine).is_err());
    }

    #[test]
    fn naive_timestamps_follow_configured_offset() {
        let engine = EngineConfig {
            naive_timestamps: NaiveTimestampPolicy::FixedOffset { hours: 2, minutes: 0 },
            ..EngineConfig::default()
        };
        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "2025-10-01 12:00:00");

        let m = Normalizer::new(&engine).unwrap().normalize(&raw, now()).unwrap().measurement;
        assert_eq!(m.ts, datetime!(2025-10-01 10:00:00 UTC));

        // Zoned input is unaffected by the naive policy.
        let zoned = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", datetime!(2025-10-01 12:00:00 +02:00).to_offset(offset!(+5)));
        let m = Normalizer::new(&engine).unwrap().normalize(&zoned, now()).unwrap().measurement;
        assert_eq!(m.ts, datetime!(2025-10-01 10:00:00 UTC));
    }

    #[test]
    fn naive_timestamps_can_be_rejected() {
        let engine = EngineConfig {
            naive_timestamps: NaiveTimestampPolicy::Reject,
            ..EngineConfig::default()
        };
        let raw = RawRecord::new(SourceKind::Sensor)
            .with("turbine_id", "T001")
            .with("ts_utc", "2025-10-01 12:00:00");

        let err = Normalizer::new(&engine).unwrap().normalize(&raw, now()).unwrap_err();
        assert_eq!(err.field, TIMESTAMP);
    }

    #[test]
    fn fan_out_replicates_weather_to_active_assets() {
        let batch = vec![
            RawRecord::new(SourceKind::Sensor).with("turbine_id", "t002"),
            RawRecord::new(SourceKind::Weather).with("time", "2025-10-01T10:00"),
            RawRecord::new(SourceKind::Production).with("turbin_id", "T001"),
            RawRecord::new(SourceKind::Sensor).with("turbine_id", "T002"),
        ];

        let out = fan_out_weather(&normalizer(), batch);
        let summary: Vec<(usize, SourceKind, Option<String>)> = out
            .iter()
            .map(|(i, r)| (*i, r.source, normalizer().asset_id_of(r)))
            .collect();

        assert_eq!(
            summary,
            vec![
                (0, SourceKind::Sensor, Some("T002".into())),
                (1, SourceKind::Weather, Some("T002".into())),
                (1, SourceKind::Weather, Some("T001".into())),
                (2, SourceKind::Production, Some("T001".into())),
                (3, SourceKind::Sensor, Some("T002".into())),
            ]
        );
    }

    #[test]
    fn fan_out_without_active_assets_passes_weather_through() {
        let batch = vec![RawRecord::new(SourceKind::Weather).with("time", "2025-10-01T10:00")];
        let out = fan_out_weather(&normalizer(), batch);
        assert_eq!(out.len(), 1);
        assert!(normalizer().normalize(&out[0].1, now()).is_err());
    }
}
