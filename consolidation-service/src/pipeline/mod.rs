use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};

mod batch_id;
mod consolidator;
mod error;

pub use batch_id::BatchId;
pub use consolidator::{BatchAborted, BatchReport, BatchStats, Consolidator, PreparedBatch};
pub use error::{
    BatchWriteError, InvalidKeyError, MalformedRecordError, RecordRejection, RejectionReason,
    SourceError,
};

/// Which extraction collaborator produced a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Production,
    Sensor,
    Weather,
}

impl SourceKind {
    /// Tag persisted in the `source` column.
    pub fn tag(self) -> &'static str {
        match self {
            SourceKind::Production => "csv_production",
            SourceKind::Sensor => "db_sensor",
            SourceKind::Weather => "api_weather",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single untyped value as handed over by an extraction collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireValue")]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Timestamp carrying an explicit offset.
    Timestamp(OffsetDateTime),
    /// Timestamp without zone information.
    NaiveTimestamp(PrimitiveDateTime),
}

/// JSON shape of a raw value; timestamps arrive as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<WireValue> for RawValue {
    fn from(w: WireValue) -> Self {
        match w {
            WireValue::Bool(b) => RawValue::Bool(b),
            WireValue::Int(i) => RawValue::Int(i),
            WireValue::Float(f) => RawValue::Float(f),
            WireValue::Text(s) => RawValue::Text(s),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<OffsetDateTime> for RawValue {
    fn from(v: OffsetDateTime) -> Self {
        RawValue::Timestamp(v)
    }
}

impl From<PrimitiveDateTime> for RawValue {
    fn from(v: PrimitiveDateTime) -> Self {
        RawValue::NaiveTimestamp(v)
    }
}

/// Raw Source Record: a source tag plus a sparse mapping of field name to
/// optional value, in the source's own naming and units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    pub source: SourceKind,
    #[serde(default)]
    pub fields: BTreeMap<String, Option<RawValue>>,
}

impl RawRecord {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<RawValue>) -> Self {
        self.fields.insert(name.to_string(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: &str) -> Self {
        self.fields.insert(name.to_string(), None);
        self
    }

    /// First non-null value among `names`, in order.
    pub fn lookup(&self, names: &[&str]) -> Option<&RawValue> {
        names
            .iter()
            .find_map(|name| self.fields.get(*name).and_then(Option::as_ref))
    }
}

/// Extraction collaborator producing raw records on demand.
///
/// Each call returns whatever the collaborator currently has; the caller
/// assembles the results into one batch.
#[async_trait::async_trait]
pub trait BatchSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_record_deserializes_sparse_json_fields() {
        let rec: RawRecord = serde_json::from_str(
            r#"{"source":"production","fields":{"turbin_id":"t001","energie_kWh":1520.5,"arret_planifie":1,"date":"2025-10-01","note":null}}"#,
        )
        .unwrap();

        assert_eq!(rec.source, SourceKind::Production);
        assert_eq!(rec.lookup(&["turbin_id"]), Some(&RawValue::Text("t001".into())));
        assert_eq!(rec.lookup(&["energie_kWh"]), Some(&RawValue::Float(1520.5)));
        assert_eq!(rec.lookup(&["arret_planifie"]), Some(&RawValue::Int(1)));
        assert_eq!(rec.fields.get("note"), Some(&None));
    }

    #[test]
    fn lookup_skips_null_aliases() {
        let rec = RawRecord::new(SourceKind::Sensor)
            .with_null("wind_ms")
            .with("wind_speed_mps", 6.0);

        assert_eq!(rec.lookup(&["wind_ms", "wind_speed_mps"]), Some(&RawValue::Float(6.0)));
        assert_eq!(rec.lookup(&["vibration_mm_s"]), None);
    }

    #[test]
    fn source_tags_are_stable() {
        assert_eq!(SourceKind::Production.tag(), "csv_production");
        assert_eq!(SourceKind::Sensor.tag(), "db_sensor");
        assert_eq!(SourceKind::Weather.tag(), "api_weather");
    }
}
