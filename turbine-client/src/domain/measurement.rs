use time::OffsetDateTime;

/// Composite key of the consolidated table: one logical measurement per
/// asset per aligned timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasurementKey {
    pub asset_id: String,
    pub ts: OffsetDateTime,
}

/// Numeric measurement columns, used to address fields generically
/// (quality bounds, per-field metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum MeasurementField {
    TemperatureK,
    WindMs,
    VibrationMmS,
    ConsumptionKwh,
    EnergyKwh,
}

impl MeasurementField {
    pub const ALL: [MeasurementField; 5] = [
        MeasurementField::TemperatureK,
        MeasurementField::WindMs,
        MeasurementField::VibrationMmS,
        MeasurementField::ConsumptionKwh,
        MeasurementField::EnergyKwh,
    ];

    /// Column name in `consolidated_measurements`.
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementField::TemperatureK => "temperature_k",
            MeasurementField::WindMs => "wind_ms",
            MeasurementField::VibrationMmS => "vibration_mm_s",
            MeasurementField::ConsumptionKwh => "consumption_kwh",
            MeasurementField::EnergyKwh => "energy_kwh",
        }
    }
}

impl std::fmt::Display for MeasurementField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `consolidated_measurements`.
///
/// Every measurement and outage field is independently optional: `None`
/// means "no information", never zero or false.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanonicalMeasurement {
    pub asset_id: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub ts: OffsetDateTime,
    pub temperature_k: Option<f64>,
    pub wind_ms: Option<f64>,
    pub vibration_mm_s: Option<f64>,
    pub consumption_kwh: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub planned_outage: Option<bool>,
    pub unplanned_outage: Option<bool>,
    pub source: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub ingested_at: OffsetDateTime,
}

impl CanonicalMeasurement {
    /// An empty measurement for `(asset_id, ts)`: every field absent.
    pub fn new(
        asset_id: impl Into<String>,
        ts: OffsetDateTime,
        source: impl Into<String>,
        ingested_at: OffsetDateTime,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            ts,
            temperature_k: None,
            wind_ms: None,
            vibration_mm_s: None,
            consumption_kwh: None,
            energy_kwh: None,
            planned_outage: None,
            unplanned_outage: None,
            source: source.into(),
            ingested_at,
        }
    }

    pub fn key(&self) -> MeasurementKey {
        MeasurementKey {
            asset_id: self.asset_id.clone(),
            ts: self.ts,
        }
    }

    pub fn get(&self, field: MeasurementField) -> Option<f64> {
        match field {
            MeasurementField::TemperatureK => self.temperature_k,
            MeasurementField::WindMs => self.wind_ms,
            MeasurementField::VibrationMmS => self.vibration_mm_s,
            MeasurementField::ConsumptionKwh => self.consumption_kwh,
            MeasurementField::EnergyKwh => self.energy_kwh,
        }
    }

    pub fn field_mut(&mut self, field: MeasurementField) -> &mut Option<f64> {
        match field {
            MeasurementField::TemperatureK => &mut self.temperature_k,
            MeasurementField::WindMs => &mut self.wind_ms,
            MeasurementField::VibrationMmS => &mut self.vibration_mm_s,
            MeasurementField::ConsumptionKwh => &mut self.consumption_kwh,
            MeasurementField::EnergyKwh => &mut self.energy_kwh,
        }
    }

    /// Outage flags read as `false` when no source ever reported them.
    pub fn is_planned_outage(&self) -> bool {
        self.planned_outage.unwrap_or(false)
    }

    pub fn is_unplanned_outage(&self) -> bool {
        self.unplanned_outage.unwrap_or(false)
    }

    /// Coalesce merge of a newer record into `self`.
    ///
    /// Every field takes the newer value unless the newer value is `None`.
    /// `source` and `ingested_at` always follow the newer record. This is the
    /// same rule the storage upsert applies, so merging in memory first and
    /// in storage later yields the same row as merging twice in storage.
    pub fn merge_newer(&mut self, newer: &CanonicalMeasurement) {
        for field in MeasurementField::ALL {
            if let Some(v) = newer.get(field) {
                *self.field_mut(field) = Some(v);
            }
        }
        if newer.planned_outage.is_some() {
            self.planned_outage = newer.planned_outage;
        }
        if newer.unplanned_outage.is_some() {
            self.unplanned_outage = newer.unplanned_outage;
        }
        self.source.clone_from(&newer.source);
        self.ingested_at = newer.ingested_at;
    }

    /// Number of measurement and outage fields carrying a value.
    pub fn populated_fields(&self) -> usize {
        let numeric = MeasurementField::ALL
            .iter()
            .filter(|f| self.get(**f).is_some())
            .count();
        numeric
            + usize::from(self.planned_outage.is_some())
            + usize::from(self.unplanned_outage.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(source: &str) -> CanonicalMeasurement {
        CanonicalMeasurement::new(
            "T001",
            datetime!(2025-10-01 10:00:00 UTC),
            source,
            datetime!(2025-10-01 12:00:00 UTC),
        )
    }

    #[test]
    fn merge_newer_keeps_existing_value_when_newer_is_absent() {
        let mut stored = row("csv_production");
        stored.energy_kwh = Some(120.5);

        let mut incoming = row("api_weather");
        incoming.wind_ms = Some(8.2);

        stored.merge_newer(&incoming);

        assert_eq!(stored.energy_kwh, Some(120.5));
        assert_eq!(stored.wind_ms, Some(8.2));
        assert_eq!(stored.source, "api_weather");
    }

    #[test]
    fn merge_newer_overwrites_with_newer_value() {
        let mut stored = row("db_sensor");
        stored.wind_ms = Some(5.0);

        let mut incoming = row("api_weather");
        incoming.wind_ms = Some(7.5);

        stored.merge_newer(&incoming);
        assert_eq!(stored.wind_ms, Some(7.5));
    }

    #[test]
    fn absent_outage_flag_never_overwrites_recorded_flag() {
        let mut stored = row("csv_production");
        stored.planned_outage = Some(true);
        stored.unplanned_outage = Some(false);

        stored.merge_newer(&row("db_sensor"));

        assert_eq!(stored.planned_outage, Some(true));
        assert_eq!(stored.unplanned_outage, Some(false));
        assert!(stored.is_planned_outage());
    }

    #[test]
    fn outage_flags_read_false_when_unknown() {
        let m = row("db_sensor");
        assert!(!m.is_planned_outage());
        assert!(!m.is_unplanned_outage());
        assert_eq!(m.populated_fields(), 0);
    }

    #[test]
    fn merge_newer_is_idempotent() {
        let mut stored = row("csv_production");
        stored.energy_kwh = Some(10.0);
        let mut incoming = row("db_sensor");
        incoming.temperature_k = Some(285.0);

        stored.merge_newer(&incoming);
        let once = stored.clone();
        stored.merge_newer(&incoming);

        assert_eq!(stored, once);
    }
}
