use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::PathBuf, time::Duration};
use time::UtcOffset;
use turbine_client::domain::MeasurementField;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub uri: String,
    pub max_connections: u32,
}

/// How timestamps without zone information are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaiveTimestampPolicy {
    /// Naive timestamps are already UTC.
    #[default]
    Utc,
    /// Naive timestamps are local time at a fixed offset from UTC.
    FixedOffset { hours: i8, minutes: i8 },
    /// Naive timestamps are rejected as unparseable.
    Reject,
}

impl NaiveTimestampPolicy {
    pub fn offset(&self) -> Result<Option<UtcOffset>, time::error::ComponentRange> {
        match *self {
            NaiveTimestampPolicy::Utc => Ok(Some(UtcOffset::UTC)),
            NaiveTimestampPolicy::FixedOffset { hours, minutes } => {
                UtcOffset::from_hms(hours, minutes, 0).map(Some)
            }
            NaiveTimestampPolicy::Reject => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    Kelvin,
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    MetresPerSecond,
    KilometresPerHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SourceUnits {
    pub temperature: TemperatureUnit,
    pub wind_speed: SpeedUnit,
}

impl SourceUnits {
    pub const SI: SourceUnits = SourceUnits {
        temperature: TemperatureUnit::Kelvin,
        wind_speed: SpeedUnit::MetresPerSecond,
    };
}

/// Units each source reports in. Sensors report SI; the weather API reports
/// °C and km/h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    pub production: SourceUnits,
    pub sensor: SourceUnits,
    pub weather: SourceUnits,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            production: SourceUnits::SI,
            sensor: SourceUnits::SI,
            weather: SourceUnits {
                temperature: TemperatureUnit::Celsius,
                wind_speed: SpeedUnit::KilometresPerHour,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key granularity; timestamps are truncated to a multiple of this.
    pub key_granularity_secs: i64,
    pub naive_timestamps: NaiveTimestampPolicy,
    /// Replicate asset-less weather records to every active asset of a batch.
    pub weather_fan_out: bool,
    pub units: UnitsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_granularity_secs: 3600,
            naive_timestamps: NaiveTimestampPolicy::Utc,
            weather_fan_out: true,
            units: UnitsConfig::default(),
        }
    }
}

/// Accepted range for one measurement field.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FieldBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl FieldBounds {
    pub const fn inclusive(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min,
            max,
            inclusive: true,
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        if v.is_nan() {
            return false;
        }
        let above_min = match self.min {
            Some(min) if self.inclusive => v >= min,
            Some(min) => v > min,
            None => true,
        };
        let below_max = match self.max {
            Some(max) if self.inclusive => v <= max,
            Some(max) => v < max,
            None => true,
        };
        above_min && below_max
    }

    /// Plausibility bounds applied when the configuration names none.
    pub fn defaults() -> BTreeMap<MeasurementField, FieldBounds> {
        BTreeMap::from([
            (MeasurementField::WindMs, FieldBounds::inclusive(Some(0.0), Some(42.0))),
            (
                MeasurementField::TemperatureK,
                FieldBounds::inclusive(Some(200.0), Some(330.0)),
            ),
            (
                MeasurementField::VibrationMmS,
                FieldBounds::inclusive(Some(0.0), Some(25.0)),
            ),
            (MeasurementField::EnergyKwh, FieldBounds::inclusive(Some(0.0), None)),
            (MeasurementField::ConsumptionKwh, FieldBounds::inclusive(Some(0.0), None)),
        ])
    }
}

/// Per-field overrides layered on top of [`FieldBounds::defaults`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub bounds: BTreeMap<MeasurementField, FieldBounds>,
}

impl QualityConfig {
    pub fn effective_bounds(&self) -> BTreeMap<MeasurementField, FieldBounds> {
        let mut bounds = FieldBounds::defaults();
        bounds.extend(self.bounds.iter().map(|(k, v)| (*k, *v)));
        bounds
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Rows per INSERT statement; all statements share one transaction.
    pub chunk_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 500,
            chunk_size: 500,
        }
    }
}

impl WriterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductionCsvConfig {
    pub input_dir: PathBuf,
    #[serde(default = "default_production_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl ProductionCsvConfig {
    /// The delimiter as the single byte the csv reader splits on.
    pub fn delimiter_byte(&self) -> anyhow::Result<u8> {
        if !self.delimiter.is_ascii() {
            anyhow::bail!(
                "sources.production_csv.delimiter must be an ASCII character, got '{}'",
                self.delimiter
            );
        }
        Ok(self.delimiter as u8)
    }
}

fn default_production_prefix() -> String {
    "production_".to_string()
}

fn default_delimiter() -> char {
    ';'
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorDbConfig {
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i32,
}

fn default_lookback_minutes() -> i32 {
    1440
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherFileConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    pub production_csv: Option<ProductionCsvConfig>,
    pub sensor_db: Option<SensorDbConfig>,
    pub weather_file: Option<WeatherFileConfig>,
}

fn default_poll_interval_secs() -> u64 {
    300
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            production_csv: None,
            sensor_db: None,
            weather_file: None,
        }
    }
}

impl SourcesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("CONSOLIDATION_CONFIG")
            .unwrap_or_else(|_| "consolidation-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.engine.key_granularity_secs <= 0 {
            anyhow::bail!("engine.key_granularity_secs must be positive");
        }
        if let Err(e) = self.engine.naive_timestamps.offset() {
            anyhow::bail!("engine.naive_timestamps has an invalid offset: {e}");
        }
        for (field, b) in &self.quality.bounds {
            if let (Some(min), Some(max)) = (b.min, b.max) {
                if min > max {
                    anyhow::bail!("quality.bounds.{field}: min {min} exceeds max {max}");
                }
            }
        }
        if self.writer.chunk_size == 0 {
            anyhow::bail!("writer.chunk_size must be positive");
        }
        if let Some(production) = &self.sources.production_csv {
            production.delimiter_byte()?;
        }
        Ok(())
    }
}
