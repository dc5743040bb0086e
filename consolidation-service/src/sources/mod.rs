pub mod production_csv;
pub mod raw_record_file;
pub mod sensor_db;
pub mod weather_file;

pub use production_csv::ProductionCsvSource;
pub use raw_record_file::RawRecordFileSource;
pub use sensor_db::SensorDbSource;
pub use weather_file::WeatherFileSource;

use crate::pipeline::{BatchSource, RawRecord};

/// Pull every source once, concurrently, and concatenate the results in
/// source order.
///
/// A failing source is logged and skipped so the others still contribute.
pub async fn collect_batch(sources: &[Box<dyn BatchSource>]) -> Vec<RawRecord> {
    let fetched = futures::future::join_all(sources.iter().map(|s| s.fetch())).await;

    let mut batch = Vec::new();
    for (source, result) in sources.iter().zip(fetched) {
        match result {
            Ok(records) => {
                tracing::info!(source = source.name(), records = records.len(), "source extracted");
                metrics::counter!("source_records_extracted_total", "source" => source.name())
                    .increment(records.len() as u64);
                batch.extend(records);
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "source extraction failed, continuing without it");
                metrics::counter!("source_errors_total", "source" => source.name()).increment(1);
            }
        }
    }
    batch
}
