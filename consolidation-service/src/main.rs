use anyhow::Result;
use consolidation_service::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::{BatchSource, Consolidator},
    sinks::{MergeWriter, PostgresMeasurementStore},
    sources::{self, ProductionCsvSource, SensorDbSource, WeatherFileSource},
};
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.storage.max_connections)
        .connect(&cfg.storage.uri)
        .await?;

    let store = PostgresMeasurementStore::new(pool.clone(), cfg.writer.chunk_size, cfg.writer.timeout());
    let writer = MergeWriter::new(
        store,
        cfg.writer.timeout(),
        cfg.writer.max_retries,
        cfg.writer.retry_backoff(),
    );
    let consolidator = Consolidator::new(&cfg.engine, &cfg.quality, writer)?;

    // Sensor rows go first so weather fan-out sees the live assets first.
    let mut batch_sources: Vec<Box<dyn BatchSource>> = Vec::new();
    if let Some(sensor) = &cfg.sources.sensor_db {
        batch_sources.push(Box::new(SensorDbSource::new(pool.clone(), sensor.lookback_minutes)));
    }
    if let Some(production) = &cfg.sources.production_csv {
        batch_sources.push(Box::new(ProductionCsvSource::new(
            production.input_dir.clone(),
            production.file_prefix.clone(),
            production.delimiter_byte()?,
        )));
    }
    if let Some(weather) = &cfg.sources.weather_file {
        batch_sources.push(Box::new(WeatherFileSource::new(weather.path.clone())));
    }
    if batch_sources.is_empty() {
        anyhow::bail!("no sources configured under [sources]");
    }

    tracing::info!(
        sources = batch_sources.len(),
        poll_interval_secs = cfg.sources.poll_interval_secs,
        "consolidation service started"
    );

    let mut ticker = tokio::time::interval(cfg.sources.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {}
        }

        let batch = sources::collect_batch(&batch_sources).await;
        if batch.is_empty() {
            tracing::debug!("no raw records this cycle");
            continue;
        }

        // A cycle in flight is allowed to finish; Ctrl-C is checked between
        // cycles so a batch is never cut mid-transaction by shutdown.
        match consolidator.consolidate(batch).await {
            Ok(report) => tracing::debug!(
                batch_id = %report.batch_id,
                rejections = report.rejections.len(),
                "cycle complete"
            ),
            Err(aborted) => tracing::warn!(
                batch_id = %aborted.report.batch_id,
                error = %aborted.error,
                "cycle aborted, raw records will be picked up again next cycle"
            ),
        }
    }

    pool.close().await;
    Ok(())
}
