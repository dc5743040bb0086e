use anyhow::{bail, Context, Result};
use consolidation_service::{
    config::AppConfig,
    observability,
    pipeline::{BatchSource, Consolidator},
    sinks::{MergeWriter, PostgresMeasurementStore},
    sources::RawRecordFileSource,
};
use sqlx::postgres::PgPoolOptions;
use std::env;

const DEFAULT_BATCH_SIZE: usize = 500;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_measurements <ndjson_file_path> [batch_size]");
    }
    let file_path = &args[1];
    let batch_size = match args.get(2) {
        Some(s) => s.parse::<usize>().context("batch_size must be a positive integer")?,
        None => DEFAULT_BATCH_SIZE,
    };
    if batch_size == 0 {
        bail!("batch_size must be a positive integer");
    }

    // CONSOLIDATION_CONFIG can point at a backfill-specific file.
    let cfg = AppConfig::load()?;

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

    let records = RawRecordFileSource::new(file_path).fetch().await?;
    tracing::info!(records = records.len(), batch_size, path = %file_path, "backfill loaded");

    // Batches are independent; a re-run after a failure reapplies the
    // committed ones without changing them.
    for chunk in records.chunks(batch_size) {
        match consolidator.consolidate(chunk.to_vec()).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(aborted) => {
                println!("{}", serde_json::to_string(&aborted.report)?);
                pool.close().await;
                return Err(aborted.into());
            }
        }
    }

    pool.close().await;
    Ok(())
}
