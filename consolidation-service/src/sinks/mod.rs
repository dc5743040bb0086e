use std::time::{Duration, Instant};

use turbine_client::domain::CanonicalMeasurement;

use crate::pipeline::{BatchId, BatchWriteError};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryMeasurementStore;
pub use postgres::PostgresMeasurementStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("transaction timed out after {0:?}")]
    TimedOut(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage collaborator offering a batch-atomic coalescing upsert.
///
/// Implementations must apply every record of `batch` keyed by
/// `(asset_id, ts)`, coalescing each measurement field against the stored
/// row, overwriting `source`, and commit all records or none. `batch` never
/// contains two records with the same key.
#[async_trait::async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Returns the number of records applied.
    async fn merge_batch(&self, batch: &[CanonicalMeasurement]) -> Result<u64, StoreError>;
}

#[async_trait::async_trait]
impl<S: MeasurementStore + ?Sized> MeasurementStore for std::sync::Arc<S> {
    async fn merge_batch(&self, batch: &[CanonicalMeasurement]) -> Result<u64, StoreError> {
        (**self).merge_batch(batch).await
    }
}

/// Applies deduplicated batches to a [`MeasurementStore`] with a per-attempt
/// timeout and linear retry backoff.
///
/// Retrying is safe because the upsert is idempotent per record and each
/// attempt is all-or-nothing.
pub struct MergeWriter<S> {
    store: S,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl<S: MeasurementStore> MergeWriter<S> {
    pub fn new(store: S, timeout: Duration, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            store,
            timeout,
            max_retries,
            retry_backoff,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn write(
        &self,
        batch_id: &BatchId,
        batch: &[CanonicalMeasurement],
    ) -> Result<u64, BatchWriteError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let res = match tokio::time::timeout(self.timeout, self.store.merge_batch(batch)).await {
                Ok(res) => res,
                Err(_elapsed) => Err(StoreError::TimedOut(self.timeout)),
            };

            match res {
                Ok(applied) => {
                    metrics::counter!("merge_writer_records_total").increment(applied);
                    metrics::histogram!("merge_writer_batch_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return Ok(applied);
                }
                Err(e) if attempt <= self.max_retries => {
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        batch_id = %batch_id,
                        "merge batch failed, retrying with backoff"
                    );
                    metrics::counter!("merge_writer_retries_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        attempt,
                        batch_id = %batch_id,
                        keys = batch.len(),
                        "merge batch failed, giving up"
                    );
                    metrics::counter!("merge_writer_errors_total").increment(1);
                    return Err(BatchWriteError {
                        batch_id: batch_id.clone(),
                        key_count: batch.len(),
                        attempts: attempt,
                        cause: e,
                    });
                }
            }
        }
    }
}
