use std::{collections::BTreeSet, time::Instant};

use serde::Serialize;
use time::OffsetDateTime;
use turbine_client::domain::CanonicalMeasurement;

use super::{BatchId, BatchWriteError, RawRecord, RecordRejection, RejectionReason};
use crate::config::{EngineConfig, QualityConfig};
use crate::sinks::{MeasurementStore, MergeWriter};
use crate::transform::{deduplicate, fan_out_weather, Normalizer, QualityFilter};

/// Per-batch counters. Returned to the caller; never accumulated globally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Raw records submitted.
    pub records_received: usize,
    /// Extra records created by weather fan-out.
    pub records_fanned_out: usize,
    pub records_normalized: usize,
    pub records_rejected: usize,
    /// Non-key fields nulled because they could not be parsed.
    pub fields_malformed: usize,
    /// Fields nulled by quality control.
    pub fields_nulled: usize,
    pub records_deduplicated: usize,
    pub records_merged: usize,
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub stats: BatchStats,
    pub rejections: Vec<RecordRejection>,
    pub duration_ms: u64,
}

/// A batch whose storage transaction failed. Nothing was persisted; the
/// report carries the pre-write counts.
#[derive(thiserror::Error, Debug)]
#[error("batch aborted: {error}")]
pub struct BatchAborted {
    pub report: BatchReport,
    #[source]
    pub error: BatchWriteError,
}

/// A batch that went through normalization, quality control and
/// deduplication but has not been written. Dropping it has no side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    pub batch_id: BatchId,
    pub records: Vec<CanonicalMeasurement>,
    pub stats: BatchStats,
    pub rejections: Vec<RecordRejection>,
}

/// Consolidation Orchestrator: Normalizer → Quality Filter → Deduplicator →
/// Merge Writer, one batch at a time.
///
/// Holds only immutable configuration and the writer, so a single instance
/// can be shared by concurrent batches.
pub struct Consolidator<S> {
    normalizer: Normalizer,
    quality: QualityFilter,
    weather_fan_out: bool,
    writer: MergeWriter<S>,
}

impl<S: MeasurementStore> Consolidator<S> {
    pub fn new(
        engine: &EngineConfig,
        quality: &QualityConfig,
        writer: MergeWriter<S>,
    ) -> anyhow::Result<Self> {
        let normalizer = Normalizer::new(engine)?;
        tracing::info!(
            key_granularity_secs = engine.key_granularity_secs,
            naive_timestamps = ?engine.naive_timestamps,
            weather_fan_out = engine.weather_fan_out,
            "consolidation engine configured"
        );
        Ok(Self {
            normalizer,
            quality: QualityFilter::new(quality),
            weather_fan_out: engine.weather_fan_out,
            writer,
        })
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    /// Run one batch end to end.
    pub async fn consolidate(&self, batch: Vec<RawRecord>) -> Result<BatchReport, BatchAborted> {
        let started = Instant::now();
        let prepared = self.prepare(batch, OffsetDateTime::now_utc());
        self.commit(prepared, started).await
    }

    /// Normalize, filter and deduplicate without touching storage.
    ///
    /// Record-level failures exclude the record and are reported in
    /// `rejections`; they never abort the batch.
    pub fn prepare(&self, batch: Vec<RawRecord>, ingested_at: OffsetDateTime) -> PreparedBatch {
        let mut stats = BatchStats {
            records_received: batch.len(),
            ..BatchStats::default()
        };
        let mut rejections = Vec::new();
        // Fan-out copies share their raw index; a raw record is rejected once.
        let mut rejected_indices = BTreeSet::new();

        let expanded: Vec<(usize, RawRecord)> = if self.weather_fan_out {
            fan_out_weather(&self.normalizer, batch)
        } else {
            batch.into_iter().enumerate().collect()
        };
        stats.records_fanned_out = expanded.len() - stats.records_received;

        let mut clean = Vec::with_capacity(expanded.len());
        for (index, raw) in &expanded {
            let normalized = match self.normalizer.normalize(raw, ingested_at) {
                Ok(n) => n,
                Err(e) => {
                    if rejected_indices.insert(*index) {
                        rejections.push(RecordRejection {
                            index: *index,
                            source: raw.source,
                            asset_id: self.normalizer.asset_id_of(raw),
                            reason: RejectionReason::Malformed(e),
                        });
                    }
                    continue;
                }
            };
            stats.records_normalized += 1;

            for e in &normalized.field_errors {
                tracing::debug!(index, source = %raw.source, error = %e, "field nulled on parse");
                metrics::counter!("consolidation_fields_malformed_total", "field" => e.field)
                    .increment(1);
            }
            stats.fields_malformed += normalized.field_errors.len();

            let asset_id = normalized.measurement.asset_id.clone();
            match self.quality.apply(normalized.measurement) {
                Ok(filtered) => {
                    for field in &filtered.nulled {
                        metrics::counter!("consolidation_fields_nulled_total", "field" => field.as_str())
                            .increment(1);
                    }
                    stats.fields_nulled += filtered.nulled.len();
                    clean.push(filtered.measurement);
                }
                Err(e) => {
                    if rejected_indices.insert(*index) {
                        rejections.push(RecordRejection {
                            index: *index,
                            source: raw.source,
                            asset_id: Some(asset_id),
                            reason: RejectionReason::InvalidKey(e),
                        });
                    }
                }
            }
        }

        for r in &rejections {
            tracing::warn!(
                index = r.index,
                source = %r.source,
                asset_id = r.asset_id.as_deref().unwrap_or("-"),
                reason = %r.reason,
                "record rejected"
            );
            metrics::counter!("consolidation_records_rejected_total", "reason" => r.reason.label())
                .increment(1);
        }
        stats.records_rejected = rejections.len();

        let deduped = deduplicate(clean);
        stats.records_deduplicated = deduped.merged_away;
        metrics::counter!("consolidation_records_deduplicated_total")
            .increment(deduped.merged_away as u64);

        PreparedBatch {
            batch_id: BatchId::from_records(&deduped.records),
            records: deduped.records,
            stats,
            rejections,
        }
    }

    /// Apply a prepared batch. All-or-nothing.
    pub async fn commit(
        &self,
        prepared: PreparedBatch,
        started: Instant,
    ) -> Result<BatchReport, BatchAborted> {
        let PreparedBatch {
            batch_id,
            records,
            mut stats,
            rejections,
        } = prepared;

        let written = self.writer.write(&batch_id, &records).await;
        let mut report = BatchReport {
            batch_id,
            stats,
            rejections,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match written {
            Ok(_applied) => {
                stats.records_merged = records.len();
                report.stats = stats;
                metrics::counter!("consolidation_batches_committed_total").increment(1);
                tracing::info!(
                    batch_id = %report.batch_id,
                    received = stats.records_received,
                    normalized = stats.records_normalized,
                    rejected = stats.records_rejected,
                    fields_nulled = stats.fields_nulled,
                    deduplicated = stats.records_deduplicated,
                    merged = stats.records_merged,
                    duration_ms = report.duration_ms,
                    "batch committed"
                );
                Ok(report)
            }
            Err(error) => {
                metrics::counter!("consolidation_batches_aborted_total").increment(1);
                tracing::error!(
                    batch_id = %report.batch_id,
                    keys = error.key_count,
                    error = %error,
                    "batch aborted"
                );
                Err(BatchAborted { report, error })
            }
        }
    }
}
