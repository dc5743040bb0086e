use std::path::PathBuf;

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::pipeline::{BatchSource, RawRecord, SourceError};

/// NDJSON backfill source: one raw record per line, e.g.
/// `{"source":"sensor","fields":{"turbine_id":"T001","ts_utc":"2025-10-01 10:00:00","wind_ms":6.2}}`.
///
/// Blank lines are ignored; lines that fail to parse are counted and skipped.
pub struct RawRecordFileSource {
    path: PathBuf,
}

impl RawRecordFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

pub fn parse_raw_record_line(line: &str) -> Result<Option<RawRecord>, SourceError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

#[async_trait::async_trait]
impl BatchSource for RawRecordFileSource {
    fn name(&self) -> &'static str {
        "raw_record_file"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut records = Vec::new();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            match parse_raw_record_line(&line) {
                Ok(Some(raw)) => records.push(raw),
                Ok(None) => {}
                Err(e) => {
                    metrics::counter!("backfill_raw_record_parse_errors_total").increment(1);
                    tracing::warn!(line = line_no, error = %e, "skipping unparseable backfill line");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RawValue, SourceKind};

    #[test]
    fn parses_backfill_line() {
        let raw = parse_raw_record_line(
            r#"{"source":"weather","fields":{"turbine_id":"T001","time":"2025-10-01T10:00","temperature_2m":12.5}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(raw.source, SourceKind::Weather);
        assert_eq!(raw.lookup(&["temperature_2m"]), Some(&RawValue::Float(12.5)));
    }

    #[test]
    fn blank_lines_are_skipped_and_bad_lines_error() {
        assert!(parse_raw_record_line("   ").unwrap().is_none());
        assert!(matches!(
            parse_raw_record_line(r#"{"source":"satellite"}"#),
            Err(SourceError::Json(_))
        ));
    }
}
