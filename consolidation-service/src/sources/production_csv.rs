use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use csv::StringRecord;

use crate::pipeline::{BatchSource, RawRecord, RawValue, SourceError, SourceKind};

/// Daily production export: the most recently modified
/// `<prefix>*.csv` in a directory.
///
/// Expected header columns (by name, `;`-delimited by default):
/// - date
/// - turbin_id
/// - energie_kWh (may be empty)
/// - arret_planifie, arret_non_planifie (0/1, may be empty)
///
/// Every cell is handed over as text; typing happens in the Normalizer.
pub struct ProductionCsvSource {
    dir: PathBuf,
    prefix: String,
    delimiter: u8,
}

impl ProductionCsvSource {
    pub fn new<P: Into<PathBuf>>(dir: P, prefix: impl Into<String>, delimiter: u8) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            delimiter,
        }
    }
}

/// Most recently modified file in `dir` named `<prefix>*.csv`.
pub fn latest_csv(dir: &Path, prefix: &str) -> Result<Option<PathBuf>, SourceError> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".csv"));
        if !matches {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, p)| p))
}

fn row_to_raw(record: &StringRecord, headers: &StringRecord) -> RawRecord {
    let mut raw = RawRecord::new(SourceKind::Production);
    for (name, cell) in headers.iter().zip(record.iter()) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = (!cell.trim().is_empty()).then(|| RawValue::Text(cell.to_string()));
        raw.fields.insert(name.to_string(), value);
    }
    raw
}

pub fn read_production_csv<R: std::io::Read>(
    reader: R,
    delimiter: u8,
) -> Result<Vec<RawRecord>, SourceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut rows = Vec::new();
    for result in rdr.records() {
        match result {
            Ok(record) => rows.push(row_to_raw(&record, &headers)),
            Err(e) => {
                metrics::counter!("production_csv_parse_errors_total").increment(1);
                tracing::warn!(error = %e, "skipping unreadable production CSV row");
            }
        }
    }
    Ok(rows)
}

#[async_trait::async_trait]
impl BatchSource for ProductionCsvSource {
    fn name(&self) -> &'static str {
        "production_csv"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        // The csv reader is blocking; keep it off the runtime threads.
        let dir = self.dir.clone();
        let prefix = self.prefix.clone();
        let delimiter = self.delimiter;
        tokio::task::spawn_blocking(move || {
            let Some(path) = latest_csv(&dir, &prefix)? else {
                tracing::warn!(dir = %dir.display(), %prefix, "no production CSV found");
                return Ok(Vec::new());
            };
            tracing::info!(path = %path.display(), "reading production CSV");
            read_production_csv(fs::File::open(&path)?, delimiter)
        })
        .await
        .map_err(|e| SourceError::Invalid(format!("production CSV reader task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_become_production_records_with_empty_cells_as_null() {
        let data = "date;turbin_id;energie_kWh;arret_planifie;arret_non_planifie\n\
                    2025-10-01;T001;15230;0;0\n\
                    2025-10-02;T002;;;1\n";

        let rows = read_production_csv(data.as_bytes(), b';').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source, SourceKind::Production);
        assert_eq!(
            rows[0].lookup(&["energie_kWh"]),
            Some(&RawValue::Text("15230".into()))
        );
        assert_eq!(rows[1].fields.get("energie_kWh"), Some(&None));
        assert_eq!(
            rows[1].lookup(&["arret_non_planifie"]),
            Some(&RawValue::Text("1".into()))
        );
    }

    #[test]
    fn latest_csv_of_missing_dir_is_an_error() {
        let res = latest_csv(Path::new("/nonexistent/production"), "production_");
        assert!(matches!(res, Err(SourceError::Io(_))));
    }
}
