use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use ts_core::{
    is_year_column, normalize, CellValue, MatchPolicy, QueryError, Record, Series, SeriesKey,
    FIELD_COLUMN, TICKER_COLUMN,
};

#[derive(Debug, Error)]
pub enum RowSourceError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("non-numeric value {value:?} in column {column} (row {row})")]
    NonNumericCell {
        row: usize,
        column: String,
        value: String,
    },
}

impl From<RowSourceError> for QueryError {
    fn from(err: RowSourceError) -> Self {
        QueryError::read_failure(err)
    }
}

/// Anything that can list the whole dataset as flat records.
///
/// Sources are re-read on every call; implementations must not cache.
pub trait RowSource {
    fn rows(&self) -> Result<Vec<Record>, RowSourceError>;
}

impl<T: RowSource + ?Sized> RowSource for Box<T> {
    fn rows(&self) -> Result<Vec<Record>, RowSourceError> {
        (**self).rows()
    }
}

impl<T: RowSource + ?Sized> RowSource for Arc<T> {
    fn rows(&self) -> Result<Vec<Record>, RowSourceError> {
        (**self).rows()
    }
}

/// Fixed rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSource {
    rows: Vec<Record>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }
}

impl RowSource for MemoryRowSource {
    fn rows(&self) -> Result<Vec<Record>, RowSourceError> {
        Ok(self.rows.clone())
    }
}

/// CSV file with a header row; `Ticker`, `Field` and year columns.
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    path: PathBuf,
    strict_cells: bool,
}

impl CsvRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strict_cells: false,
        }
    }

    /// Reject non-numeric year cells instead of passing them on as NaN.
    pub fn with_strict_cells(mut self, strict: bool) -> Self {
        self.strict_cells = strict;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for CsvRowSource {
    fn rows(&self) -> Result<Vec<Record>, RowSourceError> {
        let file = File::open(&self.path).map_err(|source| RowSourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let rows = read_csv(file, self.strict_cells)?;
        debug!(path = %self.path.display(), rows = rows.len(), "loaded dataset");
        Ok(rows)
    }
}

/// Parses CSV content into records. A file without a header row is an empty
/// dataset; a header without `Ticker`/`Field` columns is an error.
pub fn read_csv<R: Read>(reader: R, strict_cells: bool) -> Result<Vec<Record>, RowSourceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|s| s.to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Ok(Vec::new());
    }
    verify_required_columns(&headers)?;

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let mut row = Record::new();
        for (column, raw) in headers.iter().zip(record.iter()) {
            let cell = if raw.is_empty() {
                CellValue::Empty
            } else {
                if strict_cells && is_year_column(column) && !is_finite_number(raw) {
                    return Err(RowSourceError::NonNumericCell {
                        row: idx + 1,
                        column: column.clone(),
                        value: raw.to_string(),
                    });
                }
                CellValue::Text(raw.to_string())
            };
            row.insert(column.as_str(), cell);
        }
        rows.push(row);
    }
    Ok(rows)
}

// `f64::from_str` also accepts "NaN" and "inf".
fn is_finite_number(raw: &str) -> bool {
    matches!(raw.parse::<f64>(), Ok(v) if v.is_finite())
}

fn verify_required_columns(headers: &[String]) -> Result<(), RowSourceError> {
    for required in [TICKER_COLUMN, FIELD_COLUMN] {
        if !headers.iter().any(|h| normalize(h) == required) {
            return Err(RowSourceError::MissingColumn(required.to_string()));
        }
    }
    Ok(())
}

/// Series lookup over a row source, reloading the rows for every query.
#[derive(Debug, Clone)]
pub struct SeriesEngine<S> {
    source: S,
    policy: MatchPolicy,
}

impl<S: RowSource> SeriesEngine<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policy: MatchPolicy::FirstMatch,
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Parameters are validated before the source is touched.
    pub fn query(&self, ticker: Option<&str>, metric: Option<&str>) -> Result<Series, QueryError> {
        let key = SeriesKey::new(ticker, metric)?;
        let rows = self.source.rows()?;
        ts_core::query_key(&rows, &key, self.policy)
    }
}
