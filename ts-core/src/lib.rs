use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use thiserror::Error;

/// Column holding the company identifier.
pub const TICKER_COLUMN: &str = "ticker";
/// Column holding the metric name.
pub const FIELD_COLUMN: &str = "field";

/// Canonical form of an identifier: trimmed and lower-cased.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Same as [`normalize`], with an absent value mapping to the empty key.
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}

/// Renders a number the way a browser prints it: no trailing `.0` on
/// integral values and `Infinity`/`-Infinity`/`NaN` for non-finite ones.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        // Avoid "-0".
        "0".to_string()
    } else {
        format!("{n}")
    }
}

/// True for column names made of exactly four decimal digits.
pub fn is_year_column(name: &str) -> bool {
    name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit())
}

/// Raw cell content as produced by a row source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    /// Numeric coercion. Text is parsed after trimming (blank text is zero,
    /// unparseable text is NaN). Empty cells have no value at all.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Some(0.0)
                } else {
                    Some(s.parse::<f64>().unwrap_or(f64::NAN))
                }
            }
            CellValue::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Normalized key form of the cell, used for ticker/field comparison.
    pub fn normalized(&self) -> String {
        match self {
            CellValue::Number(n) => normalize(&format_number(*n)),
            CellValue::Text(s) => normalize(s),
            CellValue::Empty => String::new(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// One flat row of the dataset: column name -> raw cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    cells: BTreeMap<String, CellValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures and in-memory sources.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Exact column lookup.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }

    /// First column whose normalized name equals `key` (already normalized).
    pub fn get_normalized(&self, key: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| normalize(name) == key)
            .map(|(_, v)| v)
    }

    pub fn ticker(&self) -> Option<&CellValue> {
        self.get_normalized(TICKER_COLUMN)
    }

    pub fn field(&self) -> Option<&CellValue> {
        self.get_normalized(FIELD_COLUMN)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn matches(&self, ticker_key: &str, metric_key: &str) -> bool {
        let ticker = self.ticker().map(CellValue::normalized).unwrap_or_default();
        let field = self.field().map(CellValue::normalized).unwrap_or_default();
        ticker == ticker_key && field == metric_key
    }

    /// Projects every year column into a point, ascending by year.
    /// Empty cells produce no point; zero and NaN values are kept.
    pub fn project(&self) -> Series {
        let points = self
            .columns()
            .filter(|(name, _)| is_year_column(name))
            .filter_map(|(name, cell)| {
                cell.as_number().map(|value| SeriesPoint {
                    year: name.to_string(),
                    value,
                })
            })
            .collect();
        Series::from_points(points)
    }
}

impl<K: Into<String>, V: Into<CellValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            cells: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One year of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub year: String,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(year: impl Into<String>, value: f64) -> Self {
        Self {
            year: year.into(),
            value,
        }
    }

    /// Numeric year used for ordering; non-numeric labels sort last.
    pub fn year_number(&self) -> u32 {
        self.year.parse().unwrap_or(u32::MAX)
    }

    /// Zero means "no data reported" for that year.
    pub fn is_absent(&self) -> bool {
        self.value == 0.0
    }
}

/// Ordered year -> value points for one (ticker, metric).
/// Serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<SeriesPoint>", into = "Vec<SeriesPoint>")]
pub struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    /// Sorts by ascending year and keeps the first point for a repeated year.
    pub fn from_points(mut points: Vec<SeriesPoint>) -> Self {
        points.sort_by_key(SeriesPoint::year_number);
        points.dedup_by(|later, earlier| later.year == earlier.year);
        Self { points }
    }

    pub fn as_slice(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeriesPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn years(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.year.as_str())
    }

    /// The view handed to the presentation layer: zero-valued points dropped.
    pub fn without_absent(&self) -> Series {
        Series {
            points: self
                .points
                .iter()
                .filter(|p| !p.is_absent())
                .cloned()
                .collect(),
        }
    }

    pub fn into_points(self) -> Vec<SeriesPoint> {
        self.points
    }
}

impl From<Vec<SeriesPoint>> for Series {
    fn from(points: Vec<SeriesPoint>) -> Self {
        Series::from_points(points)
    }
}

impl From<Series> for Vec<SeriesPoint> {
    fn from(series: Series) -> Self {
        series.points
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a SeriesPoint;
    type IntoIter = std::slice::Iter<'a, SeriesPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// How duplicate (ticker, field) rows are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPolicy {
    /// Use the first matching row in source order.
    #[default]
    FirstMatch,
    /// Fail with [`QueryError::AmbiguousMatch`] when more than one row matches.
    RejectDuplicates,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("ticker and metric are required")]
    InvalidRequest,
    #[error("row source produced no rows")]
    EmptyDataset,
    #[error("no row for ticker {ticker:?} and metric {metric:?}")]
    NotFound { ticker: String, metric: String },
    #[error("{count} rows match ticker {ticker:?} and metric {metric:?}")]
    AmbiguousMatch {
        ticker: String,
        metric: String,
        count: usize,
    },
    #[error("row source read failed: {0}")]
    ReadFailure(#[source] Box<dyn StdError + Send + Sync>),
}

impl QueryError {
    pub fn read_failure(err: impl StdError + Send + Sync + 'static) -> Self {
        QueryError::ReadFailure(Box::new(err))
    }
}

/// A validated (ticker, metric) lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    ticker: String,
    metric: String,
}

impl SeriesKey {
    /// Normalizes both parts; either one being blank is an invalid request.
    pub fn new(ticker: Option<&str>, metric: Option<&str>) -> Result<Self, QueryError> {
        let ticker = normalize_opt(ticker);
        let metric = normalize_opt(metric);
        if ticker.is_empty() || metric.is_empty() {
            return Err(QueryError::InvalidRequest);
        }
        Ok(Self { ticker, metric })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    fn not_found(&self) -> QueryError {
        QueryError::NotFound {
            ticker: self.ticker.clone(),
            metric: self.metric.clone(),
        }
    }
}

/// Looks up one (ticker, metric) row with first-match-wins semantics.
pub fn query(rows: &[Record], ticker: &str, metric: &str) -> Result<Series, QueryError> {
    query_with(rows, ticker, metric, MatchPolicy::FirstMatch)
}

pub fn query_with(
    rows: &[Record],
    ticker: &str,
    metric: &str,
    policy: MatchPolicy,
) -> Result<Series, QueryError> {
    let key = SeriesKey::new(Some(ticker), Some(metric))?;
    query_key(rows, &key, policy)
}

/// Core lookup over already-materialized rows.
pub fn query_key(rows: &[Record], key: &SeriesKey, policy: MatchPolicy) -> Result<Series, QueryError> {
    if rows.is_empty() {
        return Err(QueryError::EmptyDataset);
    }

    let mut matches = rows
        .iter()
        .filter(|row| row.matches(&key.ticker, &key.metric));
    let row = matches.next().ok_or_else(|| key.not_found())?;

    if policy == MatchPolicy::RejectDuplicates {
        let extra = matches.count();
        if extra > 0 {
            return Err(QueryError::AmbiguousMatch {
                ticker: key.ticker.clone(),
                metric: key.metric.clone(),
                count: extra + 1,
            });
        }
    }

    Ok(row.project())
}
