use std::fs;
use std::path::Path;

use chart_frontend::{ChartMode, ChartModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use ts_core::{normalize, Series};

pub mod dashboard;

pub use dashboard::{Dashboard, FetchError, SeriesFetcher};

// ---------- Catalog ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub ticker: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("catalog lists no {0}")]
    Empty(&'static str),
}

/// Known companies and metrics offered for selection. Order matters: the
/// first entry of each list is the initial selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub companies: Vec<Company>,
    pub metrics: Vec<Metric>,
}

impl Default for Catalog {
    fn default() -> Self {
        let companies = [
            ("INFY", "Infosys"),
            ("TCS", "Tata Consultancy Services"),
            ("HCLTECH", "HCL Technologies"),
            ("WIPRO", "Wipro"),
            ("TECHM", "Tech Mahindra"),
        ]
        .into_iter()
        .map(|(ticker, name)| Company {
            ticker: ticker.into(),
            name: name.into(),
        })
        .collect();
        let metrics = [
            ("SALES", "Total revenue from operations."),
            (
                "EBITDA",
                "Earnings before interest, taxes, depreciation, and amortization.",
            ),
            ("PAT", "Profit after tax, net income after expenses and taxes."),
        ]
        .into_iter()
        .map(|(name, description)| Metric {
            name: name.into(),
            description: description.into(),
        })
        .collect();
        Self { companies, metrics }
    }
}

impl Catalog {
    /// Loads a YAML catalog with `companies` and `metrics` lists.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path)?;
        let catalog: Catalog = serde_yaml::from_str(&contents)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.companies.is_empty() {
            return Err(CatalogError::Empty("companies"));
        }
        if self.metrics.is_empty() {
            return Err(CatalogError::Empty("metrics"));
        }
        Ok(())
    }

    pub fn company(&self, ticker: &str) -> Option<&Company> {
        let key = normalize(ticker);
        self.companies.iter().find(|c| normalize(&c.ticker) == key)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        let key = normalize(name);
        self.metrics.iter().find(|m| normalize(&m.name) == key)
    }

    /// Initial selection; `None` only for a catalog that failed validation.
    pub fn default_selection(&self) -> Option<Selection> {
        Some(Selection {
            company: self.companies.first()?.ticker.clone(),
            metric: self.metrics.first()?.name.clone(),
            chart_mode: ChartMode::Area,
        })
    }
}

/// Two-letter badge shown next to a company.
pub fn avatar(ticker: &str) -> String {
    ticker.chars().take(2).collect()
}

// ---------- Selection state machine -------------------------------------------

/// What the user is looking at. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub company: String,
    pub metric: String,
    pub chart_mode: ChartMode,
}

impl Selection {
    /// Whether both selections ask for the same series.
    pub fn same_series(&self, other: &Selection) -> bool {
        normalize(&self.company) == normalize(&other.company)
            && normalize(&self.metric) == normalize(&other.metric)
    }
}

/// A query to run for one selection version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTicket {
    pub version: u64,
    pub company: String,
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    Ready(ChartModel),
    /// The query succeeded but nothing is left to draw.
    Empty,
    Failed(String),
}

/// Outcome of offering a query result to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Current,
    Stale,
}

#[derive(Debug)]
pub struct SelectionMachine {
    selection: Selection,
    version: u64,
    pending: Option<u64>,
    series: Option<Series>,
    view: ViewState,
}

impl SelectionMachine {
    /// Starts from the catalog default and returns the initial query.
    pub fn new(catalog: &Catalog) -> Option<(Self, QueryTicket)> {
        catalog.default_selection().map(Self::with_selection)
    }

    pub fn with_selection(selection: Selection) -> (Self, QueryTicket) {
        let mut machine = Self {
            selection,
            version: 0,
            pending: None,
            series: None,
            view: ViewState::Loading,
        };
        let ticket = machine.begin_query();
        (machine, ticket)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Last series applied for the current selection, absent points removed.
    pub fn series(&self) -> Option<&Series> {
        self.series.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_company(&mut self, company: impl Into<String>) -> Option<QueryTicket> {
        let next = Selection {
            company: company.into(),
            ..self.selection.clone()
        };
        self.transition(next)
    }

    pub fn set_metric(&mut self, metric: impl Into<String>) -> Option<QueryTicket> {
        let next = Selection {
            metric: metric.into(),
            ..self.selection.clone()
        };
        self.transition(next)
    }

    /// Re-renders the held series; never queries. Returns whether the view
    /// was rebuilt.
    pub fn set_chart_mode(&mut self, chart_mode: ChartMode) -> bool {
        if self.selection.chart_mode == chart_mode {
            return false;
        }
        self.selection = Selection {
            chart_mode,
            ..self.selection.clone()
        };
        match (&self.view, &self.series) {
            (ViewState::Ready(_), Some(series)) => {
                self.view = ViewState::Ready(ChartModel::new(chart_mode, series));
                true
            }
            _ => false,
        }
    }

    /// Applies a result only if it answers the query currently in flight.
    pub fn apply(&mut self, version: u64, result: Result<Series, String>) -> Applied {
        if self.pending != Some(version) {
            debug!(version, current = self.version, "discarding stale series");
            return Applied::Stale;
        }
        self.pending = None;
        match result {
            Ok(series) => {
                let visible = series.without_absent();
                self.view = if visible.is_empty() {
                    ViewState::Empty
                } else {
                    ViewState::Ready(ChartModel::new(self.selection.chart_mode, &visible))
                };
                self.series = Some(visible);
            }
            Err(message) => {
                self.series = None;
                self.view = ViewState::Failed(message);
            }
        }
        Applied::Current
    }

    fn transition(&mut self, next: Selection) -> Option<QueryTicket> {
        let requery = !next.same_series(&self.selection);
        self.selection = next;
        requery.then(|| self.begin_query())
    }

    fn begin_query(&mut self) -> QueryTicket {
        self.version += 1;
        self.pending = Some(self.version);
        self.series = None;
        self.view = ViewState::Loading;
        QueryTicket {
            version: self.version,
            company: self.selection.company.clone(),
            metric: self.selection.metric.clone(),
        }
    }
}
