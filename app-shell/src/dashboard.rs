//! Async driver around [`SelectionMachine`]: runs queries as tasks and lets
//! only the answer for the latest selection through.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chart_frontend::ChartMode;
use series_client::{ClientError, SeriesClient};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use ts_core::Series;

use crate::{Applied, Catalog, QueryTicket, Selection, SelectionMachine, ViewState};

/// User-facing failure text for a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

impl From<ClientError> for FetchError {
    fn from(err: ClientError) -> Self {
        FetchError(err.user_message())
    }
}

/// Where series come from. The HTTP client is the production impl.
#[async_trait]
pub trait SeriesFetcher: Send + Sync + 'static {
    async fn fetch(&self, company: &str, metric: &str) -> Result<Series, FetchError>;
}

#[async_trait]
impl SeriesFetcher for SeriesClient {
    async fn fetch(&self, company: &str, metric: &str) -> Result<Series, FetchError> {
        self.fetch_series(company, metric).await.map_err(FetchError::from)
    }
}

pub struct Dashboard<F> {
    fetcher: Arc<F>,
    machine: Arc<Mutex<SelectionMachine>>,
    view_tx: watch::Sender<ViewState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: SeriesFetcher> Dashboard<F> {
    /// Builds the dashboard on the catalog default selection and dispatches
    /// the initial query. Must be called inside a Tokio runtime.
    pub fn start(catalog: &Catalog, fetcher: F) -> Option<Self> {
        let selection = catalog.default_selection()?;
        Some(Self::with_selection(selection, fetcher))
    }

    pub fn with_selection(selection: Selection, fetcher: F) -> Self {
        let (machine, ticket) = SelectionMachine::with_selection(selection);
        let (view_tx, _) = watch::channel(machine.view().clone());
        let dashboard = Self {
            fetcher: Arc::new(fetcher),
            machine: Arc::new(Mutex::new(machine)),
            view_tx,
            tasks: Mutex::new(Vec::new()),
        };
        dashboard.dispatch(ticket);
        dashboard
    }

    pub fn selection(&self) -> Selection {
        lock(&self.machine).selection().clone()
    }

    pub fn view(&self) -> ViewState {
        lock(&self.machine).view().clone()
    }

    /// Receives every view change, for the renderer.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    pub fn set_company(&self, company: impl Into<String>) {
        let mut machine = lock(&self.machine);
        let ticket = machine.set_company(company);
        self.after_transition(machine, ticket);
    }

    pub fn set_metric(&self, metric: impl Into<String>) {
        let mut machine = lock(&self.machine);
        let ticket = machine.set_metric(metric);
        self.after_transition(machine, ticket);
    }

    pub fn set_chart_mode(&self, mode: ChartMode) {
        let mut machine = lock(&self.machine);
        if machine.set_chart_mode(mode) {
            self.view_tx.send_replace(machine.view().clone());
        }
    }

    /// Waits for every query dispatched so far, current or stale.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            if let Err(err) = handle.await {
                debug!(error = %err, "series task did not complete");
            }
        }
    }

    /// Publishes while still holding the machine lock: an older `Loading`
    /// must never land after a newer `Ready`.
    fn after_transition(
        &self,
        machine: MutexGuard<'_, SelectionMachine>,
        ticket: Option<QueryTicket>,
    ) {
        if let Some(ticket) = ticket {
            self.view_tx.send_replace(machine.view().clone());
            drop(machine);
            self.dispatch(ticket);
        }
    }

    fn dispatch(&self, ticket: QueryTicket) {
        let fetcher = Arc::clone(&self.fetcher);
        let machine = Arc::clone(&self.machine);
        let view_tx = self.view_tx.clone();
        let handle = tokio::spawn(async move {
            let result = fetcher
                .fetch(&ticket.company, &ticket.metric)
                .await
                .map_err(|e| e.0);
            let mut machine = lock(&machine);
            if machine.apply(ticket.version, result) == Applied::Current {
                view_tx.send_replace(machine.view().clone());
            }
        });
        let mut tasks = lock(&self.tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

/// A poisoned lock only means another task panicked mid-update; the machine
/// itself is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
