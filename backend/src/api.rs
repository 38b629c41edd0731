use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use data_feed::{RowSource, SeriesEngine};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use ts_core::{QueryError, Series};

pub type DynRowSource = Box<dyn RowSource + Send + Sync>;

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<SeriesEngine<DynRowSource>>,
}

impl ApiState {
    pub fn new(engine: SeriesEngine<DynRowSource>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/data", get(data_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                tracing::info_span!("req", method = %req.method(), uri = %req.uri())
            }),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DataParams {
    company: Option<String>,
    metric: Option<String>,
}

async fn healthz() -> &'static str {
    "ok"
}

/// `GET /api/data?company=..&metric=..` -> `[{year, value}, ...]`.
async fn data_handler(
    State(state): State<ApiState>,
    Query(params): Query<DataParams>,
) -> Result<Json<Series>, ApiError> {
    let engine = Arc::clone(&state.engine);
    // The row source does blocking file I/O.
    let series = tokio::task::spawn_blocking(move || {
        engine.query(params.company.as_deref(), params.metric.as_deref())
    })
    .await
    .map_err(QueryError::read_failure)??;
    Ok(Json(series))
}

/// Maps engine errors onto the HTTP contract. Internal detail is logged,
/// never returned.
#[derive(Debug)]
pub struct ApiError(QueryError);

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            QueryError::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                "Company and metric query parameters are required.",
            ),
            QueryError::EmptyDataset => (StatusCode::NOT_FOUND, "No data found in source file."),
            QueryError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                "Data not found for the selected criteria.",
            ),
            QueryError::AmbiguousMatch { .. } | QueryError::ReadFailure(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read or process the data file.",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            QueryError::ReadFailure(source) => error!(error = %source, "failed to read dataset"),
            QueryError::AmbiguousMatch { .. } => warn!(error = %self.0, "duplicate dataset rows"),
            _ => {}
        }
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use data_feed::{CsvRowSource, MemoryRowSource};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::io::Write;
    use tower::ServiceExt;
    use ts_core::{MatchPolicy, Record};

    fn rows() -> Vec<Record> {
        vec![
            Record::new()
                .with("Ticker", "INFY")
                .with("Field", "SALES")
                .with("2021", 150.0)
                .with("2020", 100.0)
                .with("2022", 0.0),
            Record::new()
                .with("Ticker", "TCS")
                .with("Field", "PAT")
                .with("2020", "n/a"),
        ]
    }

    fn app_with(source: DynRowSource) -> Router {
        router(ApiState::new(SeriesEngine::new(source)))
    }

    fn app() -> Router {
        app_with(Box::new(MemoryRowSource::new(rows())))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn returns_sorted_series() {
        let (status, body) = get(app(), "/api/data?company=%20infy%20&metric=Sales").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                {"year": "2020", "value": 100.0},
                {"year": "2021", "value": 150.0},
                {"year": "2022", "value": 0.0}
            ])
        );
    }

    #[tokio::test]
    async fn missing_metric_is_bad_request() {
        let (status, body) = get(app(), "/api/data?company=INFY").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Company and metric query parameters are required."
        );
        let (status, _) = get(app(), "/api/data?company=INFY&metric=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_pair_is_not_found() {
        let (status, body) = get(app(), "/api/data?company=WIPRO&metric=SALES").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Data not found for the selected criteria.");
    }

    #[tokio::test]
    async fn empty_dataset_is_not_found_with_its_own_message() {
        let app = app_with(Box::new(MemoryRowSource::default()));
        let (status, body) = get(app, "/api/data?company=INFY&metric=SALES").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No data found in source file.");
    }

    #[tokio::test]
    async fn read_failure_hides_detail() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(Box::new(CsvRowSource::new(dir.path().join("missing.csv"))));
        let (status, body) = get(app, "/api/data?company=INFY&metric=SALES").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to read or process the data file."}));
    }

    #[tokio::test]
    async fn non_numeric_cell_is_sent_as_null() {
        let (status, body) = get(app(), "/api/data?company=tcs&metric=pat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"year": "2020", "value": null}]));
    }

    #[tokio::test]
    async fn csv_file_is_reread_per_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Ticker,Field,2020\nINFY,SALES,1").unwrap();
        file.flush().unwrap();
        let app = app_with(Box::new(CsvRowSource::new(file.path())));

        let (_, body) = get(app.clone(), "/api/data?company=INFY&metric=SALES").await;
        assert_eq!(body[0]["value"], 1.0);

        let mut rewrite = std::fs::File::create(file.path()).unwrap();
        writeln!(rewrite, "Ticker,Field,2020\nINFY,SALES,2").unwrap();
        drop(rewrite);

        let (_, body) = get(app, "/api/data?company=INFY&metric=SALES").await;
        assert_eq!(body[0]["value"], 2.0);
    }

    #[tokio::test]
    async fn duplicates_fail_under_strict_policy() {
        let mut dup = rows();
        dup.push(dup[0].clone());
        let source: DynRowSource = Box::new(MemoryRowSource::new(dup));
        let engine = SeriesEngine::new(source).with_policy(MatchPolicy::RejectDuplicates);
        let app = router(ApiState::new(engine));
        let (status, _) = get(app, "/api/data?company=INFY&metric=SALES").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/api/data?company=INFY&metric=SALES")
                    .header("origin", "https://dashboard.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = app()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
