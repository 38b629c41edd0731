use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use ts_core::{Series, SeriesPoint};

const DEFAULT_BASE_URL: &str = "http://localhost:5000";
/// Points the client at a different backend.
const API_URL_ENV: &str = "API_URL";
/// Appended to any path already on the base URL.
const DATA_PATH_SEGMENTS: [&str; 2] = ["api", "data"];
/// Shown when the server gave no usable error message.
pub const GENERIC_FAILURE: &str = "Failed to load data";

#[derive(Debug, Clone)]
pub struct SeriesClientConfig {
    pub base_url: String,
}

impl SeriesClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for SeriesClientConfig {
    fn default() -> Self {
        let base_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self { base_url }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url: {0}")]
    BaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    /// Text for the single error state of the dashboard.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { message, .. } if !message.is_empty() => message.clone(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Non-finite values arrive as JSON `null`.
#[derive(Debug, Deserialize)]
struct WirePoint {
    year: String,
    value: Option<f64>,
}

#[derive(Clone)]
pub struct SeriesClient {
    endpoint: Url,
    http: reqwest::Client,
}

impl SeriesClient {
    pub fn new(config: SeriesClientConfig) -> Result<Self, ClientError> {
        let mut endpoint =
            Url::parse(&config.base_url).map_err(|e| ClientError::BaseUrl(e.to_string()))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| ClientError::BaseUrl(format!("{} cannot be a base", config.base_url)))?
            .pop_if_empty()
            .extend(DATA_PATH_SEGMENTS);
        let http = reqwest::Client::builder()
            .user_agent("series-client/0.1")
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(SeriesClientConfig::default())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches the series for one (company, metric) and drops absent points,
    /// so the result is exactly what the chart shows.
    pub async fn fetch_series(&self, company: &str, metric: &str) -> Result<Series, ClientError> {
        let resp = self
            .http
            .get(self.endpoint.clone())
            .query(&[("company", company), ("metric", metric)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_default();
            debug!(%status, %message, company, metric, "series request rejected");
            return Err(ClientError::Api { status, message });
        }

        let wire: Vec<WirePoint> = resp.json().await?;
        let points = wire
            .into_iter()
            .filter_map(|p| p.value.map(|value| SeriesPoint::new(p.year, value)))
            .collect::<Vec<_>>();
        Ok(Series::from_points(points).without_absent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn fake_api(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
        match (params.get("company"), params.get("metric")) {
            (Some(c), Some(m)) if c == "INFY" && m == "SALES" => Json(json!([
                {"year": "2021", "value": 150.0},
                {"year": "2019", "value": 0.0},
                {"year": "2020", "value": 100.0},
                {"year": "2022", "value": null}
            ]))
            .into_response(),
            (Some(c), Some(_)) if c == "BROKEN" => {
                (AxumStatus::BAD_GATEWAY, "upstream down").into_response()
            }
            (Some(_), Some(_)) => (
                AxumStatus::NOT_FOUND,
                Json(json!({"error": "Data not found for the selected criteria."})),
            )
                .into_response(),
            _ => (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": "Company and metric query parameters are required."})),
            )
                .into_response(),
        }
    }

    async fn spawn_fake() -> SeriesClient {
        let app = Router::new().route("/api/data", get(fake_api));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        SeriesClient::new(SeriesClientConfig::new(format!("http://{addr}"))).unwrap()
    }

    #[test]
    fn endpoint_is_built_from_base_url() {
        let client = SeriesClient::new(SeriesClientConfig::new("https://example.test/")).unwrap();
        assert_eq!(client.endpoint().as_str(), "https://example.test/api/data");
        assert!(matches!(
            SeriesClient::new(SeriesClientConfig::new("not a url")),
            Err(ClientError::BaseUrl(_))
        ));
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        for base in ["https://host.test/finance", "https://host.test/finance/"] {
            let client = SeriesClient::new(SeriesClientConfig::new(base)).unwrap();
            assert_eq!(client.endpoint().as_str(), "https://host.test/finance/api/data");
        }
        assert!(matches!(
            SeriesClient::new(SeriesClientConfig::new("mailto:ops@host.test")),
            Err(ClientError::BaseUrl(_))
        ));
    }

    #[tokio::test]
    async fn fetch_sorts_and_drops_absent_points() {
        let client = spawn_fake().await;
        let series = client.fetch_series("INFY", "SALES").await.unwrap();
        let years: Vec<&str> = series.years().collect();
        assert_eq!(years, ["2020", "2021"]);
    }

    #[tokio::test]
    async fn server_error_message_is_surfaced() {
        let client = spawn_fake().await;
        let err = client.fetch_series("TCS", "PAT").await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status, .. } if status == StatusCode::NOT_FOUND));
        assert_eq!(err.user_message(), "Data not found for the selected criteria.");
    }

    #[tokio::test]
    async fn missing_message_falls_back_to_generic_text() {
        let client = spawn_fake().await;
        let err = client.fetch_series("BROKEN", "PAT").await.unwrap_err();
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }
}
