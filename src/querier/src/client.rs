//! Prometheus HTTP API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::{DataSourceConfig, HttpMethod};
use prom_api::{ApiResponse, ExemplarQueryResult, QueryResult, Status};
use serde::de::DeserializeOwned;
use url::Url;

/// Errors from the Prometheus backend
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Prometheus answered with an error envelope or a non-success status
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        error_type: Option<String>,
        message: String,
    },
    /// Body was not a valid API response
    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("Response has no data")]
    MissingData,
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Decoded payload of a successful call with the annotations that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub data: T,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

impl<T> Response<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            infos: Vec::new(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrometheusClient: Send + Sync {
    /// Evaluate `expr` over `[start, end]` every `step`.
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Response<QueryResult>, ClientError>;

    /// Evaluate `expr` at a single instant.
    async fn query(
        &self,
        expr: &str,
        time: DateTime<Utc>,
    ) -> Result<Response<QueryResult>, ClientError>;

    /// Fetch exemplars of the series selected by `expr`.
    async fn query_exemplars(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Response<Vec<ExemplarQueryResult>>, ClientError>;
}

/// [`PrometheusClient`] over the Prometheus HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPrometheusClient {
    http: reqwest::Client,
    base_url: Url,
    method: HttpMethod,
    custom_parameters: Vec<(String, String)>,
}

impl HttpPrometheusClient {
    pub fn new(config: &DataSourceConfig) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(&config.url)?;
        // Keep any path prefix (e.g. /prometheus) when joining endpoint paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url,
            method: config.http_method,
            custom_parameters: config.custom_parameters(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Response<T>, ClientError> {
        let url = self.endpoint(path)?;
        params.extend(self.custom_parameters.iter().cloned());

        tracing::debug!(%url, method = ?self.method, "Calling Prometheus");
        let request = match self.method {
            HttpMethod::Get => self.http.get(url).query(&params),
            HttpMethod::Post => self.http.post(url).form(&params),
        };

        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    error_type: None,
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if envelope.status == Status::Error || !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                error_type: envelope.error_type,
                message: envelope
                    .error
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
            });
        }

        let data = envelope.data.ok_or(ClientError::MissingData)?;
        Ok(Response {
            data,
            warnings: envelope.warnings,
            infos: envelope.infos,
        })
    }
}

#[async_trait]
impl PrometheusClient for HttpPrometheusClient {
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Response<QueryResult>, ClientError> {
        let params = vec![
            ("query".to_string(), expr.to_string()),
            ("start".to_string(), format_time(start)),
            ("end".to_string(), format_time(end)),
            ("step".to_string(), step.as_secs_f64().to_string()),
        ];
        self.call("api/v1/query_range", params).await
    }

    async fn query(
        &self,
        expr: &str,
        time: DateTime<Utc>,
    ) -> Result<Response<QueryResult>, ClientError> {
        let params = vec![
            ("query".to_string(), expr.to_string()),
            ("time".to_string(), format_time(time)),
        ];
        self.call("api/v1/query", params).await
    }

    async fn query_exemplars(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Response<Vec<ExemplarQueryResult>>, ClientError> {
        let params = vec![
            ("query".to_string(), expr.to_string()),
            ("start".to_string(), format_time(start)),
            ("end".to_string(), format_time(end)),
        ];
        self.call("api/v1/query_exemplars", params).await
    }
}

/// Unix seconds with millisecond fraction, as the API expects.
pub fn format_time(time: DateTime<Utc>) -> String {
    (time.timestamp_millis() as f64 / 1000.0).to_string()
}
