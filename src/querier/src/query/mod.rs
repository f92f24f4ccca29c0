use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::Configuration;
use common::{IntervalCalculator, TimeRange};
use futures::stream::{self, StreamExt};
use grafana_plugin_sdk::data::Frame;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpPrometheusClient, PrometheusClient};
use error::QuerierError;
use legend::LegendFormatter;
use model::{ParseContext, PrometheusQuery};

pub mod error;
pub mod exemplar;
pub mod interpolation;
pub mod legend;
pub mod model;
pub mod response;

/// Header set on requests issued by alert evaluation.
pub const FROM_ALERT_HEADER: &str = "FromAlert";

/// Expression used to verify the datasource answers queries.
const HEALTH_CHECK_EXPR: &str = "1+1";

/// Kind of backend call made for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Range,
    Instant,
    Exemplar,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Range => write!(f, "range"),
            QueryType::Instant => write!(f, "instant"),
            QueryType::Exemplar => write!(f, "exemplar"),
        }
    }
}

/// A single query of a batch request.
#[derive(Debug, Clone)]
pub struct DataQuery {
    pub ref_id: String,
    pub time_range: TimeRange,
    pub max_data_points: i64,
    /// Interval suggested by the caller, in milliseconds. Zero when unset.
    pub interval_ms: i64,
    /// Query model, see [`model::QueryModel`]
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct QueryDataRequest {
    pub queries: Vec<DataQuery>,
    pub headers: HashMap<String, String>,
}

impl QueryDataRequest {
    /// Whether the request was issued by alert evaluation.
    pub fn from_alert(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case(FROM_ALERT_HEADER) && value == "true")
    }
}

/// Outcome of one query. Frames gathered before a failure are dropped.
#[derive(Debug, Default)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    pub error: Option<QuerierError>,
}

impl DataResponse {
    pub fn frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
        }
    }

    pub fn error(error: QuerierError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(error),
        }
    }
}

/// Responses keyed by query reference ID.
#[derive(Debug, Default)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

/// Runs batched Prometheus queries and turns the results into frames.
pub struct QueryExecutor {
    client: Arc<dyn PrometheusClient>,
    calculator: IntervalCalculator,
    legend: LegendFormatter,
    scrape_interval: Option<Duration>,
    max_concurrent_queries: usize,
    query_timeout: Option<Duration>,
}

impl QueryExecutor {
    pub fn new(client: Arc<dyn PrometheusClient>) -> Self {
        Self {
            client,
            calculator: IntervalCalculator::new(),
            legend: LegendFormatter::new(),
            scrape_interval: None,
            max_concurrent_queries: 1,
            query_timeout: None,
        }
    }

    /// Executor over the HTTP client described by `config`.
    pub fn from_config(config: &Configuration) -> anyhow::Result<Self> {
        let client = HttpPrometheusClient::new(&config.datasource)?;
        Ok(Self::new(Arc::new(client))
            .with_scrape_interval(config.datasource.scrape_interval()?)
            .with_max_concurrent_queries(config.query.max_concurrent_queries)
            .with_query_timeout(config.query.query_timeout))
    }

    pub fn with_scrape_interval(mut self, scrape_interval: Option<Duration>) -> Self {
        self.scrape_interval = scrape_interval;
        self
    }

    pub fn with_max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max.max(1);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Execute every query of the request. A failing query only fails its own entry.
    pub async fn query_data(
        &self,
        request: QueryDataRequest,
        cancel: &CancellationToken,
    ) -> QueryDataResponse {
        let context = ParseContext {
            scrape_interval: self.scrape_interval,
            from_alert: request.from_alert(),
        };
        tracing::debug!(
            queries = request.queries.len(),
            from_alert = context.from_alert,
            "Received query_data request"
        );

        let responses = stream::iter(request.queries)
            .map(|query| async move {
                let ref_id = query.ref_id.clone();
                let response = self.execute(query, &context, cancel).await;
                (ref_id, response)
            })
            .buffer_unordered(self.max_concurrent_queries)
            .collect::<BTreeMap<_, _>>()
            .await;

        QueryDataResponse { responses }
    }

    async fn execute(
        &self,
        query: DataQuery,
        context: &ParseContext,
        cancel: &CancellationToken,
    ) -> DataResponse {
        let query = match PrometheusQuery::parse(&query, context, &self.calculator) {
            Ok(query) => query,
            Err(e) => {
                tracing::error!(ref_id = %query.ref_id, error = %e, "Failed to parse query");
                return DataResponse::error(e);
            }
        };

        match self.guarded(self.run_query(&query), cancel).await {
            Ok(frames) => DataResponse::frames(frames),
            Err(e) => {
                tracing::error!(ref_id = %query.ref_id, error = %e, "Query failed");
                DataResponse::error(e)
            }
        }
    }

    /// Race `future` against cancellation and the per-query timeout.
    async fn guarded<T>(
        &self,
        future: impl Future<Output = Result<T, QuerierError>>,
        cancel: &CancellationToken,
    ) -> Result<T, QuerierError> {
        let timed = async {
            match self.query_timeout {
                Some(timeout) => tokio::time::timeout(timeout, future)
                    .await
                    .unwrap_or_else(|_| Err(QuerierError::Timeout(timeout))),
                None => future.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QuerierError::Cancelled),
            result = timed => result,
        }
    }

    async fn run_query(&self, query: &PrometheusQuery) -> Result<Vec<Frame>, QuerierError> {
        let start = align_time_range(query.start, query.step, query.utc_offset_sec);
        let end = align_time_range(query.end, query.step, query.utc_offset_sec);
        let mut frames = Vec::new();

        if query.range_query {
            tracing::debug!(ref_id = %query.ref_id, expr = %query.expr, step = ?query.step, "Sending range query");
            let result = self
                .client
                .query_range(&query.expr, start, end, query.step)
                .await
                .map_err(|source| QuerierError::Backend {
                    kind: QueryType::Range,
                    source,
                })?;
            frames.extend(response::query_result_to_frames(result, query, &self.legend)?);
        }

        if query.instant_query {
            tracing::debug!(ref_id = %query.ref_id, expr = %query.expr, "Sending instant query");
            let result = self
                .client
                .query(&query.expr, query.end)
                .await
                .map_err(|source| QuerierError::Backend {
                    kind: QueryType::Instant,
                    source,
                })?;
            frames.extend(response::query_result_to_frames(result, query, &self.legend)?);
        }

        if query.exemplar_query {
            tracing::debug!(ref_id = %query.ref_id, expr = %query.expr, "Sending exemplar query");
            match self.client.query_exemplars(&query.expr, start, end).await {
                Ok(result) => frames.extend(exemplar::exemplars_to_frames(result, query)?),
                Err(e) => {
                    tracing::error!(ref_id = %query.ref_id, error = %e, "Exemplar query failed");
                }
            }
        }

        Ok(frames)
    }

    /// Run a trivial instant query to verify the datasource is reachable.
    pub async fn check_health(&self) -> HealthStatus {
        match self.client.query(HEALTH_CHECK_EXPR, Utc::now()).await {
            Ok(_) => HealthStatus {
                ok: true,
                message: "Successfully queried the Prometheus API.".to_string(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                HealthStatus {
                    ok: false,
                    message: format!("Prometheus health check failed: {e}"),
                }
            }
        }
    }
}

/// Floor `time` to a multiple of `step`, counted in the timezone at `offset_sec` from UTC.
pub fn align_time_range(time: DateTime<Utc>, step: Duration, offset_sec: i64) -> DateTime<Utc> {
    let step_ns = step.as_nanos() as i128;
    if step_ns == 0 {
        return time;
    }

    let offset_ns = offset_sec as i128 * 1_000_000_000;
    let time_ns = time.timestamp_nanos_opt().map(i128::from).unwrap_or_else(|| {
        i128::from(time.timestamp_millis()) * 1_000_000
    });

    let aligned = (time_ns + offset_ns).div_euclid(step_ns) * step_ns - offset_ns;
    i64::try_from(aligned)
        .map(DateTime::from_timestamp_nanos)
        .unwrap_or(time)
}
