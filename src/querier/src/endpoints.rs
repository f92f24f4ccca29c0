use std::collections::{BTreeMap, HashMap};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use common::TimeRange;
use grafana_plugin_sdk::data::Frame;
use serde::{Deserialize, Serialize};

use crate::QuerierState;
use crate::query::{DataQuery, QueryDataRequest, QueryDataResponse};

pub fn router() -> Router<QuerierState> {
    Router::new()
        .route("/api/ds/query", post(query_data))
        .route("/api/health", get(check_health))
}

/// Epoch milliseconds, sent either as a number or as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochMillis {
    Number(i64),
    Text(String),
}

impl EpochMillis {
    fn millis(&self) -> Result<i64, String> {
        match self {
            EpochMillis::Number(ms) => Ok(*ms),
            EpochMillis::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| format!("invalid epoch milliseconds {text:?}")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequestBody {
    pub from: EpochMillis,
    pub to: EpochMillis,
    pub queries: Vec<serde_json::Value>,
}

/// Request level fields of a query. The remaining fields form the query model.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QueryEnvelope {
    ref_id: String,
    max_data_points: i64,
    interval_ms: i64,
}

impl Default for QueryEnvelope {
    fn default() -> Self {
        Self {
            ref_id: "A".to_string(),
            max_data_points: 0,
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResponseBody {
    pub results: BTreeMap<String, QueryResultBody>,
}

#[derive(Debug, Serialize)]
pub struct QueryResultBody {
    pub status: u16,
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<QueryDataResponse> for QueryResponseBody {
    fn from(response: QueryDataResponse) -> Self {
        let results = response
            .responses
            .into_iter()
            .map(|(ref_id, response)| {
                let body = QueryResultBody {
                    status: response.error.as_ref().map(|e| e.status_code()).unwrap_or(200),
                    frames: response.frames,
                    error: response.error.map(|e| e.to_string()),
                };
                (ref_id, body)
            })
            .collect();

        Self { results }
    }
}

impl QueryRequestBody {
    /// Convert into an executor request, carrying over the request headers.
    pub fn into_request(self, headers: HashMap<String, String>) -> Result<QueryDataRequest, String> {
        let time_range = TimeRange::from_millis(self.from.millis()?, self.to.millis()?);

        let queries = self
            .queries
            .into_iter()
            .map(|json| {
                let envelope = QueryEnvelope::deserialize(&json)
                    .map_err(|e| format!("invalid query: {e}"))?;
                Ok(DataQuery {
                    ref_id: envelope.ref_id,
                    time_range,
                    max_data_points: envelope.max_data_points,
                    interval_ms: envelope.interval_ms,
                    json,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(QueryDataRequest { queries, headers })
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// POST /api/ds/query
///
/// Runs a batch of queries and answers with frames per reference ID.
#[tracing::instrument(skip_all)]
pub async fn query_data(
    State(state): State<QuerierState>,
    headers: HeaderMap,
    Json(body): Json<QueryRequestBody>,
) -> Result<Json<QueryResponseBody>, (StatusCode, String)> {
    let request = body
        .into_request(header_map(&headers))
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let cancel = state.shutdown.child_token();
    let response = state.executor.query_data(request, &cancel).await;
    Ok(Json(response.into()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
    pub message: String,
}

/// GET /api/health
#[tracing::instrument(skip_all)]
pub async fn check_health(State(state): State<QuerierState>) -> (StatusCode, Json<HealthBody>) {
    let health = state.executor.check_health().await;
    let (code, status) = if health.ok {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "ERROR")
    };

    (
        code,
        Json(HealthBody {
            status: status.to_string(),
            message: health.message,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, MockPrometheusClient, Response};
    use crate::query::QueryExecutor;
    use crate::query_router;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn state(client: MockPrometheusClient) -> QuerierState {
        QuerierState {
            executor: Arc::new(QueryExecutor::new(Arc::new(client))),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn test_into_request() {
        let body: QueryRequestBody = serde_json::from_value(json!({
            "from": "1700000000000",
            "to": 1700003600000i64,
            "queries": [
                {"refId": "A", "expr": "up", "maxDataPoints": 100, "intervalMs": 15000},
                {"expr": "down"}
            ]
        }))
        .unwrap();

        let headers = HashMap::from([("fromalert".to_string(), "true".to_string())]);
        let request = body.into_request(headers).unwrap();

        assert!(request.from_alert());
        assert_eq!(request.queries.len(), 2);
        assert_eq!(request.queries[0].ref_id, "A");
        assert_eq!(request.queries[0].max_data_points, 100);
        assert_eq!(request.queries[0].interval_ms, 15000);
        assert_eq!(request.queries[0].json["expr"], "up");
        assert_eq!(request.queries[0].time_range.span_millis(), 3_600_000);
        assert_eq!(request.queries[1].ref_id, "A");
    }

    #[test]
    fn test_into_request_rejects_bad_time() {
        let body: QueryRequestBody = serde_json::from_value(json!({
            "from": "now-1h",
            "to": "now",
            "queries": []
        }))
        .unwrap();
        assert!(body.into_request(HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_query_endpoint() {
        let mut client = MockPrometheusClient::new();
        client.expect_query().returning(|_, _| {
            Ok(Response::new(
                serde_json::from_value(json!({
                    "resultType": "vector",
                    "result": [{"metric": {"job": "api"}, "value": [1700003600, "1"]}]
                }))
                .unwrap(),
            ))
        });
        client.expect_query_range().returning(|_, _, _, _| {
            Err(ClientError::Api {
                status: 422,
                error_type: Some("execution".to_string()),
                message: "query timed out".to_string(),
            })
        });

        let body = json!({
            "from": 1700000000000i64,
            "to": 1700003600000i64,
            "queries": [
                {"refId": "A", "expr": "up", "range": true},
                {"refId": "B", "expr": "up", "instant": true}
            ]
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/ds/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = query_router(state(client)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["results"]["A"]["status"], 500);
        assert!(
            value["results"]["A"]["error"]
                .as_str()
                .unwrap()
                .contains("query timed out")
        );
        assert_eq!(value["results"]["B"]["status"], 200);
        assert_eq!(value["results"]["A"]["frames"], json!([]));
        let frames = &value["results"]["B"]["frames"];
        assert_eq!(frames.as_array().map(Vec::len), Some(1));
        assert_eq!(frames[0]["schema"]["name"], r#"{job="api"}"#);
        assert_eq!(frames[0]["schema"]["meta"]["custom"]["resultType"], "vector");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let mut client = MockPrometheusClient::new();
        client.expect_query().returning(|_, _| {
            Err(ClientError::Api {
                status: 503,
                error_type: None,
                message: "down".to_string(),
            })
        });

        let (code, Json(body)) = check_health(State(state(client))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "ERROR");
    }
}
