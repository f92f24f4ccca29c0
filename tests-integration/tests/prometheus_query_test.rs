use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::config::HttpMethod;
use querier::data::row_count;
use querier::endpoints::QueryRequestBody;
use querier::query::QueryDataRequest;
use querier::{QuerierError, QuerierState, QueryExecutor, query_router};
use serde_json::{Value, json};
use tests_integration::test_helpers::FakePrometheus;
use tests_integration::{create_test_config, init_test_logging};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const FROM_MS: i64 = 1_700_000_000_000;
const TO_MS: i64 = 1_700_003_600_000;

fn request(queries: Value, headers: HashMap<String, String>) -> QueryDataRequest {
    let body: QueryRequestBody = serde_json::from_value(json!({
        "from": FROM_MS,
        "to": TO_MS,
        "queries": queries,
    }))
    .expect("valid request body");
    body.into_request(headers).expect("valid queries")
}

async fn executor(prometheus: &FakePrometheus, method: HttpMethod) -> QueryExecutor {
    let config = create_test_config(&prometheus.url(), method);
    QueryExecutor::from_config(&config).expect("executor from config")
}

#[tokio::test]
async fn test_failing_query_does_not_block_others() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let executor = executor(&prometheus, HttpMethod::Post).await;

    let request = request(
        json!([
            {
                "refId": "A",
                "expr": "sum(rate(fail_total[$__interval]))",
                "range": true,
                "intervalMs": 15000
            },
            {"refId": "B", "expr": "up", "instant": true}
        ]),
        HashMap::new(),
    );

    let response = executor
        .query_data(request, &CancellationToken::new())
        .await;
    assert_eq!(response.responses.len(), 2);

    let a = &response.responses["A"];
    assert!(a.frames.is_empty());
    match &a.error {
        Some(QuerierError::Backend { .. }) => {}
        other => panic!("expected backend error, got {other:?}"),
    }

    let b = &response.responses["B"];
    assert!(b.error.is_none());
    assert_eq!(b.frames.len(), 2);

    // The interval variable was substituted before the backend saw the expression
    let range_calls = prometheus.requests_to("/api/v1/query_range");
    assert_eq!(range_calls.len(), 1);
    assert_eq!(
        range_calls[0].param("query"),
        Some("sum(rate(fail_total[15s]))")
    );
    assert_eq!(range_calls[0].method, Method::POST);
}

#[tokio::test]
async fn test_range_query_is_step_aligned() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let executor = executor(&prometheus, HttpMethod::Post).await;

    let request = request(
        json!([{
            "refId": "A",
            "expr": "rate(http_requests_total[$__rate_interval])",
            "range": true,
            "intervalMs": 15000,
            "legendFormat": "{{instance}}"
        }]),
        HashMap::new(),
    );

    let response = executor
        .query_data(request, &CancellationToken::new())
        .await;
    let a = &response.responses["A"];
    assert!(a.error.is_none(), "unexpected error: {:?}", a.error);
    assert_eq!(a.frames.len(), 1);

    let frame = &a.frames[0];
    assert_eq!(frame.name, "api-0");
    assert_eq!(row_count(frame), 3);
    let schema = serde_json::to_value(frame).unwrap()["schema"].clone();
    assert_eq!(schema["meta"]["custom"]["resultType"], "matrix");
    assert_eq!(schema["fields"][1]["labels"]["instance"], "api-0");
    assert_eq!(schema["fields"][1]["config"]["displayNameFromDS"], "api-0");

    let call = &prometheus.requests_to("/api/v1/query_range")[0];
    // 1_700_000_000 floored to a multiple of 15s
    assert_eq!(call.param("start"), Some("1699999995"));
    assert_eq!(call.param("step"), Some("15"));
    // max(15s + 15s, 4 * 15s)
    assert_eq!(call.param("query"), Some("rate(http_requests_total[1m])"));
}

#[tokio::test]
async fn test_get_method_with_custom_parameters() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let mut config = create_test_config(&prometheus.url(), HttpMethod::Get);
    config.datasource.custom_query_parameters = Some("dedup=false&partial_response=true".into());
    let executor = QueryExecutor::from_config(&config).unwrap();

    let request = request(
        json!([{"refId": "A", "expr": "up", "instant": true}]),
        HashMap::new(),
    );
    let response = executor
        .query_data(request, &CancellationToken::new())
        .await;
    assert!(response.responses["A"].error.is_none());

    let calls = prometheus.requests_to("/api/v1/query");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::GET);
    assert_eq!(calls[0].param("time"), Some("1700003600"));
    assert_eq!(calls[0].param("dedup"), Some("false"));
    assert_eq!(calls[0].param("partial_response"), Some("true"));
}

#[tokio::test]
async fn test_exemplars_are_appended() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let executor = executor(&prometheus, HttpMethod::Post).await;

    let queries = json!([{
        "refId": "A",
        "expr": "histogram_quantile(0.99, rate(latency_bucket[5m]))",
        "range": true,
        "exemplar": true,
        "intervalMs": 15000
    }]);

    let response = executor
        .query_data(request(queries.clone(), HashMap::new()), &CancellationToken::new())
        .await;
    let frames = &response.responses["A"].frames;
    assert_eq!(frames.len(), 2);

    let exemplars = frames.last().unwrap();
    assert_eq!(exemplars.name, "exemplar");
    assert_eq!(row_count(exemplars), 2);
    let json = serde_json::to_value(exemplars).unwrap();
    let trace_column = json["schema"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .position(|field| field["name"] == "traceID")
        .unwrap();
    assert_eq!(json["data"]["values"][trace_column], json!(["abc", "def"]));

    // Alert evaluation never asks for exemplars
    let headers = HashMap::from([("FromAlert".to_string(), "true".to_string())]);
    let response = executor
        .query_data(request(queries, headers), &CancellationToken::new())
        .await;
    assert_eq!(response.responses["A"].frames.len(), 1);
    assert_eq!(prometheus.requests_to("/api/v1/query_exemplars").len(), 1);
}

#[tokio::test]
async fn test_query_api_over_http() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let state = QuerierState {
        executor: Arc::new(executor(&prometheus, HttpMethod::Post).await),
        shutdown: CancellationToken::new(),
    };

    let body = json!({
        "from": FROM_MS.to_string(),
        "to": TO_MS.to_string(),
        "queries": [
            {"refId": "A", "expr": "fail_metric", "range": true},
            {"refId": "B", "expr": "up", "instant": true}
        ]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/ds/query")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = query_router(state.clone()).oneshot(request).await.unwrap();
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
            .contains("too many samples")
    );
    assert_eq!(value["results"]["B"]["status"], 200);
    let frames = value["results"]["B"]["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["schema"]["meta"]["custom"]["resultType"], "vector");
    assert_eq!(frames[0]["schema"]["meta"]["executedQueryString"], "Expr: up\nStep: 15s");

    let health = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let response = query_router(state).oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_reports_unreachable_backend() {
    init_test_logging();
    // Nothing listens on the discard port
    let config = create_test_config("http://127.0.0.1:9", HttpMethod::Post);
    let executor = QueryExecutor::from_config(&config).unwrap();

    let health = executor.check_health().await;
    assert!(!health.ok);
    assert!(health.message.starts_with("Prometheus health check failed"));
}

#[tokio::test]
async fn test_cancelled_request_reports_every_query() {
    init_test_logging();
    let prometheus = FakePrometheus::start().await.unwrap();
    let executor = executor(&prometheus, HttpMethod::Post).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = request(
        json!([
            {"refId": "A", "expr": "up", "range": true},
            {"refId": "B", "expr": "up", "instant": true}
        ]),
        HashMap::new(),
    );
    let response = executor.query_data(request, &cancel).await;

    assert_eq!(response.responses.len(), 2);
    for result in response.responses.values() {
        assert!(matches!(result.error, Some(QuerierError::Cancelled)));
    }
}
