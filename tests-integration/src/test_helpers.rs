use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::{
    Form, Json, Router,
    extract::State,
    http::{Method, StatusCode},
    routing::get,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

/// Expressions containing this marker are answered with an execution error.
pub const FAILING_MARKER: &str = "fail";

/// One call received by the fake backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

type Recorder = Arc<Mutex<Vec<RecordedRequest>>>;

/// A Prometheus HTTP API stand-in answering canned data on an ephemeral port.
pub struct FakePrometheus {
    pub addr: SocketAddr,
    requests: Recorder,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakePrometheus {
    pub async fn start() -> Result<Self> {
        let requests = Recorder::default();
        let app = Router::new()
            .route("/api/v1/query_range", get(query_range).post(query_range))
            .route("/api/v1/query", get(query).post(query))
            .route(
                "/api/v1/query_exemplars",
                get(query_exemplars).post(query_exemplars),
            )
            .with_state(requests.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                log::error!("Fake Prometheus server failed: {e}");
            }
        });

        log::info!("Fake Prometheus listening on {addr}");
        Ok(Self {
            addr,
            requests,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Calls received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }
}

impl Drop for FakePrometheus {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn record(requests: &Recorder, method: Method, path: &str, params: &HashMap<String, String>) {
    if let Ok(mut requests) = requests.lock() {
        requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            params: params.clone(),
        });
    }
}

fn param_f64(params: &HashMap<String, String>, name: &str) -> f64 {
    params
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn execution_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "status": "error",
            "errorType": "execution",
            "error": "query processing would load too many samples"
        })),
    )
}

fn success(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "success", "data": data})),
    )
}

fn is_failing(params: &HashMap<String, String>) -> bool {
    params
        .get("query")
        .is_some_and(|expr| expr.contains(FAILING_MARKER))
}

// Form reads the query string for GET and the body for POST.
async fn query_range(
    State(requests): State<Recorder>,
    method: Method,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    record(&requests, method, "/api/v1/query_range", &params);
    if is_failing(&params) {
        return execution_error();
    }

    let start = param_f64(&params, "start");
    let step = param_f64(&params, "step").max(1.0);
    success(json!({
        "resultType": "matrix",
        "result": [{
            "metric": {"__name__": "http_requests_total", "job": "api", "instance": "api-0"},
            "values": [
                [start, "1"],
                [start + step, "2"],
                [start + 2.0 * step, "3"]
            ]
        }]
    }))
}

async fn query(
    State(requests): State<Recorder>,
    method: Method,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    record(&requests, method, "/api/v1/query", &params);
    if is_failing(&params) {
        return execution_error();
    }

    let time = param_f64(&params, "time");
    success(json!({
        "resultType": "vector",
        "result": [
            {"metric": {"job": "api", "instance": "api-0"}, "value": [time, "1"]},
            {"metric": {"job": "api", "instance": "api-1"}, "value": [time, "0"]}
        ]
    }))
}

async fn query_exemplars(
    State(requests): State<Recorder>,
    method: Method,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    record(&requests, method, "/api/v1/query_exemplars", &params);
    if is_failing(&params) {
        return execution_error();
    }

    let start = param_f64(&params, "start").floor();
    success(json!([{
        "seriesLabels": {"__name__": "latency_bucket", "service": "checkout"},
        "exemplars": [
            {"labels": {"traceID": "abc"}, "value": "0.5", "timestamp": start + 5.0},
            {"labels": {"traceID": "def"}, "value": "0.7", "timestamp": start + 3600.0}
        ]
    }]))
}
