use std::sync::Arc;

use axum::Router;
use common::config::Configuration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod client;
pub mod data;
pub mod endpoints;
pub mod query;

pub use query::{QueryExecutor, error::QuerierError};

/// Shared state of the query HTTP API.
#[derive(Clone)]
pub struct QuerierState {
    pub executor: Arc<QueryExecutor>,
    /// Cancelled on shutdown, aborting in-flight queries
    pub shutdown: CancellationToken,
}

pub fn query_router(state: QuerierState) -> Router {
    endpoints::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve_querier_http(
    config: Configuration,
    init_tx: oneshot::Sender<()>,
    shutdown_rx: oneshot::Receiver<()>,
    stopped_tx: oneshot::Sender<()>,
) -> Result<(), anyhow::Error> {
    let executor = QueryExecutor::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let state = QuerierState {
        executor: Arc::new(executor),
        shutdown: shutdown.clone(),
    };

    let addr = config.server.listen_addr.as_str();
    log::info!(
        "Starting querier on {} for datasource {}",
        addr,
        config.datasource.url
    );

    let app = query_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    init_tx
        .send(())
        .map_err(|_| anyhow::anyhow!("Unable to send init signal for querier http server"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
            log::info!("Shutting down querier http server");
            shutdown.cancel();
        })
        .await?;

    stopped_tx
        .send(())
        .map_err(|_| anyhow::anyhow!("Unable to send stopped signal for querier http server"))?;

    Ok(())
}
