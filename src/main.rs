use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::{CONFIG, Configuration};
use querier::QueryExecutor;
use querier::endpoints::{QueryRequestBody, QueryResponseBody};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "promframe")]
#[command(about = "Prometheus query API - turns PromQL results into data frames")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queries of a request file once and print the response
    Query {
        /// JSON request in the POST /api/ds/query format
        file: PathBuf,

        #[arg(long, help = "Mark the request as coming from alert evaluation")]
        from_alert: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    // Load application configuration
    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        Commands::Query { file, from_alert } => run_query_file(&config, &file, from_alert).await,
        Commands::Common(command) => {
            // Handle common commands that don't require starting the service
            if utils::handle_common_command(&command, &config)? {
                return Ok(());
            }
            utils::validate_config(&config)?;
            start(config).await
        }
    }
}

async fn start(config: Configuration) -> Result<()> {
    let config = CONFIG.get_or_init(|| config).clone();

    let (init_tx, init_rx) = oneshot::channel::<()>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        if let Err(e) = querier::serve_querier_http(config, init_tx, shutdown_rx, stopped_tx).await
        {
            log::error!("Querier HTTP server failed: {e:#}");
        }
    });

    init_rx
        .await
        .context("Querier HTTP server failed to start")?;
    log::info!("promframe started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutting down promframe");

    let _ = shutdown_tx.send(());
    let _ = stopped_rx.await;
    server.await.context("Querier HTTP server task panicked")?;

    log::info!("promframe stopped");
    Ok(())
}

async fn run_query_file(config: &Configuration, file: &Path, from_alert: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read request file {}", file.display()))?;
    let body: QueryRequestBody = serde_json::from_str(&content)
        .with_context(|| format!("Invalid request file {}", file.display()))?;

    let mut headers = HashMap::new();
    if from_alert {
        headers.insert(
            querier::query::FROM_ALERT_HEADER.to_string(),
            "true".to_string(),
        );
    }
    let request = body.into_request(headers).map_err(anyhow::Error::msg)?;

    let executor = QueryExecutor::from_config(config)?;
    let response = executor
        .query_data(request, &CancellationToken::new())
        .await;

    let output = serde_json::to_string_pretty(&QueryResponseBody::from(response))
        .context("Failed to serialize query response")?;
    println!("{output}");
    Ok(())
}
