use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Common subcommands available for all binaries
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the query API (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log filter directive derived from the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments, `RUST_LOG` takes precedence
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        // A subscriber may already be installed when embedded in tests
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("promframe Configuration:");
            println!("========================");
            println!("Listen address: {}", config.server.listen_addr);
            println!("Prometheus URL: {}", config.datasource.url);
            println!(
                "Scrape interval: {}",
                config.datasource.time_interval.as_deref().unwrap_or("15s (default)")
            );
            println!("HTTP method: {:?}", config.datasource.http_method);
            if let Some(params) = &config.datasource.custom_query_parameters {
                println!("Custom query parameters: {params}");
            }
            println!("Backend timeout: {:?}", config.datasource.timeout);
            println!(
                "Max concurrent queries: {}",
                config.query.max_concurrent_queries
            );
            match config.query.query_timeout {
                Some(timeout) => println!("Query timeout: {timeout:?}"),
                None => println!("Query timeout: none"),
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.datasource.url.is_empty() {
            anyhow::bail!("Datasource URL cannot be empty");
        }

        let url = url::Url::parse(&config.datasource.url)
            .with_context(|| format!("Invalid datasource URL {}", config.datasource.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Datasource URL must use http or https, got {}", url.scheme());
        }

        config
            .datasource
            .scrape_interval()
            .context("Invalid datasource time_interval")?;

        if config.query.max_concurrent_queries == 0 {
            anyhow::bail!("query.max_concurrent_queries must be at least 1");
        }

        config
            .server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?;

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
