use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

use crate::interval::{IntervalError, parse_interval};

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

/// HTTP method used for Prometheus query calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the query HTTP API binds to
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::from("0.0.0.0:9000"),
        }
    }
}

/// Settings of the Prometheus datasource being queried
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Base URL of the Prometheus HTTP API (e.g., http://localhost:9090)
    pub url: String,
    /// Scrape interval of the datasource (e.g., "15s"), used as minimum step
    pub time_interval: Option<String>,
    /// Method used for query requests
    pub http_method: HttpMethod,
    /// Extra query parameters appended to every call (e.g., "dedup=false&partial_response=true")
    pub custom_query_parameters: Option<String>,
    /// Timeout for a single backend HTTP call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:9090"),
            time_interval: None,
            http_method: HttpMethod::Post,
            custom_query_parameters: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DataSourceConfig {
    /// Parsed scrape interval, if one is configured.
    pub fn scrape_interval(&self) -> Result<Option<Duration>, IntervalError> {
        match self.time_interval.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(interval) => parse_interval(interval).map(Some),
        }
    }

    /// Custom query parameters as ordered key/value pairs.
    pub fn custom_parameters(&self) -> Vec<(String, String)> {
        self.custom_query_parameters
            .as_deref()
            .map(|params| {
                url::form_urlencoded::parse(params.trim_start_matches('?').as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound of queries of one request executed at the same time
    pub max_concurrent_queries: usize,
    /// Deadline for each query of a request, covering all of its backend calls
    #[serde(default, with = "humantime_serde")]
    pub query_timeout: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 4,
            query_timeout: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Prometheus datasource configuration
    pub datasource: DataSourceConfig,
    /// Query execution configuration
    pub query: QueryConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("promframe.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file_exact(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("PROMFRAME__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
