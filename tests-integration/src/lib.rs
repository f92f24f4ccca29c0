/// Common test utilities and helpers for integration tests
use common::config::{Configuration, HttpMethod};

pub mod test_helpers;

/// Create a test configuration pointing at the given Prometheus base URL
pub fn create_test_config(prometheus_url: &str, http_method: HttpMethod) -> Configuration {
    let mut config = Configuration::default();

    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.datasource.url = prometheus_url.to_string();
    config.datasource.http_method = http_method;
    config.datasource.time_interval = Some("15s".to_string());

    config
}

/// Initialize test logging
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
