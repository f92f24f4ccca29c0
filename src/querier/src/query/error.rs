use std::time::Duration;

use common::interval::IntervalError;

use crate::client::ClientError;
use crate::data::FrameError;
use crate::query::QueryType;

#[derive(Debug, thiserror::Error)]
pub enum QuerierError {
    #[error("Invalid query model: {0}")]
    InvalidModel(#[from] serde_json::Error),
    #[error("Invalid interval: {0}")]
    InvalidInterval(#[from] IntervalError),
    #[error("{kind} query failed: {source}")]
    Backend {
        kind: QueryType,
        #[source]
        source: ClientError,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Query cancelled")]
    Cancelled,
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),
}

impl QuerierError {
    /// HTTP status reported for a failed query slot.
    pub fn status_code(&self) -> u16 {
        match self {
            QuerierError::InvalidModel(_) | QuerierError::InvalidInterval(_) => 400,
            QuerierError::NotImplemented(_) => 501,
            _ => 500,
        }
    }
}
