// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LarchError {
    #[error("Route {0} not valid")]
    InvalidRoute(String),
    #[error("Stop {0} not valid")]
    InvalidStop(String),
    #[error("Malformed {field} in record {record}: {reason}")]
    MalformedRecord {
        record: String,
        field: &'static str,
        reason: String,
    },
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Connection pool error: {0}")]
    Pool(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Error joining concurrent task: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl LarchError {
    /// Argument errors are surfaced to the caller and never retried.
    pub fn is_argument_error(&self) -> bool {
        matches!(self, LarchError::InvalidRoute(_) | LarchError::InvalidStop(_))
    }
}

pub type LarchResult<T> = Result<T, LarchError>;
