use std::time::Duration;

use thiserror::Error;

/// Fatal errors. Any of these aborts the run before (or instead of) producing a report.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("initial test prompt failed ({0}). Make sure the benchmark arguments are correct")]
    TestPrompt(RequestError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to construct HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        BenchError::Dataset(msg.into())
    }
}

/// Errors local to a single request. These are tallied in the report and never abort the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed stream event: {0}")]
    Malformed(String),
    #[error("server reported an error: {0}")]
    Server(String),
    #[error("stream ended without producing any tokens")]
    Empty,
    #[error("request task ended without reporting a result")]
    Lost,
}

impl RequestError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RequestError::Timeout(timeout)
        } else if err.is_connect() {
            RequestError::Connect(err.to_string())
        } else {
            RequestError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
