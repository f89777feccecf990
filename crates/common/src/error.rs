use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transient connect failure, or the retry bound was exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Malformed or unexpected exchange payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Rejected trade or ledger input.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Every symbol of a historical fetch failed.
    #[error("Historical data unavailable for all {} symbols", .0.len())]
    HistoryUnavailable(Vec<(String, String)>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
