use thiserror::Error;

/// Crate-wide error taxonomy. Variants line up with the recovery policy:
/// `AuthInvalid` is the only one that blocks a component until operator
/// action; everything else is logged and absorbed by its caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication invalid: {0}")]
    AuthInvalid(String),

    #[error("connection stale: {0}")]
    Stale(String),

    #[error("malformed protocol frame: {0}")]
    ProtocolMalformed(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("invariant violated: {0}")]
    LogicError(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
