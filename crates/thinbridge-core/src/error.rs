use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport has not been initialized")]
    TransportUninitialized,

    #[error("transport is not ready")]
    NotReady,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(String),

    #[error("correlation id already registered: {0}")]
    DuplicateCorrelation(String),

    #[error("no restartable request for id: {0}")]
    NotRestartable(String),

    #[error("relayed message {0} has no pending reply; use post_message")]
    RelayedMessage(String),

    #[error("transport write failed: {0}")]
    Transport(String),

    #[error("bridge closed before the request settled")]
    Closed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
