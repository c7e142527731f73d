use thiserror::Error;

#[derive(Debug, Error)]
pub enum AriaError {
    /// Bad or missing configuration. Fatal to `start()`.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The realtime handshake did not complete. Fatal to `start()`, the
    /// caller may retry with a fresh `start()`.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed traffic or an error event from the remote side mid-session.
    /// Terminates the session.
    #[error("Remote protocol error: {0}")]
    RemoteProtocol(String),

    /// A requested turn never reached a terminal event within its window.
    /// The session stays active, only that turn fails.
    #[error("Turn timed out: {0}")]
    TurnTimeout(String),

    /// Microphone or speaker failure. Triggers an automatic `stop()`.
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AriaError>;
