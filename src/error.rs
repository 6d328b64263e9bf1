use thiserror::Error;

/// Errors produced by the queue engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No target model was selected (or the selection still carries the
    /// "not yet connected" placeholder). Rejected before a job is built.
    #[error("No model selected: connect to the server and pick a model first")]
    NoModelSelected,

    /// A required input was missing from the UI snapshot (e.g. the inpaint
    /// source image).
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// The server returned a non-success HTTP status.
    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The response from the server was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// The server never finished loading the requested model.
    #[error("Timeout: server failed to load model {model} after {attempts} attempts")]
    AlignmentTimeout { model: String, attempts: u32 },

    /// A drain was requested while one is already running, or the ongoing
    /// list is empty.
    #[error("{0}")]
    QueueBusy(String),

    /// Queue state could not be written to or read from durable storage.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;
