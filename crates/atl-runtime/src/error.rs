//! Runtime errors

use thiserror::Error;

use crate::ids::{ObjectId, StandaloneFileId, TriggerId};

/// Errors surfaced by the audio runtime
#[derive(Error, Debug)]
pub enum AtlError {
    #[error("Audio object pool exhausted (capacity {0})")]
    ObjectPoolExhausted(usize),

    #[error("Event pool exhausted (capacity {0})")]
    EventPoolExhausted(usize),

    #[error("Standalone file pool exhausted (capacity {0})")]
    FilePoolExhausted(usize),

    #[error("Unknown audio object: {0}")]
    UnknownObject(ObjectId),

    #[error("Unknown trigger: {0}")]
    UnknownTrigger(TriggerId),

    #[error("Unknown standalone file: {0}")]
    UnknownFile(StandaloneFileId),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request queue disconnected")]
    QueueDisconnected,

    #[error("Audio thread error: {0}")]
    Thread(String),
}

/// Result type for runtime operations
pub type AtlResult<T> = Result<T, AtlError>;
