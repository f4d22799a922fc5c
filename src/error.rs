//! Pipeline error taxonomy.
//!
//! Only `Configuration` is allowed to stop the process. Every other variant is
//! contained by the stage that produced it: transport failures are retried by
//! the reader, unknown sources are dropped by the dispatcher, delivery failures
//! are logged by the sender.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport error on source '{source_id}': {message}")]
    Transport { source_id: String, message: String },

    #[error("frame from unknown source '{0}'")]
    UnknownSource(String),

    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn transport(source_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    pub fn delivery(message: impl std::fmt::Display) -> Self {
        Self::Delivery(message.to_string())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
