//! Top-level error types for Switchboard.

use crate::security::ViolationKind;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this failure should be retried through the bus backoff path.
    ///
    /// Storage and reasoning failures are transient; security violations and
    /// malformed messages are not and must never be re-enqueued.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(_) | Error::Sqlx(_) | Error::Io(_) => true,
            Error::Pipeline(error) => error.is_retryable(),
            Error::Bus(_) | Error::Config(_) => false,
            Error::Other(_) => true,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("unknown or already settled queue token: {token}")]
    UnknownToken { token: uuid::Uuid },

    #[error("bus is shut down")]
    Closed,
}

/// Context store errors. Always treated as transient by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to load context for channel {channel_id}: {message}")]
    Load { channel_id: String, message: String },

    #[error("failed to save context for channel {channel_id}: {message}")]
    Save { channel_id: String, message: String },

    #[error("context serialization failed: {0}")]
    Serialize(String),
}

/// Pipeline stage errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The security gate rejected the message. Never retried; detail stays in
    /// telemetry, the user only ever sees the generic rejection text.
    #[error("security violation: {kind}")]
    SecurityViolation { kind: ViolationKind },

    /// Structural validation failed (oversized text, bad attachments, blocked
    /// user). Never retried.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The external reasoning call failed. Retried through the bus.
    #[error("reasoning call failed: {0}")]
    Reasoning(String),

    /// The reasoning call exceeded the message lease deadline. Retried.
    #[error("reasoning call timed out after {timeout_secs}s")]
    ReasoningTimeout { timeout_secs: u64 },

    /// The external summarization call failed during progressive compaction.
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// Retry ceiling exhausted. Terminal; surfaced to the user exactly once
    /// as a generic internal-error response.
    #[error("message dead-lettered after {attempts} attempts")]
    DeadLettered { attempts: u32 },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Reasoning(_)
                | PipelineError::ReasoningTimeout { .. }
                | PipelineError::Summarization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_violations_are_not_retryable() {
        let error = Error::Pipeline(PipelineError::SecurityViolation {
            kind: ViolationKind::InstructionOverride,
        });
        assert!(!error.is_retryable());
    }

    #[test]
    fn store_and_reasoning_failures_are_retryable() {
        let store = Error::Store(StoreError::Load {
            channel_id: "chan".into(),
            message: "disk gone".into(),
        });
        assert!(store.is_retryable());

        let reasoning = Error::Pipeline(PipelineError::ReasoningTimeout { timeout_secs: 30 });
        assert!(reasoning.is_retryable());
    }
}
