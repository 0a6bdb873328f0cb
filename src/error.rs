#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const BUSY: &str = "BUSY";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Completion error: {message}")]
    CompletionError { message: String, retryable: bool },

    #[error("Execution transport error: {message}")]
    ExecutionTransport { message: String, retryable: bool },

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Resume error: {0}")]
    ResumeError(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stage error: {0}")]
    StageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CopilotError {
    #[must_use]
    pub fn completion(message: impl Into<String>, retryable: bool) -> Self {
        Self::CompletionError {
            message: message.into(),
            retryable,
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::ExecutionTransport {
            message: message.into(),
            retryable,
        }
    }

    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::ResumeError(_) | Self::SerializationError(_) => {
                code::INVALID
            }
            Self::NotFound(_) => code::NOTFOUND,
            Self::Conflict(_) | Self::StageError(_) => code::CONFLICT,
            Self::CompletionError { retryable: true, .. }
            | Self::ExecutionTransport { retryable: true, .. } => code::BUSY,
            Self::CompletionError { .. } | Self::ExecutionTransport { .. } | Self::IoError(_) => {
                code::DEPENDENCY
            }
            Self::DatabaseError(_)
            | Self::SqlxError(_)
            | Self::CheckpointError(_)
            | Self::Internal(_) => code::INTERNAL,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::DatabaseError(_) | Self::SqlxError(_) | Self::CheckpointError(_) => 3,
            Self::CompletionError { .. } | Self::ExecutionTransport { .. } => 4,
            Self::ResumeError(_) | Self::NotFound(_) | Self::Conflict(_) => 5,
            Self::StageError(_) => 6,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::Internal(_) => 9,
        }
    }

    /// Whether a backoff wrapper may transparently retry the failed call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CompletionError { retryable, .. } | Self::ExecutionTransport { retryable, .. } => {
                *retryable
            }
            Self::SqlxError(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Protocol error codes as documented in the CLI
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::CLI_ERROR,
        "Invalid CLI usage",
        "Run 'copilot help' for valid options",
    ),
    (
        code::NOTFOUND,
        "Conversation was not found",
        "Check the thread id or start a new conversation with 'copilot ask'",
    ),
    (
        code::INVALID,
        "Invalid request payload",
        "Validate the answers or configuration values and retry",
    ),
    (
        code::CONFLICT,
        "Conflicting conversation state",
        "Run 'copilot show --thread <id>' to inspect the current stage",
    ),
    (
        code::BUSY,
        "Dependency is temporarily unavailable",
        "Retry after a short pause",
    ),
    (
        code::DEPENDENCY,
        "External dependency failed",
        "Check the language model and database settings with 'copilot doctor'",
    ),
    (
        code::TIMEOUT,
        "Operation timed out",
        "Narrow the question or increase the statement timeout",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect logs and retry command",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, CopilotError>;
