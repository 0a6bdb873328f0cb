use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Failure family used by error recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Syntax,
    MissingObject,
    Timeout,
    Connection,
    PermissionDenied,
    UnsafeSql,
    Generation,
    Internal,
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::MissingObject => "missing_object",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::PermissionDenied => "permission_denied",
            Self::UnsafeSql => "unsafe_sql",
            Self::Generation => "generation",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }

    /// Regenerating SQL can plausibly fix this kind of failure.
    #[must_use]
    pub const fn is_regenerable(&self) -> bool {
        matches!(
            self,
            Self::Syntax
                | Self::MissingObject
                | Self::Timeout
                | Self::UnsafeSql
                | Self::Generation
                | Self::Unknown
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the execution port hands back for one statement.
///
/// Engine-reported failures travel here as data so they are never retried
/// by transport backoff.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn rows(columns: Vec<String>, rows: Vec<Map<String, Value>>, truncated: bool) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            columns,
            rows,
            truncated,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: FailureKind,
    pub message: String,
}

/// Executor output stored on the conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub attempt: u32,
    pub sql: String,
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub error: Option<ExecutionError>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.success && self.rows.is_empty()
    }

    /// Values of one column in row order. Missing cells become `Null`.
    #[must_use]
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        self.rows
            .iter()
            .map(|row| row.get(column).unwrap_or(&Value::Null))
            .collect()
    }
}
