use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ChartRecommendation, ClarificationQuestion, ConnectionId, Insight, ThreadId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DataQuery,
    GeneralChat,
}

impl Intent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DataQuery => "data_query",
            Self::GeneralChat => "general_chat",
        }
    }
}

/// Why a turn ended on the graceful fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NotUnderstood,
    UnsafeRequest,
    PermissionDenied,
    DataSourceUnavailable,
    QueryTimedOut,
    RepeatedFailure,
    RetriesExhausted,
    ServiceUnavailable,
    Internal,
}

impl FallbackReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotUnderstood => "not_understood",
            Self::UnsafeRequest => "unsafe_request",
            Self::PermissionDenied => "permission_denied",
            Self::DataSourceUnavailable => "data_source_unavailable",
            Self::QueryTimedOut => "query_timed_out",
            Self::RepeatedFailure => "repeated_failure",
            Self::RetriesExhausted => "retries_exhausted",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }
}

/// One caller question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub thread_id: Option<ThreadId>,
    pub connection_id: ConnectionId,
    pub question: String,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub profile_id: Option<String>,
}

impl TurnRequest {
    #[must_use]
    pub fn new(connection_id: ConnectionId, question: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            connection_id,
            question: question.into(),
            fast_mode: false,
            profile_id: None,
        }
    }

    #[must_use]
    pub fn on_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    #[must_use]
    pub const fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    NeedsClarification,
    Fallback,
}

/// What the caller gets back for a turn or a resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub thread_id: ThreadId,
    pub turn: u32,
    pub status: TurnStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<Insight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartRecommendation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<ClarificationQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub cache_hit: bool,
    pub fast_mode: bool,
    pub retry_count: u32,
}

impl TurnResponse {
    #[must_use]
    pub fn new(thread_id: ThreadId, turn: u32, status: TurnStatus, message: impl Into<String>) -> Self {
        Self {
            thread_id,
            turn,
            status,
            message: message.into(),
            sql: None,
            rationale: None,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            insight: None,
            chart: None,
            questions: Vec::new(),
            fallback_reason: None,
            cache_hit: false,
            fast_mode: false,
            retry_count: 0,
        }
    }

    #[must_use]
    pub const fn needs_clarification(&self) -> bool {
        matches!(self.status, TurnStatus::NeedsClarification)
    }
}
