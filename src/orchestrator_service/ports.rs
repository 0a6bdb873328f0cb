use crate::types::{
    ConnectionId, ConversationState, ExecutionOutcome, ProgressEvent, SchemaMetadata, ThreadId,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPurpose {
    IntentClassification,
    SqlGeneration,
    InsightAnalysis,
    GeneralChat,
}

impl CompletionPurpose {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IntentClassification => "intent_classification",
            Self::SqlGeneration => "sql_generation",
            Self::InsightAnalysis => "insight_analysis",
            Self::GeneralChat => "general_chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub purpose: CompletionPurpose,
    pub messages: Vec<PromptMessage>,
    /// JSON schema the reply must satisfy, when structured output is wanted.
    pub response_schema: Option<Value>,
    pub temperature: f32,
}

impl CompletionRequest {
    #[must_use]
    pub const fn new(purpose: CompletionPurpose, messages: Vec<PromptMessage>) -> Self {
        Self {
            purpose,
            messages,
            response_schema: None,
            temperature: 0.0,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Concatenated user-visible prompt text; handy for logging and fakes.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub structured: Option<Value>,
}

impl Completion {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    #[must_use]
    pub fn structured(value: Value) -> Self {
        Self {
            text: value.to_string(),
            structured: Some(value),
        }
    }

    /// Structured payload if present, otherwise the text parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        self.structured.clone().or_else(|| {
            let trimmed = self.text.trim();
            let body = trimmed
                .strip_prefix("```json")
                .or_else(|| trimmed.strip_prefix("```"))
                .map_or(trimmed, |rest| rest.trim_end_matches("```"))
                .trim();
            serde_json::from_str(body).ok()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalScope {
    pub connection_id: ConnectionId,
    pub limit: usize,
}

/// Prior question/SQL pair scored against the current question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub question: String,
    pub sql: String,
    pub tables: Vec<String>,
    pub vector_score: f64,
    pub graph_score: f64,
    pub score: f64,
}

/// Versioned snapshot of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub thread_id: ThreadId,
    pub state: ConversationState,
    pub saved_at: DateTime<Utc>,
}

pub trait CompletionPort {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion>;

    /// Optional embedding used by the semantic cache tier.
    fn embed<'a>(&'a self, _text: &'a str) -> PortFuture<'a, Option<Vec<f32>>> {
        Box::pin(async { Ok(None) })
    }
}

pub trait SqlExecutionPort {
    /// Engine errors come back as a failed [`ExecutionOutcome`]; only
    /// transport problems are `Err`.
    fn execute<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome>;
}

pub trait SchemaMetadataPort {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata>;
}

pub trait RetrievalPort {
    fn find_similar<'a>(
        &'a self,
        query_text: &'a str,
        scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>>;

    fn remember<'a>(
        &'a self,
        _connection_id: &'a ConnectionId,
        _question: &'a str,
        _sql: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Stops serving `sql` on the connection after it failed to execute.
    fn mark_failed<'a>(
        &'a self,
        _connection_id: &'a ConnectionId,
        _sql: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub trait CheckpointStore {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()>;

    fn load_checkpoint<'a>(&'a self, thread_id: &'a ThreadId)
        -> PortFuture<'a, Option<Checkpoint>>;
}

/// Fire-and-forget progress stream. Must never block the pipeline.
pub trait EventSink {
    fn emit(&self, event: ProgressEvent);
}

pub trait PipelinePorts:
    CompletionPort + SqlExecutionPort + SchemaMetadataPort + RetrievalPort + CheckpointStore + EventSink
{
}

impl<T> PipelinePorts for T where
    T: CompletionPort
        + SqlExecutionPort
        + SchemaMetadataPort
        + RetrievalPort
        + CheckpointStore
        + EventSink
{
}

impl<T: CompletionPort + ?Sized> CompletionPort for Arc<T> {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        (**self).complete(request)
    }

    fn embed<'a>(&'a self, text: &'a str) -> PortFuture<'a, Option<Vec<f32>>> {
        (**self).embed(text)
    }
}

impl<T: SqlExecutionPort + ?Sized> SqlExecutionPort for Arc<T> {
    fn execute<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        (**self).execute(connection_id, sql)
    }
}

impl<T: SchemaMetadataPort + ?Sized> SchemaMetadataPort for Arc<T> {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        (**self).get_schema(connection_id, table_filter)
    }
}

impl<T: RetrievalPort + ?Sized> RetrievalPort for Arc<T> {
    fn find_similar<'a>(
        &'a self,
        query_text: &'a str,
        scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        (**self).find_similar(query_text, scope)
    }

    fn remember<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        question: &'a str,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        (**self).remember(connection_id, question, sql)
    }

    fn mark_failed<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        (**self).mark_failed(connection_id, sql)
    }
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        (**self).save_checkpoint(checkpoint)
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        (**self).load_checkpoint(thread_id)
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event);
    }
}
