#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::checkpoint::InMemoryCheckpointStore;
use super::ports::{
    Checkpoint, CheckpointStore, Completion, CompletionPort, CompletionPurpose,
    CompletionRequest, EventSink, PortFuture, RetrievalCandidate, RetrievalPort, RetrievalScope,
    SchemaMetadataPort, SqlExecutionPort,
};
use super::{PipelineSettings, Supervisor};
use crate::error::CopilotError;
use crate::types::{
    ClarificationAnswers, ColumnMetadata, ConnectionId, Dialect, ExecutionOutcome, FallbackReason,
    ProgressEvent, ProgressEventKind, RunStatus, SchemaMetadata, Stage, TableMetadata, ThreadId,
    TurnRequest, TurnStatus,
};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

/// Every port on one struct, so the supervisor runs through the blanket
/// `PipelinePorts` impl with no service wiring or retry decorator.
struct FakePorts {
    intent: Mutex<Value>,
    sql: Mutex<Option<String>>,
    generations: Mutex<usize>,
    executed: Mutex<Vec<String>>,
    checkpoints: InMemoryCheckpointStore,
    events: Mutex<Vec<ProgressEvent>>,
}

impl FakePorts {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            intent: Mutex::new(json!({"intent": "data_query", "confidence": 0.95})),
            sql: Mutex::new(None),
            generations: Mutex::new(0),
            executed: Mutex::new(Vec::new()),
            checkpoints: InMemoryCheckpointStore::new(),
            events: Mutex::new(Vec::new()),
        })
    }

    fn given_intent(&self, intent: &str, confidence: f64) {
        *self.intent.lock().unwrap() = json!({"intent": intent, "confidence": confidence});
    }

    fn given_sql(&self, sql: &str) {
        *self.sql.lock().unwrap() = Some(sql.to_string());
    }

    fn generations(&self) -> usize {
        *self.generations.lock().unwrap()
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl CompletionPort for FakePorts {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        let reply = match request.purpose {
            CompletionPurpose::IntentClassification => {
                Ok(Completion::structured(self.intent.lock().unwrap().clone()))
            }
            CompletionPurpose::SqlGeneration => {
                *self.generations.lock().unwrap() += 1;
                self.sql
                    .lock()
                    .unwrap()
                    .clone()
                    .map(|sql| Completion::structured(json!({"sql": sql, "needs_clarification": false})))
                    .ok_or_else(|| CopilotError::completion("no scripted sql", false))
            }
            CompletionPurpose::InsightAnalysis => Ok(Completion::structured(json!({
                "summary": "Orders brought in 1250.5 in total.",
                "highlights": [],
                "anomalies": []
            }))),
            CompletionPurpose::GeneralChat => Ok(Completion::text("Hi! Ask me about your data.")),
        };
        Box::pin(async move { reply })
    }
}

impl SqlExecutionPort for FakePorts {
    fn execute<'a>(
        &'a self,
        _connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        self.executed.lock().unwrap().push(sql.to_string());
        let mut row = Map::new();
        row.insert("total".to_string(), json!(1250.5));
        let outcome = ExecutionOutcome::rows(vec!["total".to_string()], vec![row], false);
        Box::pin(async move { Ok(outcome) })
    }
}

impl SchemaMetadataPort for FakePorts {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        _table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        let column = |name: &str, data_type: &str| ColumnMetadata {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            is_primary_key: name == "id",
        };
        let metadata = SchemaMetadata {
            connection_id: connection_id.clone(),
            dialect: Dialect::Postgres,
            tables: vec![TableMetadata {
                name: "orders".to_string(),
                columns: vec![
                    column("id", "integer"),
                    column("order_date", "date"),
                    column("amount", "numeric"),
                ],
                description: None,
            }],
            relationships: Vec::new(),
        };
        Box::pin(async move { Ok(metadata) })
    }
}

impl RetrievalPort for FakePorts {
    fn find_similar<'a>(
        &'a self,
        _query_text: &'a str,
        _scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

impl CheckpointStore for FakePorts {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        self.checkpoints.save_checkpoint(checkpoint)
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        self.checkpoints.load_checkpoint(thread_id)
    }
}

impl EventSink for FakePorts {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn given_supervisor(ports: &Arc<FakePorts>) -> Supervisor<Arc<FakePorts>> {
    let settings = PipelineSettings {
        retry: crate::retry::RetryPolicy::no_retry(),
        ..PipelineSettings::default()
    };
    Supervisor::new(Arc::clone(ports), settings)
}

fn shop() -> ConnectionId {
    ConnectionId::new("shop")
}

#[tokio::test]
async fn unsure_data_query_is_treated_as_chat() {
    let ports = FakePorts::new();
    ports.given_intent("data_query", 0.3);
    let supervisor = given_supervisor(&ports);

    let response = supervisor
        .run_turn(TurnRequest::new(shop(), "orders maybe?"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.message, "Hi! Ask me about your data.");
    assert_eq!(ports.generations(), 0);
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
    let ports = FakePorts::new();
    ports.given_sql("SELECT SUM(amount) AS total FROM orders");
    let supervisor = given_supervisor(&ports);

    let first = supervisor
        .run_turn(TurnRequest::new(shop(), "Total sales in 2024?"))
        .await
        .unwrap();
    let second = supervisor
        .run_turn(TurnRequest::new(shop(), "total sales in 2024"))
        .await
        .unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(second.fast_mode);
    assert!(second.insight.is_none());
    assert_eq!(ports.generations(), 1);
    assert_eq!(ports.executed().len(), 2);

    let state = supervisor
        .conversation(&second.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state.messages.last().unwrap().payload,
        Some(json!({"sql": "SELECT SUM(amount) AS total FROM orders"}))
    );
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let ports = FakePorts::new();
    let supervisor = given_supervisor(&ports);

    let err = supervisor
        .run_turn(TurnRequest::new(shop(), "   "))
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::ConfigError(_)));
}

#[tokio::test]
async fn thread_cannot_switch_connection() {
    let ports = FakePorts::new();
    ports.given_intent("general_chat", 0.9);
    let supervisor = given_supervisor(&ports);
    let first = supervisor
        .run_turn(TurnRequest::new(shop(), "hi"))
        .await
        .unwrap();

    let err = supervisor
        .run_turn(
            TurnRequest::new(ConnectionId::new("warehouse"), "hi again")
                .on_thread(first.thread_id.clone()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::Conflict(_)));
}

#[tokio::test]
async fn resume_rejects_answers_for_other_questions() {
    let ports = FakePorts::new();
    ports.given_sql("SELECT COUNT(*) AS total FROM orders");
    let supervisor = given_supervisor(&ports);
    let suspended = supervisor
        .run_turn(TurnRequest::new(shop(), "how many?"))
        .await
        .unwrap();
    assert_eq!(suspended.status, TurnStatus::NeedsClarification);

    let err = supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("time_range", "Last 7 days"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::ResumeError(_)));
    let state = supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, RunStatus::Suspended);
}

#[tokio::test]
async fn resume_of_a_turn_that_never_asked_fails() {
    let ports = FakePorts::new();
    ports.given_intent("general_chat", 0.9);
    let supervisor = given_supervisor(&ports);
    let done = supervisor
        .run_turn(TurnRequest::new(shop(), "hi"))
        .await
        .unwrap();

    let err = supervisor
        .resume(&done.thread_id, &ClarificationAnswers::single("subject", "Orders"))
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::ResumeError(_)));
}

#[tokio::test]
async fn generation_port_failure_becomes_service_fallback() {
    let ports = FakePorts::new();
    let supervisor = given_supervisor(&ports);

    let response = supervisor
        .run_turn(TurnRequest::new(shop(), "total sales in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Fallback);
    assert_eq!(
        response.fallback_reason,
        Some(FallbackReason::ServiceUnavailable)
    );
    assert!(!response.message.to_lowercase().contains("scripted"));
    assert!(ports.executed().is_empty());
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let ports = FakePorts::new();
    ports.given_sql("SELECT SUM(amount) AS total FROM orders");
    let supervisor = given_supervisor(&ports);

    supervisor
        .run_turn(TurnRequest::new(shop(), "total sales in 2024"))
        .await
        .unwrap();

    let events = ports.events.lock().unwrap().clone();
    assert!(events
        .windows(2)
        .all(|pair| pair[0].sequence < pair[1].sequence));
    let entered: Vec<Stage> = events
        .iter()
        .filter_map(|event| match event.kind {
            ProgressEventKind::StageEntered { stage } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        entered,
        vec![
            Stage::IntentRouting,
            Stage::CacheLookup,
            Stage::SchemaResolution,
            Stage::SqlGeneration,
            Stage::SafetyCheck,
            Stage::SqlExecution,
            Stage::InsightAnalysis,
            Stage::ChartRecommendation,
        ]
    );
    assert!(matches!(
        events.last().unwrap().kind,
        ProgressEventKind::Finished {
            status: RunStatus::Completed
        }
    ));
}
