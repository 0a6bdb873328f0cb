#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use copilot::orchestrator_service::checkpoint::InMemoryCheckpointStore;
use copilot::orchestrator_service::ports::{
    Completion, CompletionPort, CompletionPurpose, CompletionRequest, EventSink, PortFuture,
    SchemaMetadataPort, SqlExecutionPort,
};
use copilot::orchestrator_service::resilient::ResilientPorts;
use copilot::orchestrator_service::service_ports::ServicePorts;
use copilot::retry::RetryPolicy;
use copilot::{
    ColumnMetadata, ConnectionId, CopilotError, Dialect, ExecutionOutcome, PipelineSettings,
    ProgressEvent, Relationship, RetrievalIndex, SchemaMetadata, Supervisor, TableMetadata,
};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Language model double: scripted intent and SQL replies, canned insight
/// and chat text. Queued SQL replies are served in order and the last one
/// served repeats until another is queued.
pub struct ScriptedModel {
    intent: Mutex<Value>,
    sql_replies: Mutex<VecDeque<Value>>,
    last_sql_reply: Mutex<Option<Value>>,
    purposes: Mutex<Vec<CompletionPurpose>>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            intent: Mutex::new(json!({"intent": "data_query", "confidence": 0.95})),
            sql_replies: Mutex::new(VecDeque::new()),
            last_sql_reply: Mutex::new(None),
            purposes: Mutex::new(Vec::new()),
        }
    }

    pub fn given_intent(&self, intent: &str, confidence: f64) {
        *self.intent.lock().unwrap() = json!({"intent": intent, "confidence": confidence});
    }

    pub fn given_sql(&self, sql: &str) {
        self.sql_replies.lock().unwrap().push_back(json!({
            "sql": sql,
            "rationale": "answers the question from the shop tables",
            "needs_clarification": false,
            "ambiguity": null
        }));
    }

    pub fn given_clarifying_reply(&self, ambiguity: &str) {
        self.sql_replies.lock().unwrap().push_back(json!({
            "sql": null,
            "rationale": "",
            "needs_clarification": true,
            "ambiguity": ambiguity
        }));
    }

    pub fn calls(&self, purpose: CompletionPurpose) -> usize {
        self.purposes
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| **seen == purpose)
            .count()
    }
}

impl CompletionPort for ScriptedModel {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        self.purposes.lock().unwrap().push(request.purpose);
        let reply = match request.purpose {
            CompletionPurpose::IntentClassification => {
                Ok(Completion::structured(self.intent.lock().unwrap().clone()))
            }
            CompletionPurpose::SqlGeneration => {
                let mut last = self.last_sql_reply.lock().unwrap();
                if let Some(next) = self.sql_replies.lock().unwrap().pop_front() {
                    *last = Some(next);
                }
                last.clone()
                    .map(Completion::structured)
                    .ok_or_else(|| CopilotError::completion("no scripted sql", false))
            }
            CompletionPurpose::InsightAnalysis => Ok(Completion::structured(json!({
                "summary": "Sales grew from January to February.",
                "highlights": ["February was the stronger month"],
                "anomalies": []
            }))),
            CompletionPurpose::GeneralChat => {
                Ok(Completion::text("Hello! Ask me anything about the shop data."))
            }
        };
        Box::pin(async move { reply })
    }
}

/// Target database double with a small shop schema.
pub struct FakeWarehouse {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    executed: Mutex<Vec<String>>,
    schema_fetches: Mutex<usize>,
}

impl FakeWarehouse {
    fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
            schema_fetches: Mutex::new(0),
        }
    }

    pub fn given_outcome(&self, outcome: ExecutionOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn schema_fetches(&self) -> usize {
        *self.schema_fetches.lock().unwrap()
    }
}

pub fn monthly_sales() -> ExecutionOutcome {
    rows(
        &["month", "total_sales"],
        vec![
            vec![json!("2024-01-01"), json!(1200.0)],
            vec![json!("2024-02-01"), json!(1450.5)],
        ],
    )
}

pub fn rows(columns: &[&str], values: Vec<Vec<Value>>) -> ExecutionOutcome {
    let rows = values
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(ToString::to_string)
                .zip(row)
                .collect::<Map<String, Value>>()
        })
        .collect();
    ExecutionOutcome::rows(columns.iter().map(ToString::to_string).collect(), rows, false)
}

impl SqlExecutionPort for FakeWarehouse {
    fn execute<'a>(
        &'a self,
        _connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        self.executed.lock().unwrap().push(sql.to_string());
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(monthly_sales);
        Box::pin(async move { Ok(outcome) })
    }
}

fn column(name: &str, data_type: &str) -> ColumnMetadata {
    ColumnMetadata {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: name != "id",
        is_primary_key: name == "id",
    }
}

pub fn shop_schema(connection_id: &ConnectionId) -> SchemaMetadata {
    SchemaMetadata {
        connection_id: connection_id.clone(),
        dialect: Dialect::Postgres,
        tables: vec![
            TableMetadata {
                name: "orders".to_string(),
                columns: vec![
                    column("id", "integer"),
                    column("customer_id", "integer"),
                    column("date", "date"),
                    column("amount", "numeric"),
                    column("revenue", "numeric"),
                    column("status", "text"),
                ],
                description: Some("One row per checkout".to_string()),
            },
            TableMetadata {
                name: "customers".to_string(),
                columns: vec![
                    column("id", "integer"),
                    column("name", "text"),
                    column("region", "text"),
                ],
                description: None,
            },
        ],
        relationships: vec![Relationship {
            from_table: "orders".to_string(),
            from_column: "customer_id".to_string(),
            to_table: "customers".to_string(),
            to_column: "id".to_string(),
        }],
    }
}

impl SchemaMetadataPort for FakeWarehouse {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        _table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        *self.schema_fetches.lock().unwrap() += 1;
        let metadata = shop_schema(connection_id);
        Box::pin(async move { Ok(metadata) })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub type TestPorts = ResilientPorts<
    ServicePorts<
        Arc<ScriptedModel>,
        Arc<FakeWarehouse>,
        Arc<FakeWarehouse>,
        Arc<RetrievalIndex>,
        Arc<InMemoryCheckpointStore>,
        Arc<RecordingSink>,
    >,
>;

/// One supervisor wired to fresh doubles. Checkpoints and the retrieval
/// index can be shared between harnesses to simulate a restarted process.
pub struct Harness {
    pub model: Arc<ScriptedModel>,
    pub warehouse: Arc<FakeWarehouse>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub retrieval: Arc<RetrievalIndex>,
    pub events: Arc<RecordingSink>,
    pub supervisor: Supervisor<TestPorts>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(RetrievalIndex::ephemeral()),
            given_settings(),
        )
    }

    pub fn sharing(checkpoints: &Arc<InMemoryCheckpointStore>, retrieval: &Arc<RetrievalIndex>) -> Self {
        Self::with_settings(Arc::clone(checkpoints), Arc::clone(retrieval), given_settings())
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::with_settings(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(RetrievalIndex::ephemeral()),
            PipelineSettings {
                max_retries,
                ..given_settings()
            },
        )
    }

    fn with_settings(
        checkpoints: Arc<InMemoryCheckpointStore>,
        retrieval: Arc<RetrievalIndex>,
        settings: PipelineSettings,
    ) -> Self {
        let model = Arc::new(ScriptedModel::new());
        let warehouse = Arc::new(FakeWarehouse::new());
        let events = Arc::new(RecordingSink::default());
        let ports = ResilientPorts::new(
            ServicePorts {
                completion: Arc::clone(&model),
                executor: Arc::clone(&warehouse),
                schema: Arc::clone(&warehouse),
                retrieval: Arc::clone(&retrieval),
                checkpoints: Arc::clone(&checkpoints),
                events: Arc::clone(&events),
            },
            settings.retry,
        );
        Self {
            model,
            warehouse,
            checkpoints,
            retrieval,
            events,
            supervisor: Supervisor::new(ports, settings),
        }
    }
}

pub fn given_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::no_retry(),
        ..PipelineSettings::default()
    }
}

pub fn shop() -> ConnectionId {
    ConnectionId::new("shop")
}
