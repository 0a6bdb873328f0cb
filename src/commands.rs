#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::cli::{
    parse_cli_args, split_global_options, suggest_commands, CliAction, CliCommand, CliError,
    OutputFormat,
};
use crate::config::{checkpoint_database_url, load_config, load_skills, Config};
use crate::output::{emit_cli_error, emit_error, emit_output};
use copilot::db::{
    connect_checkpoint_pool, initialize_schema_from_sql, ConnectionPools, PgCheckpointStore,
    PgSchemaMetadata, PgSqlExecutor, PoolSettings,
};
use copilot::diagnostics::redact_sensitive;
use copilot::llm::OpenAiCompletion;
use copilot::orchestrator_service::checkpoint::{load_state, InMemoryCheckpointStore};
use copilot::orchestrator_service::events::ChannelEventSink;
use copilot::orchestrator_service::ports::{Checkpoint, CheckpointStore, PortFuture};
use copilot::orchestrator_service::resilient::ResilientPorts;
use copilot::orchestrator_service::service_ports::ServicePorts;
use copilot::stage_executors::safety::check_sql;
use copilot::{
    ClarificationAnswers, ConnectionId, CopilotError, PipelineSettings, ProgressEvent,
    ProgressEventKind, Result, RetrievalIndex, Supervisor, ThreadId, TurnRequest, TurnResponse,
    TurnStatus,
};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_SCHEMA_PATH: &str = "sql/schema.sql";
const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_RECENT: i64 = 10;
const TEXT_PREVIEW_ROWS: usize = 10;

const HELP: &str = "copilot - ask questions about your databases in plain language

USAGE:
    copilot [--json] [--config <path>] <command> [flags]

COMMANDS:
    ask        --connection <id> --question <text> [--thread <id>] [--profile <id>] [--fast] [--ephemeral]
    resume     --thread <id> --answer <question_id>=<answer> [--answer ...]
    show       [--thread <id>] [--recent <n>]
    check-sql  --sql <statement>
    doctor     Check the checkpoint store, target connections and language model settings
    init-db    [--url <database_url>] [--schema <path>] [--dry]
    help       Show this message
    version    Print the version

Progress is streamed to stderr while a turn runs.";

/// Parses the process arguments, runs the command and returns the exit code.
pub async fn run(args: Vec<String>) -> i32 {
    let (options, rest) = match split_global_options(&args) {
        Ok(split) => split,
        Err(err) => return emit_cli_error(&OutputFormat::Text, &err.to_string(), &[]),
    };

    let command = match parse_cli_args(&rest) {
        Ok(CliAction::ShowHelp | CliAction::Command(CliCommand::Help)) => {
            println!("{HELP}");
            return 0;
        }
        Ok(CliAction::ShowVersion) => {
            emit_output(
                &options.output,
                "version",
                json!({"message": format!("copilot {}", env!("CARGO_PKG_VERSION")), "version": env!("CARGO_PKG_VERSION")}),
            );
            return 0;
        }
        Ok(CliAction::Command(command)) => command,
        Err(CliError::UnknownCommand { cmd }) => {
            let suggestions = suggest_commands(&cmd);
            return emit_cli_error(
                &options.output,
                &format!("Unknown command: {cmd}"),
                &suggestions,
            );
        }
        Err(err) => return emit_cli_error(&options.output, &err.to_string(), &[]),
    };

    let name = command.name();
    match dispatch(command, &options.output, options.config).await {
        Ok(code) => code,
        Err(err) => emit_error(&options.output, name, &err),
    }
}

async fn dispatch(command: CliCommand, output: &OutputFormat, config_path: Option<PathBuf>) -> Result<i32> {
    match command {
        CliCommand::CheckSql { sql } => Ok(check_sql_command(output, &sql)),
        CliCommand::Help => {
            println!("{HELP}");
            Ok(0)
        }
        CliCommand::Ask {
            connection,
            question,
            thread,
            profile,
            fast,
            ephemeral,
        } => {
            let config = load_config(config_path).await?;
            let mut request = TurnRequest::new(ConnectionId::new(connection), question)
                .with_fast_mode(fast.unwrap_or(false));
            if let Some(thread) = thread {
                request = request.on_thread(ThreadId::new(thread));
            }
            if let Some(profile) = profile {
                request = request.with_profile(profile);
            }
            ask_command(output, &config, request, ephemeral.unwrap_or(false)).await
        }
        CliCommand::Resume { thread, answers } => {
            let config = load_config(config_path).await?;
            resume_command(output, &config, ThreadId::new(thread), answers).await
        }
        CliCommand::Show { thread, recent } => {
            let config = load_config(config_path).await?;
            show_command(output, &config, thread, recent).await
        }
        CliCommand::Doctor => {
            let config = load_config(config_path).await?;
            doctor_command(output, &config).await
        }
        CliCommand::InitDb { url, schema, dry } => {
            let config = load_config(config_path).await?;
            init_db_command(output, &config, url, schema, dry.unwrap_or(false)).await
        }
    }
}

fn check_sql_command(output: &OutputFormat, sql: &str) -> i32 {
    let verdict = check_sql(sql);
    let message = if verdict.valid {
        format!("OK: {}", verdict.sanitized_sql)
    } else {
        format!(
            "Rejected: {}",
            verdict.error.as_deref().unwrap_or("statement is not allowed")
        )
    };
    emit_output(
        output,
        "check-sql",
        json!({
            "message": message,
            "valid": verdict.valid,
            "error": verdict.error,
            "warnings": verdict.warnings,
            "sanitized_sql": verdict.sanitized_sql,
        }),
    );
    i32::from(!verdict.valid)
}

/// Checkpoints live in PostgreSQL unless the caller asked for an
/// in-process store that dies with the command.
enum CheckpointBackend {
    Postgres(PgCheckpointStore),
    Memory(InMemoryCheckpointStore),
}

impl CheckpointStore for CheckpointBackend {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        match self {
            Self::Postgres(store) => store.save_checkpoint(checkpoint),
            Self::Memory(store) => store.save_checkpoint(checkpoint),
        }
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        match self {
            Self::Postgres(store) => store.load_checkpoint(thread_id),
            Self::Memory(store) => store.load_checkpoint(thread_id),
        }
    }
}

type CliPorts = ResilientPorts<
    ServicePorts<
        OpenAiCompletion,
        PgSqlExecutor,
        PgSchemaMetadata,
        Arc<RetrievalIndex>,
        CheckpointBackend,
        ChannelEventSink,
    >,
>;

/// Everything one `ask` or `resume` invocation owns.
struct Runtime {
    supervisor: Supervisor<CliPorts>,
    pools: Arc<ConnectionPools>,
    retrieval: Arc<RetrievalIndex>,
    printer: JoinHandle<()>,
}

impl Runtime {
    async fn start(output: &OutputFormat, config: &Config, ephemeral: bool) -> Result<Self> {
        let mut settings = PipelineSettings::default();
        if let Some(max_retries) = config.max_retries {
            settings.max_retries = max_retries;
        }

        let pools = Arc::new(ConnectionPools::new(
            config.connections.clone(),
            PoolSettings::default(),
        ));
        let checkpoints = if ephemeral {
            CheckpointBackend::Memory(InMemoryCheckpointStore::new())
        } else {
            let url = checkpoint_database_url(config);
            CheckpointBackend::Postgres(PgCheckpointStore::new(connect_checkpoint_pool(&url).await?))
        };
        let retrieval = Arc::new(RetrievalIndex::open(config.retrieval_snapshot.clone()).await?);
        let skills = match config.skills_path.as_deref() {
            Some(path) => load_skills(path).await?,
            None => Vec::new(),
        };
        let (events, receiver) = ChannelEventSink::channel(EVENT_CHANNEL_CAPACITY);

        let ports = ResilientPorts::new(
            ServicePorts {
                completion: OpenAiCompletion::new(config.llm_settings())?,
                executor: PgSqlExecutor::new(Arc::clone(&pools), settings.max_result_rows),
                schema: PgSchemaMetadata::new(Arc::clone(&pools)),
                retrieval: Arc::clone(&retrieval),
                checkpoints,
                events,
            },
            settings.retry,
        );
        debug!(skills = skills.len(), ephemeral, "supervisor configured");

        Ok(Self {
            supervisor: Supervisor::new(ports, settings).with_skills(skills),
            pools,
            retrieval,
            printer: tokio::spawn(print_progress(*output, receiver)),
        })
    }

    /// Dropping the supervisor closes the event channel, which ends the printer.
    async fn shutdown(self) -> Result<()> {
        let Self {
            supervisor,
            pools,
            retrieval,
            printer,
        } = self;
        let dropped = supervisor.ports().inner().events.dropped();
        drop(supervisor);
        if let Err(err) = printer.await {
            warn!(error = %err, "progress printer stopped abnormally");
        }
        if dropped > 0 {
            warn!(dropped, "progress events were dropped");
        }
        pools.close().await;
        retrieval.close().await
    }
}

async fn print_progress(output: OutputFormat, mut receiver: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = receiver.recv().await {
        match output {
            OutputFormat::Json => match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{line}"),
                Err(err) => debug!(error = %err, "progress event not serializable"),
            },
            OutputFormat::Text => {
                if let Some(line) = progress_line(&event) {
                    eprintln!("{line}");
                }
            }
        }
    }
}

fn progress_line(event: &ProgressEvent) -> Option<String> {
    match &event.kind {
        ProgressEventKind::StageEntered { stage } => Some(format!("... {stage}")),
        ProgressEventKind::StepMessage { stage, message } => Some(format!("    {stage}: {message}")),
        ProgressEventKind::PartialResult { .. } => None,
        ProgressEventKind::Suspended { questions } => {
            Some(format!("... waiting for {questions} answer(s)"))
        }
        ProgressEventKind::Finished { status } => Some(format!("... {status}")),
    }
}

async fn ask_command(
    output: &OutputFormat,
    config: &Config,
    request: TurnRequest,
    ephemeral: bool,
) -> Result<i32> {
    if !config.connections.contains_key(&request.connection_id) {
        return Err(CopilotError::NotFound(format!(
            "connection {} is not configured",
            request.connection_id
        )));
    }
    let runtime = Runtime::start(output, config, ephemeral).await?;
    let outcome = runtime.supervisor.run_turn(request).await;
    runtime.shutdown().await?;
    let response = outcome?;
    emit_output(output, "ask", response_payload(&response)?);
    Ok(0)
}

async fn resume_command(
    output: &OutputFormat,
    config: &Config,
    thread_id: ThreadId,
    answers: Vec<(String, String)>,
) -> Result<i32> {
    let answers = ClarificationAnswers::new(answers.into_iter().collect::<BTreeMap<_, _>>());
    let runtime = Runtime::start(output, config, false).await?;
    let outcome = runtime.supervisor.resume(&thread_id, &answers).await;
    runtime.shutdown().await?;
    let response = outcome?;
    emit_output(output, "resume", response_payload(&response)?);
    Ok(0)
}

fn response_payload(response: &TurnResponse) -> Result<Value> {
    let mut payload = serde_json::to_value(response)?;
    if let Some(object) = payload.as_object_mut() {
        object.insert("message".to_string(), Value::String(render_response(response)));
    }
    Ok(payload)
}

fn render_response(response: &TurnResponse) -> String {
    let mut lines = vec![response.message.clone()];
    match response.status {
        TurnStatus::NeedsClarification => {
            for question in &response.questions {
                let choices = if question.choices.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", question.choices.join(" | "))
                };
                lines.push(format!("  {}: {}{choices}", question.id, question.prompt));
            }
            lines.push(format!(
                "Answer with: copilot resume --thread {} --answer <id>=<answer>",
                response.thread_id
            ));
        }
        TurnStatus::Completed | TurnStatus::Fallback => {
            if let Some(sql) = &response.sql {
                lines.push(format!("\nSQL:\n{sql}"));
            }
            if !response.columns.is_empty() {
                lines.push(format!("\n{}", response.columns.join(" | ")));
                for row in response.rows.iter().take(TEXT_PREVIEW_ROWS) {
                    let cells: Vec<String> = response
                        .columns
                        .iter()
                        .map(|column| row.get(column).map_or_else(String::new, cell_text))
                        .collect();
                    lines.push(cells.join(" | "));
                }
                let more = if response.truncated { "+" } else { "" };
                lines.push(format!("({}{more} rows)", response.row_count));
            }
            if let Some(insight) = response.insight.as_ref().filter(|_| response.sql.is_some()) {
                if insight.summary != response.message {
                    lines.push(format!("\n{}", insight.summary));
                }
            }
            if let Some(chart) = &response.chart {
                lines.push(format!("Suggested chart: {}", chart.chart_type.as_str()));
            }
        }
    }
    lines.push(format!("\nthread: {}", response.thread_id));
    lines.join("\n")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

async fn show_command(
    output: &OutputFormat,
    config: &Config,
    thread: Option<String>,
    recent: Option<i64>,
) -> Result<i32> {
    let url = checkpoint_database_url(config);
    let store = PgCheckpointStore::new(connect_checkpoint_pool(&url).await?);

    let payload = match thread {
        Some(thread) => {
            let thread_id = ThreadId::new(thread);
            let state = load_state(&store, &thread_id)
                .await?
                .ok_or_else(|| CopilotError::NotFound(thread_id.to_string()))?;
            let message = format!(
                "thread {} on {}: {} at {} (turn {}, {} retries)",
                state.thread_id,
                state.connection_id,
                state.status,
                state.current_stage,
                state.turn,
                state.retry_count
            );
            let mut payload = json!({"message": message, "state": state});
            if let Some(response) = &state.last_response {
                payload["message"] = Value::String(format!("{message}\n\n{}", render_response(response)));
            }
            payload
        }
        None => {
            let rows = store.recent(recent.unwrap_or(DEFAULT_RECENT).max(1)).await?;
            let lines: Vec<String> = rows
                .iter()
                .map(|row| {
                    format!(
                        "{}  {}  {}  {}  {}",
                        row.saved_at.format("%Y-%m-%d %H:%M:%S"),
                        row.thread_id,
                        row.connection_id,
                        row.status,
                        row.current_stage
                    )
                })
                .collect();
            let threads: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "thread_id": row.thread_id,
                        "connection_id": row.connection_id,
                        "status": row.status,
                        "current_stage": row.current_stage,
                        "saved_at": row.saved_at,
                    })
                })
                .collect();
            let message = if lines.is_empty() {
                "No conversations yet".to_string()
            } else {
                lines.join("\n")
            };
            json!({"message": message, "threads": threads})
        }
    };
    store.pool().close().await;
    emit_output(output, "show", payload);
    Ok(0)
}

async fn doctor_command(output: &OutputFormat, config: &Config) -> Result<i32> {
    let mut checks = vec![check_checkpoint_store(config).await, check_llm(config)];

    let pools = ConnectionPools::new(config.connections.clone(), PoolSettings::default());
    let mut ids: Vec<ConnectionId> = pools.connection_ids().cloned().collect();
    ids.sort();
    checks.extend(join_all(ids.iter().map(|id| check_connection(&pools, id))).await);
    pools.close().await;
    if ids.is_empty() {
        checks.push(json!({
            "name": "connections",
            "ok": false,
            "fix": "Add connection.<id> = \"postgres://...\" to .copilot/config.toml",
        }));
    }
    if let Some(path) = config.skills_path.as_deref() {
        checks.push(match load_skills(path).await {
            Ok(skills) => json!({"name": "skills", "ok": true, "count": skills.len()}),
            Err(err) => json!({"name": "skills", "ok": false, "error": err.to_string(), "fix": "Fix the skills JSON file or remove skills_path"}),
        });
    }

    let failed = checks
        .iter()
        .filter(|check| check["ok"] != Value::Bool(true))
        .count();
    let lines: Vec<String> = checks
        .iter()
        .map(|check| {
            let mark = if check["ok"] == Value::Bool(true) { "ok  " } else { "FAIL" };
            let name = check["name"].as_str().unwrap_or_default();
            let fix = check["fix"]
                .as_str()
                .filter(|_| check["ok"] != Value::Bool(true))
                .map(|fix| format!(" ({fix})"))
                .unwrap_or_default();
            format!("{mark} {name}{fix}")
        })
        .collect();
    emit_output(
        output,
        "doctor",
        json!({"message": lines.join("\n"), "checks": checks, "failed": failed}),
    );
    Ok(i32::from(failed > 0))
}

async fn check_checkpoint_store(config: &Config) -> Value {
    let url = checkpoint_database_url(config);
    match connect_checkpoint_pool(&url).await {
        Ok(pool) => {
            let table: std::result::Result<Option<String>, sqlx::Error> =
                sqlx::query_scalar("SELECT to_regclass('conversation_checkpoints')::text")
                    .fetch_one(&pool)
                    .await;
            pool.close().await;
            match table {
                Ok(Some(_)) => json!({"name": "checkpoint_store", "ok": true, "url": redact_sensitive(&url)}),
                Ok(None) => json!({"name": "checkpoint_store", "ok": false, "url": redact_sensitive(&url), "fix": "Run 'copilot init-db'"}),
                Err(err) => json!({"name": "checkpoint_store", "ok": false, "error": redact_sensitive(&err.to_string()), "fix": "Run 'copilot init-db'"}),
            }
        }
        Err(err) => json!({
            "name": "checkpoint_store",
            "ok": false,
            "url": redact_sensitive(&url),
            "error": redact_sensitive(&err.to_string()),
            "fix": "Set DATABASE_URL or database_url in .copilot/config.toml and verify postgres is reachable",
        }),
    }
}

fn check_llm(config: &Config) -> Value {
    let settings = config.llm_settings();
    match OpenAiCompletion::new(settings.clone()) {
        Ok(_) if settings.api_key.is_some() => {
            json!({"name": "llm", "ok": true, "model": settings.model, "base_url": settings.base_url})
        }
        Ok(_) => json!({
            "name": "llm",
            "ok": false,
            "model": settings.model,
            "fix": format!(
                "Export {}",
                config.llm_api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
            ),
        }),
        Err(err) => json!({"name": "llm", "ok": false, "error": err.to_string(), "fix": "Fix llm_base_url"}),
    }
}

async fn check_connection(pools: &ConnectionPools, id: &ConnectionId) -> Value {
    let name = format!("connection.{id}");
    let ping = async {
        let pool = pools.pool(id).await?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(CopilotError::from)
    };
    match ping.await {
        Ok(_) => json!({"name": name, "ok": true}),
        Err(err) => json!({
            "name": name,
            "ok": false,
            "error": redact_sensitive(&err.to_string()),
            "fix": "Check the connection URL and that the database accepts read-only sessions",
        }),
    }
}

async fn init_db_command(
    output: &OutputFormat,
    config: &Config,
    url: Option<String>,
    schema: Option<String>,
    dry: bool,
) -> Result<i32> {
    let url = url.unwrap_or_else(|| checkpoint_database_url(config));
    let schema_path = PathBuf::from(schema.unwrap_or_else(|| DEFAULT_SCHEMA_PATH.to_string()));
    let schema_sql = tokio::fs::read_to_string(&schema_path).await.map_err(|e| {
        CopilotError::ConfigError(format!(
            "Failed to read schema {}: {e}",
            schema_path.display()
        ))
    })?;

    if dry {
        emit_output(
            output,
            "init-db",
            json!({
                "message": format!("Would apply {} to {}", schema_path.display(), redact_sensitive(&url)),
                "dry": true,
                "schema": schema_path.display().to_string(),
                "url": redact_sensitive(&url),
            }),
        );
        return Ok(0);
    }

    let pool = connect_checkpoint_pool(&url).await?;
    let applied = initialize_schema_from_sql(&pool, &schema_sql).await;
    pool.close().await;
    applied?;
    emit_output(
        output,
        "init-db",
        json!({
            "message": format!("Checkpoint schema applied to {}", redact_sensitive(&url)),
            "dry": false,
            "schema": schema_path.display().to_string(),
        }),
    );
    Ok(0)
}
