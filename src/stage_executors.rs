//! Worker implementations, one module per pipeline stage.
//!
//! Every worker reads and writes only the [`ConversationState`] it is handed
//! and reports a [`StepOutcome`]; routing is left to the supervisor.

use crate::diagnostics::redact_sensitive;
use crate::domain::StepOutcome;
use crate::orchestrator_service::events::emit_progress;
use crate::orchestrator_service::ports::{
    CompletionPort, PipelinePorts, RetrievalPort, RetrievalScope, SchemaMetadataPort,
};
use crate::orchestrator_service::PipelineSettings;
use crate::query_cache::QueryCache;
use crate::types::{
    Ambiguity, ClarificationState, ConversationState, FailureKind, FallbackReason,
    FewShotExample, Message, ProgressEventKind, Skill, Stage,
};
use crate::Result;
use serde_json::json;
use tracing::{debug, info, warn};

pub mod chart;
pub mod chat;
pub mod clarifier;
pub mod dialect;
pub mod error_recovery;
pub mod executor;
pub mod fallback;
pub mod insight;
pub mod intent;
pub mod registry;
pub mod safety;
pub mod schema_resolver;
pub mod sql_generator;
pub mod text;

use error_recovery::RecoveryDecision;
use text::literal_tokens;
use registry::WorkerRegistry;
use sql_generator::{GenerationContext, GenerationOutcome, RepairContext, SqlGenerator};

/// Everything a worker may touch besides the conversation itself.
pub struct StageEnv<'a, P: ?Sized> {
    pub ports: &'a P,
    pub settings: &'a PipelineSettings,
    pub cache: &'a QueryCache,
    pub generators: &'a WorkerRegistry<SqlGenerator>,
    pub skills: &'a [Skill],
}

/// Run the worker for `stage` against the conversation.
///
/// # Errors
/// Only unexpected failures surface as `Err`; the supervisor turns them into
/// an internal fallback.
pub async fn execute_stage<P>(
    env: &StageEnv<'_, P>,
    state: &mut ConversationState,
    stage: Stage,
) -> Result<StepOutcome>
where
    P: PipelinePorts + Sync + ?Sized,
{
    match stage {
        Stage::IntentRouting => Ok(run_intent(env, state).await),
        Stage::CacheLookup => Ok(run_cache_lookup(env, state).await),
        Stage::SchemaResolution => Ok(run_schema_resolution(env, state).await),
        Stage::Clarification => Ok(run_clarification(env, state).await),
        Stage::SqlGeneration => run_generation(env, state).await,
        Stage::SafetyCheck => Ok(run_safety(env, state)),
        Stage::SqlExecution => Ok(run_execution(env, state).await),
        Stage::ErrorRecovery => Ok(run_recovery(state)),
        Stage::InsightAnalysis => Ok(run_insight(env, state).await),
        Stage::ChartRecommendation => Ok(run_chart(env, state)),
        Stage::GeneralChat => Ok(run_chat(env, state).await),
        Stage::Completed | Stage::FailedFallback => Err(crate::CopilotError::StageError(
            format!("{stage} is terminal and has no worker"),
        )),
    }
}

fn port_failure(
    state: &mut ConversationState,
    stage: Stage,
    err: &crate::CopilotError,
    reason: FallbackReason,
) -> StepOutcome {
    let message = redact_sensitive(&err.to_string());
    warn!(thread_id = %state.thread_id, stage = %stage, error = %message, "port call failed");
    state.record_error(stage, FailureKind::Connection, message, None);
    StepOutcome::Failed(reason)
}

async fn run_intent<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let request = intent::build_request(&state.question, &state.history(env.settings.history_turns));
    let verdict = match env.ports.complete(request).await {
        Ok(completion) => intent::parse_verdict(&completion),
        Err(err) => {
            return port_failure(
                state,
                Stage::IntentRouting,
                &err,
                FallbackReason::ServiceUnavailable,
            )
        }
    };
    let confidence = verdict.map(|verdict| verdict.confidence);
    let decided = intent::decide_intent(verdict, env.settings.intent_confidence_threshold);
    debug!(thread_id = %state.thread_id, intent = decided.as_str(), ?confidence, "intent classified");
    state.intent = Some(decided);
    StepOutcome::IntentClassified(decided)
}

fn take_shortcut(state: &mut ConversationState, sql: String, source: &str) -> StepOutcome {
    info!(thread_id = %state.thread_id, source, "answering from a previously successful query");
    state.generated_sql = Some(sql);
    state.sql_rationale = Some("Reused a query that answered this question before.".to_string());
    state.sql_validated = false;
    state.cache_hit = true;
    state.fast_mode = true;
    StepOutcome::CacheHit
}

async fn run_cache_lookup<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let connection_id = state.connection_id.clone();
    let question = state.effective_question.clone();

    if let Some(hit) = env.cache.lookup_exact(&connection_id, &question).await {
        return take_shortcut(state, hit.sql, "exact_cache");
    }

    let embedding = env.ports.embed(&question).await.unwrap_or_else(|err| {
        debug!(error = %err, "embedding unavailable; semantic tier uses text similarity");
        None
    });
    if let Some(hit) = env
        .cache
        .lookup_semantic(
            &connection_id,
            &question,
            embedding.as_deref(),
            env.settings.semantic_cache_threshold,
        )
        .await
    {
        return take_shortcut(state, hit.sql, "semantic_cache");
    }

    let scope = RetrievalScope {
        connection_id,
        limit: env.settings.retrieval_limit,
    };
    let mut candidates = match env.ports.find_similar(&question, &scope).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(thread_id = %state.thread_id, error = %err, "retrieval lookup failed; continuing without examples");
            Vec::new()
        }
    };
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let literals = literal_tokens(&question);
    if let Some(best) = candidates.first().filter(|best| {
        best.score >= env.settings.retrieval_shortcut_threshold
            && literal_tokens(&best.question) == literals
    }) {
        return take_shortcut(state, best.sql.clone(), "retrieval");
    }

    state.examples = candidates
        .into_iter()
        .filter(|candidate| candidate.score >= env.settings.retrieval_example_threshold)
        .map(|candidate| FewShotExample {
            question: candidate.question,
            sql: candidate.sql,
            score: candidate.score,
        })
        .collect();
    debug!(thread_id = %state.thread_id, examples = state.examples.len(), "cache miss");
    StepOutcome::CacheMiss
}

async fn run_schema_resolution<P>(
    env: &StageEnv<'_, P>,
    state: &mut ConversationState,
) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let metadata = match env.ports.get_schema(&state.connection_id, None).await {
        Ok(metadata) => metadata,
        Err(err) => {
            return port_failure(
                state,
                Stage::SchemaResolution,
                &err,
                FallbackReason::DataSourceUnavailable,
            )
        }
    };

    let resolution = schema_resolver::resolve_schema(
        &state.effective_question,
        &metadata,
        env.skills,
        &state.settled_ambiguities,
    );

    let clarifications = state
        .skill_context
        .take()
        .map(|context| context.clarifications)
        .unwrap_or_default();
    let mut context = resolution.skill_context.unwrap_or_default();
    context.clarifications = clarifications;
    state.skill_context = (!context.is_empty()).then_some(context);

    let ambiguous = resolution.schema.is_ambiguous();
    let tables: Vec<String> = resolution
        .schema
        .table_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    state.schema_info = Some(resolution.schema);
    emit_progress(
        env.ports,
        state,
        ProgressEventKind::PartialResult {
            stage: Stage::SchemaResolution,
            payload: json!({ "tables": tables, "ambiguous": ambiguous }),
        },
    );
    StepOutcome::SchemaResolved { ambiguous }
}

async fn subject_choices<P>(env: &StageEnv<'_, P>, state: &ConversationState) -> Vec<String>
where
    P: PipelinePorts + Sync + ?Sized,
{
    match env.ports.get_schema(&state.connection_id, None).await {
        Ok(metadata) => metadata
            .tables
            .iter()
            .map(|table| text::humanize(&table.name))
            .collect(),
        Err(err) => {
            debug!(error = %err, "no subject choices available");
            Vec::new()
        }
    }
}

async fn run_clarification<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    if let Some(resume_stage) = state
        .clarification_state
        .as_ref()
        .filter(|pending| pending.is_answered())
        .map(|pending| pending.resume_stage)
    {
        state.clarification_state = None;
        if let Some(schema) = state.schema_info.as_mut() {
            schema.ambiguities.clear();
        }
        return StepOutcome::ClarificationResolved { resume_stage };
    }

    let ambiguities: Vec<Ambiguity> = state
        .schema_info
        .as_ref()
        .map(|schema| schema.ambiguities.clone())
        .unwrap_or_default();
    let resume_stage = if ambiguities
        .iter()
        .any(|ambiguity| matches!(ambiguity, Ambiguity::Interpretation { .. }))
    {
        Stage::SqlGeneration
    } else {
        Stage::SchemaResolution
    };
    let choices = if ambiguities.contains(&Ambiguity::NoMatchingTable) {
        subject_choices(env, state).await
    } else {
        Vec::new()
    };

    let questions = clarifier::build_questions(&ambiguities, &choices);
    if questions.is_empty() {
        return StepOutcome::Failed(FallbackReason::NotUnderstood);
    }
    state.clarification_state = Some(ClarificationState {
        questions,
        resume_stage,
        asked_turn: state.turn,
        answers: std::collections::BTreeMap::new(),
    });
    StepOutcome::ClarificationRequested
}

fn repair_context(state: &ConversationState) -> Option<RepairContext> {
    let hint = state.recovery_hint.clone()?;
    let last = state.last_error();
    Some(RepairContext {
        previous_sql: last.and_then(|record| record.sql.clone()),
        error: last.map(|record| record.message.clone()).unwrap_or_default(),
        hint: Some(hint),
        failed_sql: state
            .current_turn_errors()
            .filter(|record| record.kind != FailureKind::Timeout)
            .filter_map(|record| record.sql.clone())
            .collect(),
    })
}

async fn run_generation<P>(
    env: &StageEnv<'_, P>,
    state: &mut ConversationState,
) -> Result<StepOutcome>
where
    P: PipelinePorts + Sync + ?Sized,
{
    let (generator, resolution) = env.generators.resolve(state.profile_id.as_deref());
    if resolution.is_fallback() {
        warn!(
            thread_id = %state.thread_id,
            profile_id = ?state.profile_id,
            ?resolution,
            "generator profile unavailable; using default"
        );
    }

    let Some(schema) = state.schema_info.as_ref() else {
        return Err(crate::CopilotError::StageError(
            "sql generation reached without a resolved schema".to_string(),
        ));
    };
    let context = GenerationContext {
        question: &state.effective_question,
        schema,
        skill: state.skill_context.as_ref(),
        examples: &state.examples,
        history: state.history(env.settings.history_turns),
        repair: repair_context(state),
    };
    let generated = generator.generate(env.ports, &context).await;

    let outcome = match generated {
        Ok(outcome) => outcome,
        Err(err) => {
            return Ok(port_failure(
                state,
                Stage::SqlGeneration,
                &err,
                FallbackReason::ServiceUnavailable,
            ))
        }
    };

    Ok(match outcome {
        GenerationOutcome::Sql { sql, rationale } => {
            debug!(thread_id = %state.thread_id, retry_count = state.retry_count, "sql generated");
            state.generated_sql = Some(sql);
            state.sql_rationale = Some(rationale);
            state.sql_validated = false;
            state.touch();
            StepOutcome::SqlGenerated
        }
        GenerationOutcome::NeedsClarification { description } => {
            if let Some(schema) = state.schema_info.as_mut() {
                schema.ambiguities.push(Ambiguity::Interpretation { description });
            }
            StepOutcome::GenerationNeedsClarification
        }
        GenerationOutcome::Failed { message } => {
            state.record_error(Stage::SqlGeneration, FailureKind::Generation, message, None);
            StepOutcome::GenerationFailed
        }
    })
}

fn run_safety<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let Some(sql) = state.generated_sql.clone() else {
        return StepOutcome::Failed(FallbackReason::Internal);
    };
    let verdict = safety::check_sql(&sql);
    for warning in &verdict.warnings {
        emit_progress(
            env.ports,
            state,
            ProgressEventKind::StepMessage {
                stage: Stage::SafetyCheck,
                message: warning.clone(),
            },
        );
    }

    if verdict.valid {
        state.generated_sql = Some(verdict.sanitized_sql);
        state.sql_validated = true;
        StepOutcome::SafetyPassed
    } else {
        let message = verdict
            .error
            .unwrap_or_else(|| "statement rejected by the safety check".to_string());
        warn!(thread_id = %state.thread_id, reason = %message, "unsafe sql rejected");
        state.sql_validated = false;
        state.record_error(Stage::SafetyCheck, FailureKind::UnsafeSql, message, Some(sql));
        StepOutcome::SafetyRejected
    }
}

async fn run_execution<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let Some(sql) = state.generated_sql.clone() else {
        return StepOutcome::Failed(FallbackReason::Internal);
    };
    state.execution_result = None;
    let attempt = state.retry_count + 1;
    let result = executor::execute_once(env.ports, &state.connection_id, &sql, attempt).await;

    if result.success {
        let embedding = env
            .ports
            .embed(&state.effective_question)
            .await
            .unwrap_or_default();
        env.cache
            .record_success(&state.connection_id, &state.effective_question, &sql, embedding)
            .await;
        if let Err(err) = env
            .ports
            .remember(&state.connection_id, &state.effective_question, &sql)
            .await
        {
            warn!(thread_id = %state.thread_id, error = %err, "retrieval index write-back failed");
        }
        let payload = json!({
            "row_count": result.row_count,
            "columns": result.columns,
            "truncated": result.truncated,
        });
        state.execution_result = Some(result);
        emit_progress(
            env.ports,
            state,
            ProgressEventKind::PartialResult {
                stage: Stage::SqlExecution,
                payload,
            },
        );
        return StepOutcome::ExecutionSucceeded;
    }

    let (kind, message) = result.error.as_ref().map_or_else(
        || (FailureKind::Unknown, "execution failed".to_string()),
        |error| (error.kind, error.message.clone()),
    );
    if state.cache_hit {
        env.cache.record_failure(&state.connection_id, &sql).await;
        if let Err(err) = env.ports.mark_failed(&state.connection_id, &sql).await {
            warn!(thread_id = %state.thread_id, error = %err, "retrieval failure mark not stored");
        }
    }
    warn!(thread_id = %state.thread_id, attempt, kind = %kind, "sql execution failed");
    state.record_error(Stage::SqlExecution, kind, message, Some(sql));
    state.execution_result = Some(result);
    StepOutcome::ExecutionFailed
}

fn run_recovery(state: &mut ConversationState) -> StepOutcome {
    match error_recovery::decide_recovery(state) {
        RecoveryDecision::Regenerate { hint } => {
            error_recovery::prepare_regeneration(state, hint);
            info!(
                thread_id = %state.thread_id,
                retry_count = state.retry_count,
                max_retries = state.max_retries,
                "regenerating sql"
            );
            StepOutcome::RecoveryRegenerate
        }
        RecoveryDecision::Escalate(reason) => {
            info!(thread_id = %state.thread_id, reason = reason.code(), "recovery escalated");
            StepOutcome::RecoveryEscalate(reason)
        }
    }
}

async fn run_insight<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let Some(result) = state.execution_result.as_ref() else {
        return StepOutcome::Failed(FallbackReason::Internal);
    };
    let insight = insight::analyze(
        env.ports,
        &state.effective_question,
        result,
        env.settings.insight_sample_rows,
    )
    .await;
    state.insight = Some(insight);
    StepOutcome::InsightReady
}

fn run_chart<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let Some(result) = state.execution_result.as_ref() else {
        return StepOutcome::Failed(FallbackReason::Internal);
    };
    let chart = chart::recommend_chart(result, state.schema_info.as_ref());
    let payload = json!({ "chart_type": chart.chart_type.as_str(), "confidence": chart.confidence });
    state.chart = Some(chart);
    emit_progress(
        env.ports,
        state,
        ProgressEventKind::PartialResult {
            stage: Stage::ChartRecommendation,
            payload,
        },
    );
    StepOutcome::ChartReady
}

async fn run_chat<P>(env: &StageEnv<'_, P>, state: &mut ConversationState) -> StepOutcome
where
    P: PipelinePorts + Sync + ?Sized,
{
    let reply = chat::respond(
        env.ports,
        &state.question,
        &state.history(env.settings.history_turns),
    )
    .await;
    match reply {
        Ok(reply) => {
            state.reply = Some(reply);
            StepOutcome::ChatAnswered
        }
        Err(err) => port_failure(state, Stage::GeneralChat, &err, FallbackReason::ServiceUnavailable),
    }
}

/// Assistant transcript entry for a finished data answer.
#[must_use]
pub fn answer_message(state: &ConversationState, content: &str) -> Message {
    let mut message = Message::assistant(content, state.turn);
    if let Some(sql) = state.generated_sql.as_ref() {
        message.payload = Some(json!({ "sql": sql }));
    }
    message
}
