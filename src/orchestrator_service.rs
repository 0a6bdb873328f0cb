#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::diagnostics::redact_sensitive;
use crate::domain::{route, RouteContext, StageTransition, StepOutcome};
use crate::query_cache::{QueryCache, DEFAULT_CAPACITY};
use crate::retry::RetryPolicy;
use crate::stage_executors::fallback::fallback_message;
use crate::stage_executors::registry::WorkerRegistry;
use crate::stage_executors::sql_generator::{GeneratorSettings, SqlGenerator};
use crate::stage_executors::{answer_message, clarifier, execute_stage, StageEnv};
use crate::types::{
    ClarificationAnswers, ConversationState, FailureKind, FallbackReason, Message,
    ProgressEventKind, ResumeRecord, RunStatus, Skill, Stage, ThreadId, TurnRequest,
    TurnResponse, TurnStatus,
};
use crate::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub mod checkpoint;
pub mod events;
pub mod ports;
pub mod resilient;
pub mod service_ports;
pub(crate) mod timing;

#[cfg(test)]
mod tests;

use checkpoint::{load_state, save_state};
use events::{emit_progress, stamp_progress};
use ports::EventSink;
use ports::PipelinePorts;

/// Tunables for one supervisor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_retries: u32,
    pub intent_confidence_threshold: f64,
    pub semantic_cache_threshold: f64,
    pub retrieval_shortcut_threshold: f64,
    pub retrieval_example_threshold: f64,
    pub retrieval_limit: usize,
    pub max_result_rows: usize,
    pub insight_sample_rows: usize,
    pub max_clarification_rounds: u32,
    pub history_turns: usize,
    pub cache_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            intent_confidence_threshold: 0.6,
            semantic_cache_threshold: 0.92,
            retrieval_shortcut_threshold: 0.9,
            retrieval_example_threshold: 0.55,
            retrieval_limit: 5,
            max_result_rows: 1_000,
            insight_sample_rows: 20,
            max_clarification_rounds: 1,
            history_turns: 3,
            cache_capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    #[must_use]
    pub fn default_generator(&self) -> GeneratorSettings {
        GeneratorSettings {
            row_limit: self.max_result_rows,
            ..GeneratorSettings::default()
        }
    }
}

/// Drives conversations through the stage graph.
///
/// One call to [`Supervisor::run_turn`] or [`Supervisor::resume`] owns its
/// conversation state for the whole pass; independent threads may run
/// concurrently against the same supervisor.
pub struct Supervisor<P> {
    ports: P,
    settings: PipelineSettings,
    cache: QueryCache,
    generators: WorkerRegistry<SqlGenerator>,
    skills: Vec<Skill>,
}

impl<P> Supervisor<P>
where
    P: PipelinePorts + Sync,
{
    /// Upper bound on worker steps in one pass. The retry and clarification
    /// budgets keep real runs far below it.
    const MAX_STEPS: usize = 64;

    #[must_use]
    pub fn new(ports: P, settings: PipelineSettings) -> Self {
        let default_generator = settings.default_generator();
        Self {
            ports,
            cache: QueryCache::new(settings.cache_capacity),
            generators: WorkerRegistry::new(move || SqlGenerator::new(default_generator.clone())),
            settings,
            skills: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_skills(mut self, skills: Vec<Skill>) -> Self {
        self.skills = skills;
        self
    }

    /// Registers a generator profile selectable through `TurnRequest::profile_id`.
    #[must_use]
    pub fn with_generator_profile(mut self, settings: GeneratorSettings) -> Self {
        let id = settings.profile.clone();
        self.generators
            .register(id, move || SqlGenerator::new(settings.clone()));
        self
    }

    pub fn generators_mut(&mut self) -> &mut WorkerRegistry<SqlGenerator> {
        &mut self.generators
    }

    #[must_use]
    pub const fn ports(&self) -> &P {
        &self.ports
    }

    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Latest persisted state of a thread.
    ///
    /// # Errors
    /// Returns checkpoint store failures.
    pub async fn conversation(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>> {
        load_state(&self.ports, thread_id).await
    }

    /// Answer one user question, creating the thread when it does not exist.
    ///
    /// A new question on a thread that is waiting for clarification abandons
    /// the pending questions.
    ///
    /// # Errors
    /// Returns an error for an empty question, a thread bound to another
    /// connection, or a checkpoint store that cannot be read. Every failure
    /// after that point becomes a fallback response.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        if request.question.trim().is_empty() {
            return Err(CopilotError::ConfigError(
                "question must not be empty".to_string(),
            ));
        }
        let thread_id = request.thread_id.clone().unwrap_or_else(ThreadId::generate);

        let mut state = match load_state(&self.ports, &thread_id).await? {
            Some(state) if state.connection_id != request.connection_id => {
                return Err(CopilotError::Conflict(format!(
                    "Thread {thread_id} is bound to connection {}",
                    state.connection_id
                )));
            }
            Some(state) => {
                if state.status == RunStatus::Suspended {
                    info!(thread_id = %thread_id, turn = state.turn, "abandoning pending clarification");
                }
                state
            }
            None => ConversationState::new(
                thread_id,
                request.connection_id.clone(),
                self.settings.max_retries,
            ),
        };

        state.begin_turn(request.question.trim(), request.fast_mode, request.profile_id);
        info!(
            thread_id = %state.thread_id,
            connection_id = %state.connection_id,
            turn = state.turn,
            fast_mode = state.fast_mode,
            "turn started"
        );
        Ok(self.drive(&mut state).await)
    }

    /// Continue a suspended thread with the caller's clarification answers.
    ///
    /// Replaying answers that already resumed the current turn returns the
    /// stored response without touching the conversation.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown thread and `ResumeError` when the
    /// thread is not suspended or the answers do not match the questions.
    pub async fn resume(
        &self,
        thread_id: &ThreadId,
        answers: &ClarificationAnswers,
    ) -> Result<TurnResponse> {
        let mut state = load_state(&self.ports, thread_id)
            .await?
            .ok_or_else(|| CopilotError::NotFound(thread_id.to_string()))?;

        let fingerprint = answers.fingerprint();
        let replay = state.last_resume.as_ref().is_some_and(|record| {
            record.turn == state.turn && record.fingerprint == fingerprint
        });
        if replay && state.status != RunStatus::Suspended {
            if let Some(response) = state.last_response.clone() {
                info!(thread_id = %thread_id, turn = state.turn, "resume replayed; returning stored response");
                return Ok(response);
            }
        }

        if state.status != RunStatus::Suspended {
            return Err(CopilotError::ResumeError(format!(
                "Thread {thread_id} is not waiting for clarification"
            )));
        }
        let pending = state.clarification_state.as_ref().ok_or_else(|| {
            CopilotError::ResumeError(format!("Thread {thread_id} has no pending questions"))
        })?;
        clarifier::validate_answers(pending, answers)?;

        clarifier::apply_answers(&mut state, answers);
        state.last_resume = Some(ResumeRecord {
            turn: state.turn,
            fingerprint,
        });
        state.status = RunStatus::Running;
        state.current_stage = Stage::Clarification;
        info!(thread_id = %thread_id, turn = state.turn, "resuming after clarification");
        Ok(self.drive(&mut state).await)
    }

    fn env(&self) -> StageEnv<'_, P> {
        StageEnv {
            ports: &self.ports,
            settings: &self.settings,
            cache: &self.cache,
            generators: &self.generators,
            skills: &self.skills,
        }
    }

    const fn route_context(&self, state: &ConversationState) -> RouteContext {
        RouteContext {
            fast_mode: state.fast_mode,
            has_schema: state.schema_info.is_some(),
            clarification_rounds: state.clarification_rounds,
            max_clarification_rounds: self.settings.max_clarification_rounds,
        }
    }

    async fn checkpoint(&self, state: &ConversationState) {
        if let Err(err) = save_state(&self.ports, state).await {
            warn!(
                thread_id = %state.thread_id,
                stage = %state.current_stage,
                error = %redact_sensitive(&err.to_string()),
                "checkpoint save failed"
            );
        }
    }

    async fn drive(&self, state: &mut ConversationState) -> TurnResponse {
        let env = self.env();
        for _ in 0..Self::MAX_STEPS {
            let stage = state.current_stage;
            emit_progress(&self.ports, state, ProgressEventKind::StageEntered { stage });

            let outcome = match execute_stage(&env, state, stage).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let message = redact_sensitive(&err.to_string());
                    error!(thread_id = %state.thread_id, stage = %stage, error = %message, "stage failed unexpectedly");
                    state.record_error(stage, FailureKind::Internal, message, None);
                    StepOutcome::Failed(FallbackReason::Internal)
                }
            };

            let decision = route(stage, outcome, &self.route_context(state));
            debug!(
                thread_id = %state.thread_id,
                stage = %stage,
                outcome = outcome.label(),
                reason = decision.reason_code(),
                retry_count = state.retry_count,
                "stage routed"
            );

            match decision.transition() {
                StageTransition::Advance(next) | StageTransition::LoopBack(next) => {
                    if let Some(missing) = state.missing_prerequisite(next) {
                        error!(thread_id = %state.thread_id, stage = %next, missing, "stage entered without prerequisite");
                        state.record_error(
                            next,
                            FailureKind::Internal,
                            format!("missing {missing}"),
                            None,
                        );
                        return self.finish_fallback(state, FallbackReason::Internal).await;
                    }
                    state.current_stage = next;
                    state.touch();
                    self.checkpoint(state).await;
                }
                StageTransition::Suspend => return self.suspend(state).await,
                StageTransition::Complete => return self.complete(state).await,
                StageTransition::Fallback(reason) => {
                    return self.finish_fallback(state, reason).await
                }
            }
        }
        error!(thread_id = %state.thread_id, "step budget exhausted");
        self.finish_fallback(state, FallbackReason::Internal).await
    }

    fn base_response(state: &ConversationState, status: TurnStatus, message: &str) -> TurnResponse {
        let mut response = TurnResponse::new(state.thread_id.clone(), state.turn, status, message);
        response.cache_hit = state.cache_hit;
        response.fast_mode = state.fast_mode;
        response.retry_count = state.retry_count;
        response
    }

    async fn suspend(&self, state: &mut ConversationState) -> TurnResponse {
        let questions = state
            .clarification_state
            .as_ref()
            .map(|pending| pending.questions.clone())
            .unwrap_or_default();
        state.status = RunStatus::Suspended;
        state.clarification_rounds += 1;

        let prompt = questions
            .iter()
            .map(|question| question.prompt.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let turn = state.turn;
        state.push_message(Message::assistant(prompt.clone(), turn));

        let mut response = Self::base_response(state, TurnStatus::NeedsClarification, &prompt);
        response.questions = questions;
        state.last_response = Some(response.clone());
        let count = response.questions.len();
        let suspended = stamp_progress(state, ProgressEventKind::Suspended { questions: count });

        if let Err(err) = save_state(&self.ports, state).await {
            error!(thread_id = %state.thread_id, error = %redact_sensitive(&err.to_string()), "could not persist suspension");
            state.record_error(
                Stage::Clarification,
                FailureKind::Internal,
                "suspension checkpoint failed",
                None,
            );
            return self
                .finish_fallback(state, FallbackReason::ServiceUnavailable)
                .await;
        }
        self.ports.emit(suspended);
        info!(thread_id = %state.thread_id, questions = count, "waiting for clarification");
        response
    }

    async fn complete(&self, state: &mut ConversationState) -> TurnResponse {
        state.status = RunStatus::Completed;
        state.current_stage = Stage::Completed;

        let response = if let Some(reply) = state.reply.clone() {
            let turn = state.turn;
            state.push_message(Message::assistant(reply.clone(), turn));
            Self::base_response(state, TurnStatus::Completed, &reply)
        } else {
            let message = state.insight.as_ref().map_or_else(
                || {
                    let rows = state
                        .execution_result
                        .as_ref()
                        .map_or(0, |result| result.row_count);
                    format!("Found {rows} matching rows.")
                },
                |insight| insight.summary.clone(),
            );
            let mut response = Self::base_response(state, TurnStatus::Completed, &message);
            response.sql.clone_from(&state.generated_sql);
            response.rationale.clone_from(&state.sql_rationale);
            if let Some(result) = state.execution_result.as_ref() {
                response.columns.clone_from(&result.columns);
                response.rows.clone_from(&result.rows);
                response.row_count = result.row_count;
                response.truncated = result.truncated;
            }
            response.insight.clone_from(&state.insight);
            response.chart.clone_from(&state.chart);
            let entry = answer_message(state, &message);
            state.push_message(entry);
            response
        };

        state.last_response = Some(response.clone());
        let finished = stamp_progress(
            state,
            ProgressEventKind::Finished {
                status: RunStatus::Completed,
            },
        );
        self.checkpoint(state).await;
        self.ports.emit(finished);
        info!(
            thread_id = %state.thread_id,
            turn = state.turn,
            retry_count = state.retry_count,
            cache_hit = state.cache_hit,
            "turn completed"
        );
        response
    }

    async fn finish_fallback(
        &self,
        state: &mut ConversationState,
        reason: FallbackReason,
    ) -> TurnResponse {
        let message = fallback_message(reason);
        state.status = RunStatus::Failed;
        state.current_stage = Stage::FailedFallback;
        state.fallback = Some(reason);
        state.clarification_state = None;
        let turn = state.turn;
        state.push_message(Message::assistant(message, turn));

        let mut response = Self::base_response(state, TurnStatus::Fallback, message);
        response.fallback_reason = Some(reason);
        state.last_response = Some(response.clone());
        let finished = stamp_progress(
            state,
            ProgressEventKind::Finished {
                status: RunStatus::Failed,
            },
        );
        self.checkpoint(state).await;
        self.ports.emit(finished);
        warn!(
            thread_id = %state.thread_id,
            turn = state.turn,
            reason = reason.code(),
            retry_count = state.retry_count,
            "turn ended on fallback"
        );
        response
    }
}
