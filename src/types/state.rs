use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    AmbiguityKind, ChartRecommendation, ClarificationState, ConnectionId, ExecutionResult,
    FailureKind, FallbackReason, Insight, Intent, Message, ResumeRecord, Role, RunStatus,
    SchemaInfo, SkillContext, Stage, ThreadId, TurnResponse,
};

/// Append-only entry describing one failure inside a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub turn: u32,
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub at: DateTime<Utc>,
}

/// Previously successful question/SQL pair offered to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub sql: String,
    pub score: f64,
}

/// The single shared record every stage reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    pub connection_id: ConnectionId,
    pub status: RunStatus,
    pub current_stage: Stage,
    pub turn: u32,
    pub question: String,
    pub effective_question: String,
    pub messages: Vec<Message>,
    pub intent: Option<Intent>,
    pub schema_info: Option<SchemaInfo>,
    pub generated_sql: Option<String>,
    pub sql_rationale: Option<String>,
    pub sql_validated: bool,
    pub execution_result: Option<ExecutionResult>,
    pub error_history: Vec<ErrorRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub recovery_hint: Option<String>,
    pub clarification_state: Option<ClarificationState>,
    pub clarification_rounds: u32,
    #[serde(default)]
    pub settled_ambiguities: Vec<AmbiguityKind>,
    pub skill_context: Option<SkillContext>,
    pub fast_mode: bool,
    /// Fast mode as the caller asked for it; a cache shortcut may raise
    /// `fast_mode` for one attempt only.
    #[serde(default)]
    pub requested_fast_mode: bool,
    pub cache_hit: bool,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
    pub insight: Option<Insight>,
    pub chart: Option<ChartRecommendation>,
    #[serde(default)]
    pub reply: Option<String>,
    pub fallback: Option<FallbackReason>,
    pub profile_id: Option<String>,
    pub last_response: Option<TurnResponse>,
    pub last_resume: Option<ResumeRecord>,
    pub event_sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    #[must_use]
    pub fn new(thread_id: ThreadId, connection_id: ConnectionId, max_retries: u32) -> Self {
        Self {
            thread_id,
            connection_id,
            status: RunStatus::Running,
            current_stage: Stage::IntentRouting,
            turn: 0,
            question: String::new(),
            effective_question: String::new(),
            messages: Vec::new(),
            intent: None,
            schema_info: None,
            generated_sql: None,
            sql_rationale: None,
            sql_validated: false,
            execution_result: None,
            error_history: Vec::new(),
            retry_count: 0,
            max_retries,
            recovery_hint: None,
            clarification_state: None,
            clarification_rounds: 0,
            settled_ambiguities: Vec::new(),
            skill_context: None,
            fast_mode: false,
            requested_fast_mode: false,
            cache_hit: false,
            examples: Vec::new(),
            insight: None,
            chart: None,
            reply: None,
            fallback: None,
            profile_id: None,
            last_response: None,
            last_resume: None,
            event_sequence: 0,
            updated_at: Utc::now(),
        }
    }

    /// Starts a new user turn. Turn-scoped fields are reset; the transcript
    /// and the error history are kept.
    pub fn begin_turn(
        &mut self,
        question: impl Into<String>,
        fast_mode: bool,
        profile_id: Option<String>,
    ) {
        let question = question.into();
        self.turn += 1;
        self.status = RunStatus::Running;
        self.current_stage = Stage::IntentRouting;
        self.messages.push(Message::user(question.clone(), self.turn));
        self.effective_question.clone_from(&question);
        self.question = question;
        self.intent = None;
        self.schema_info = None;
        self.clear_attempt();
        self.sql_rationale = None;
        self.retry_count = 0;
        self.recovery_hint = None;
        self.clarification_state = None;
        self.clarification_rounds = 0;
        self.settled_ambiguities.clear();
        self.skill_context = None;
        self.fast_mode = fast_mode;
        self.requested_fast_mode = fast_mode;
        self.cache_hit = false;
        self.examples.clear();
        self.insight = None;
        self.chart = None;
        self.reply = None;
        self.fallback = None;
        self.profile_id = profile_id;
        self.last_resume = None;
        self.touch();
    }

    /// Drops SQL and results of the previous attempt so nothing stale leaks
    /// into the next one.
    pub fn clear_attempt(&mut self) {
        self.generated_sql = None;
        self.sql_validated = false;
        self.execution_result = None;
    }

    pub fn record_error(
        &mut self,
        stage: Stage,
        kind: FailureKind,
        message: impl Into<String>,
        sql: Option<String>,
    ) {
        self.error_history.push(ErrorRecord {
            turn: self.turn,
            stage,
            kind,
            message: message.into(),
            sql,
            at: Utc::now(),
        });
        self.touch();
    }

    pub fn current_turn_errors(&self) -> impl DoubleEndedIterator<Item = &ErrorRecord> {
        let turn = self.turn;
        self.error_history
            .iter()
            .filter(move |record| record.turn == turn)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.current_turn_errors().next_back()
    }

    /// Names the field a stage needs but the state does not yet have.
    #[must_use]
    pub fn missing_prerequisite(&self, stage: Stage) -> Option<&'static str> {
        let executed_ok = self
            .execution_result
            .as_ref()
            .is_some_and(|result| result.success);
        match stage {
            Stage::SqlGeneration if self.schema_info.is_none() => Some("schema_info"),
            Stage::SafetyCheck if self.generated_sql.is_none() => Some("generated_sql"),
            Stage::SqlExecution if self.generated_sql.is_none() || !self.sql_validated => {
                Some("validated_sql")
            }
            Stage::InsightAnalysis | Stage::ChartRecommendation if !executed_ok => {
                Some("execution_result")
            }
            Stage::ErrorRecovery if self.last_error().is_none() => Some("error_history"),
            _ => None,
        }
    }

    pub fn next_event_sequence(&mut self) -> u64 {
        self.event_sequence += 1;
        self.event_sequence
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// User/assistant exchanges from earlier turns, oldest first.
    #[must_use]
    pub fn history(&self, turns: usize) -> Vec<&Message> {
        let first_turn = self.turn.saturating_sub(u32::try_from(turns).unwrap_or(u32::MAX));
        self.messages
            .iter()
            .filter(|message| message.turn < self.turn && message.turn >= first_turn.max(1))
            .filter(|message| matches!(message.role, Role::User | Role::Assistant))
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
