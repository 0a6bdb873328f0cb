#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::{StageTransition, StepOutcome};
use crate::types::{FallbackReason, Intent, Stage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    IntentDataQuery,
    IntentGeneralChat,
    CacheHitShortcut,
    CacheMissResolveSchema,
    SchemaResolved,
    SchemaAmbiguous,
    ClarificationLimitReached,
    AwaitingClarification,
    ClarificationResolved,
    SqlGenerated,
    GeneratorNeedsClarification,
    GenerationFailed,
    SafetyPassed,
    SafetyRejected,
    ExecutionSucceeded,
    FastModeComplete,
    ExecutionFailed,
    RegenerateSql,
    RegenerateWithSchema,
    RecoveryEscalated,
    InsightReady,
    ChartReady,
    ChatAnswered,
    StageFailed,
    UnexpectedOutcome,
}

impl TransitionReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::IntentDataQuery => "intent_data_query",
            Self::IntentGeneralChat => "intent_general_chat",
            Self::CacheHitShortcut => "cache_hit_shortcut",
            Self::CacheMissResolveSchema => "cache_miss_resolve_schema",
            Self::SchemaResolved => "schema_resolved",
            Self::SchemaAmbiguous => "schema_ambiguous",
            Self::ClarificationLimitReached => "clarification_limit_reached",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::ClarificationResolved => "clarification_resolved",
            Self::SqlGenerated => "sql_generated",
            Self::GeneratorNeedsClarification => "generator_needs_clarification",
            Self::GenerationFailed => "generation_failed",
            Self::SafetyPassed => "safety_passed",
            Self::SafetyRejected => "safety_rejected",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::FastModeComplete => "fast_mode_complete",
            Self::ExecutionFailed => "execution_failed",
            Self::RegenerateSql => "regenerate_sql",
            Self::RegenerateWithSchema => "regenerate_with_schema",
            Self::RecoveryEscalated => "recovery_escalated",
            Self::InsightReady => "insight_ready",
            Self::ChartReady => "chart_ready",
            Self::ChatAnswered => "chat_answered",
            Self::StageFailed => "stage_failed",
            Self::UnexpectedOutcome => "unexpected_outcome",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDecision {
    transition: StageTransition,
    reason: TransitionReason,
}

impl TransitionDecision {
    #[must_use]
    pub const fn new(transition: StageTransition, reason: TransitionReason) -> Self {
        Self { transition, reason }
    }

    #[must_use]
    pub const fn transition(&self) -> StageTransition {
        self.transition
    }

    #[must_use]
    pub const fn reason(&self) -> TransitionReason {
        self.reason
    }

    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        self.reason.code()
    }
}

/// The slice of conversation state routing is allowed to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteContext {
    pub fast_mode: bool,
    pub has_schema: bool,
    pub clarification_rounds: u32,
    pub max_clarification_rounds: u32,
}

impl RouteContext {
    const fn may_clarify(&self) -> bool {
        self.clarification_rounds < self.max_clarification_rounds
    }
}

const fn advance(stage: Stage, reason: TransitionReason) -> TransitionDecision {
    TransitionDecision::new(StageTransition::Advance(stage), reason)
}

const fn loop_back(stage: Stage, reason: TransitionReason) -> TransitionDecision {
    TransitionDecision::new(StageTransition::LoopBack(stage), reason)
}

const fn fallback(reason: FallbackReason, why: TransitionReason) -> TransitionDecision {
    TransitionDecision::new(StageTransition::Fallback(reason), why)
}

const fn clarify_or_give_up(ctx: &RouteContext, reason: TransitionReason) -> TransitionDecision {
    if ctx.may_clarify() {
        advance(Stage::Clarification, reason)
    } else {
        fallback(
            FallbackReason::NotUnderstood,
            TransitionReason::ClarificationLimitReached,
        )
    }
}

/// Pure routing table: `(stage, outcome, context)` to the next move.
#[must_use]
pub const fn route(stage: Stage, outcome: StepOutcome, ctx: &RouteContext) -> TransitionDecision {
    match (stage, outcome) {
        (_, StepOutcome::Failed(reason)) => fallback(reason, TransitionReason::StageFailed),

        (Stage::IntentRouting, StepOutcome::IntentClassified(Intent::DataQuery)) => {
            advance(Stage::CacheLookup, TransitionReason::IntentDataQuery)
        }
        (Stage::IntentRouting, StepOutcome::IntentClassified(Intent::GeneralChat)) => {
            advance(Stage::GeneralChat, TransitionReason::IntentGeneralChat)
        }

        (Stage::CacheLookup, StepOutcome::CacheHit) => {
            advance(Stage::SafetyCheck, TransitionReason::CacheHitShortcut)
        }
        (Stage::CacheLookup, StepOutcome::CacheMiss) => advance(
            Stage::SchemaResolution,
            TransitionReason::CacheMissResolveSchema,
        ),

        (Stage::SchemaResolution, StepOutcome::SchemaResolved { ambiguous: false }) => {
            advance(Stage::SqlGeneration, TransitionReason::SchemaResolved)
        }
        (Stage::SchemaResolution, StepOutcome::SchemaResolved { ambiguous: true }) => {
            clarify_or_give_up(ctx, TransitionReason::SchemaAmbiguous)
        }

        (Stage::Clarification, StepOutcome::ClarificationRequested) => TransitionDecision::new(
            StageTransition::Suspend,
            TransitionReason::AwaitingClarification,
        ),
        (
            Stage::Clarification,
            StepOutcome::ClarificationResolved {
                resume_stage: Stage::SqlGeneration,
            },
        ) if ctx.has_schema => loop_back(
            Stage::SqlGeneration,
            TransitionReason::ClarificationResolved,
        ),
        (Stage::Clarification, StepOutcome::ClarificationResolved { .. }) => loop_back(
            Stage::SchemaResolution,
            TransitionReason::ClarificationResolved,
        ),

        (Stage::SqlGeneration, StepOutcome::SqlGenerated) => {
            advance(Stage::SafetyCheck, TransitionReason::SqlGenerated)
        }
        (Stage::SqlGeneration, StepOutcome::GenerationNeedsClarification) => {
            clarify_or_give_up(ctx, TransitionReason::GeneratorNeedsClarification)
        }
        (Stage::SqlGeneration, StepOutcome::GenerationFailed) => {
            advance(Stage::ErrorRecovery, TransitionReason::GenerationFailed)
        }

        (Stage::SafetyCheck, StepOutcome::SafetyPassed) => {
            advance(Stage::SqlExecution, TransitionReason::SafetyPassed)
        }
        (Stage::SafetyCheck, StepOutcome::SafetyRejected) => {
            advance(Stage::ErrorRecovery, TransitionReason::SafetyRejected)
        }

        (Stage::SqlExecution, StepOutcome::ExecutionSucceeded) if ctx.fast_mode => {
            TransitionDecision::new(
                StageTransition::Complete,
                TransitionReason::FastModeComplete,
            )
        }
        (Stage::SqlExecution, StepOutcome::ExecutionSucceeded) => {
            advance(Stage::InsightAnalysis, TransitionReason::ExecutionSucceeded)
        }
        (Stage::SqlExecution, StepOutcome::ExecutionFailed) => {
            advance(Stage::ErrorRecovery, TransitionReason::ExecutionFailed)
        }

        (Stage::ErrorRecovery, StepOutcome::RecoveryRegenerate) if ctx.has_schema => {
            loop_back(Stage::SqlGeneration, TransitionReason::RegenerateSql)
        }
        (Stage::ErrorRecovery, StepOutcome::RecoveryRegenerate) => loop_back(
            Stage::SchemaResolution,
            TransitionReason::RegenerateWithSchema,
        ),
        (Stage::ErrorRecovery, StepOutcome::RecoveryEscalate(reason)) => {
            fallback(reason, TransitionReason::RecoveryEscalated)
        }

        (Stage::InsightAnalysis, StepOutcome::InsightReady) => {
            advance(Stage::ChartRecommendation, TransitionReason::InsightReady)
        }
        (Stage::ChartRecommendation, StepOutcome::ChartReady) => {
            TransitionDecision::new(StageTransition::Complete, TransitionReason::ChartReady)
        }
        (Stage::GeneralChat, StepOutcome::ChatAnswered) => {
            TransitionDecision::new(StageTransition::Complete, TransitionReason::ChatAnswered)
        }

        _ => fallback(FallbackReason::Internal, TransitionReason::UnexpectedOutcome),
    }
}
