#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

#[cfg(test)]
mod bdd_tests {
    use crate::domain::stage::{
        route, RouteContext, StageTransition, StepOutcome, TransitionDecision, TransitionReason,
    };
    use crate::types::{FallbackReason, Intent, Stage};

    fn given_a_standard_context() -> RouteContext {
        RouteContext {
            fast_mode: false,
            has_schema: true,
            clarification_rounds: 0,
            max_clarification_rounds: 1,
        }
    }

    fn given_a_fast_mode_context() -> RouteContext {
        RouteContext {
            fast_mode: true,
            ..given_a_standard_context()
        }
    }

    fn given_a_context_without_schema() -> RouteContext {
        RouteContext {
            has_schema: false,
            ..given_a_standard_context()
        }
    }

    fn given_clarification_already_used() -> RouteContext {
        RouteContext {
            clarification_rounds: 1,
            ..given_a_standard_context()
        }
    }

    fn when_routing(stage: Stage, outcome: StepOutcome, ctx: &RouteContext) -> TransitionDecision {
        route(stage, outcome, ctx)
    }

    #[test]
    fn when_intent_is_data_query_then_cache_lookup_runs_next() {
        let decision = when_routing(
            Stage::IntentRouting,
            StepOutcome::IntentClassified(Intent::DataQuery),
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Advance(Stage::CacheLookup)
        );
        assert_eq!(decision.reason(), TransitionReason::IntentDataQuery);
    }

    #[test]
    fn when_intent_is_general_chat_then_sql_stages_are_never_reached() {
        let decision = when_routing(
            Stage::IntentRouting,
            StepOutcome::IntentClassified(Intent::GeneralChat),
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Advance(Stage::GeneralChat)
        );

        let finished = when_routing(
            Stage::GeneralChat,
            StepOutcome::ChatAnswered,
            &given_a_standard_context(),
        );
        assert_eq!(finished.transition(), StageTransition::Complete);
    }

    #[test]
    fn when_cache_hits_then_safety_check_is_not_skipped() {
        let decision = when_routing(
            Stage::CacheLookup,
            StepOutcome::CacheHit,
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Advance(Stage::SafetyCheck)
        );
    }

    #[test]
    fn when_schema_is_ambiguous_then_clarification_runs() {
        let decision = when_routing(
            Stage::SchemaResolution,
            StepOutcome::SchemaResolved { ambiguous: true },
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Advance(Stage::Clarification)
        );
    }

    #[test]
    fn when_schema_is_still_ambiguous_after_clarifying_then_falls_back() {
        let decision = when_routing(
            Stage::SchemaResolution,
            StepOutcome::SchemaResolved { ambiguous: true },
            &given_clarification_already_used(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Fallback(FallbackReason::NotUnderstood)
        );
        assert_eq!(
            decision.reason(),
            TransitionReason::ClarificationLimitReached
        );
    }

    #[test]
    fn when_clarification_requested_then_run_suspends() {
        let decision = when_routing(
            Stage::Clarification,
            StepOutcome::ClarificationRequested,
            &given_a_standard_context(),
        );

        assert!(decision.transition().should_suspend());
    }

    #[test]
    fn when_clarification_resolved_without_schema_then_schema_is_resolved_first() {
        let decision = when_routing(
            Stage::Clarification,
            StepOutcome::ClarificationResolved {
                resume_stage: Stage::SqlGeneration,
            },
            &given_a_context_without_schema(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::LoopBack(Stage::SchemaResolution)
        );
    }

    #[test]
    fn when_safety_rejects_then_error_recovery_runs_instead_of_execution() {
        let decision = when_routing(
            Stage::SafetyCheck,
            StepOutcome::SafetyRejected,
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Advance(Stage::ErrorRecovery)
        );
    }

    #[test]
    fn when_execution_succeeds_in_fast_mode_then_turn_completes() {
        let fast = when_routing(
            Stage::SqlExecution,
            StepOutcome::ExecutionSucceeded,
            &given_a_fast_mode_context(),
        );
        let full = when_routing(
            Stage::SqlExecution,
            StepOutcome::ExecutionSucceeded,
            &given_a_standard_context(),
        );

        assert_eq!(fast.transition(), StageTransition::Complete);
        assert_eq!(fast.reason(), TransitionReason::FastModeComplete);
        assert_eq!(
            full.transition(),
            StageTransition::Advance(Stage::InsightAnalysis)
        );
    }

    #[test]
    fn when_recovery_regenerates_then_routes_back_to_generation() {
        let with_schema = when_routing(
            Stage::ErrorRecovery,
            StepOutcome::RecoveryRegenerate,
            &given_a_standard_context(),
        );
        let without_schema = when_routing(
            Stage::ErrorRecovery,
            StepOutcome::RecoveryRegenerate,
            &given_a_context_without_schema(),
        );

        assert_eq!(
            with_schema.transition(),
            StageTransition::LoopBack(Stage::SqlGeneration)
        );
        assert_eq!(
            without_schema.transition(),
            StageTransition::LoopBack(Stage::SchemaResolution)
        );
    }

    #[test]
    fn when_recovery_escalates_then_fallback_carries_reason() {
        let decision = when_routing(
            Stage::ErrorRecovery,
            StepOutcome::RecoveryEscalate(FallbackReason::PermissionDenied),
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Fallback(FallbackReason::PermissionDenied)
        );
    }

    #[test]
    fn when_outcome_does_not_belong_to_stage_then_internal_fallback() {
        let decision = when_routing(
            Stage::InsightAnalysis,
            StepOutcome::CacheHit,
            &given_a_standard_context(),
        );

        assert_eq!(
            decision.transition(),
            StageTransition::Fallback(FallbackReason::Internal)
        );
        assert_eq!(decision.reason_code(), "unexpected_outcome");
    }

    #[test]
    fn when_any_stage_fails_then_fallback_uses_reported_reason() {
        for stage in [Stage::IntentRouting, Stage::SchemaResolution, Stage::GeneralChat] {
            let decision = when_routing(
                stage,
                StepOutcome::Failed(FallbackReason::ServiceUnavailable),
                &given_a_standard_context(),
            );
            assert_eq!(
                decision.transition(),
                StageTransition::Fallback(FallbackReason::ServiceUnavailable)
            );
        }
    }

    #[test]
    fn forward_advances_never_move_backwards() {
        let outcomes = [
            (Stage::IntentRouting, StepOutcome::IntentClassified(Intent::DataQuery)),
            (Stage::CacheLookup, StepOutcome::CacheMiss),
            (Stage::SchemaResolution, StepOutcome::SchemaResolved { ambiguous: false }),
            (Stage::SqlGeneration, StepOutcome::SqlGenerated),
            (Stage::SafetyCheck, StepOutcome::SafetyPassed),
            (Stage::SqlExecution, StepOutcome::ExecutionSucceeded),
            (Stage::InsightAnalysis, StepOutcome::InsightReady),
        ];

        for (stage, outcome) in outcomes {
            let decision = when_routing(stage, outcome, &given_a_standard_context());
            if let StageTransition::Advance(next) = decision.transition() {
                assert!(next.rank() > stage.rank(), "{stage} -> {next}");
            }
        }
    }
}
