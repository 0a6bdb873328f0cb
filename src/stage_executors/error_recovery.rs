//! Decides whether a failed attempt is worth another generation pass.

use super::text::normalize_error_message;
use crate::types::{ConversationState, ErrorRecord, FailureKind, FallbackReason, SchemaInfo};
use itertools::Itertools;

const SUGGESTION_THRESHOLD: f64 = 0.7;
const MAX_LISTED_COLUMNS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    Regenerate { hint: String },
    Escalate(FallbackReason),
}

/// Quoted identifiers mentioned in an engine error message.
fn quoted_identifiers(message: &str) -> Vec<&str> {
    ['"', '\'', '`']
        .iter()
        .flat_map(|quote| message.split(*quote).skip(1).step_by(2))
        .filter(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        })
        .collect()
}

/// Closest identifier the schema actually has, by normalized edit distance.
#[must_use]
pub fn closest_identifier(unknown: &str, schema: &SchemaInfo) -> Option<String> {
    let unknown = unknown
        .rsplit('.')
        .next()
        .unwrap_or(unknown)
        .to_lowercase();
    schema
        .known_identifiers()
        .into_iter()
        .filter(|candidate| candidate.to_lowercase() != unknown)
        .map(|candidate| {
            let score = strsim::normalized_levenshtein(&unknown, &candidate.to_lowercase());
            (candidate, score)
        })
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(candidate, _)| candidate)
}

fn missing_object_hint(error: &ErrorRecord, schema: Option<&SchemaInfo>) -> String {
    let Some(schema) = schema else {
        return "A referenced table or column does not exist. Use only listed names.".to_string();
    };
    let known = schema.known_identifiers();
    let suggestion = quoted_identifiers(&error.message)
        .into_iter()
        .filter(|name| {
            !known
                .iter()
                .any(|identifier| identifier.eq_ignore_ascii_case(name))
        })
        .find_map(|name| closest_identifier(name, schema).map(|fix| (name, fix)));

    match suggestion {
        Some((wrong, fix)) => format!("`{wrong}` does not exist. Did you mean `{fix}`?"),
        None => {
            let columns = schema
                .tables
                .iter()
                .flat_map(|table| {
                    table
                        .columns
                        .iter()
                        .map(move |column| format!("{}.{}", table.name, column.name))
                })
                .take(MAX_LISTED_COLUMNS)
                .join(", ");
            format!("A referenced table or column does not exist. Available columns: {columns}")
        }
    }
}

/// Corrective instruction for the next generation pass.
#[must_use]
pub fn correction_hint(error: &ErrorRecord, schema: Option<&SchemaInfo>) -> String {
    match error.kind {
        FailureKind::MissingObject => missing_object_hint(error, schema),
        FailureKind::Syntax => {
            "Fix the syntax error reported by the database. Check commas, parentheses, quoting and GROUP BY.".to_string()
        }
        FailureKind::Timeout => {
            "The query timed out. Filter to a narrower range, aggregate earlier, or add a row limit.".to_string()
        }
        FailureKind::UnsafeSql => {
            "Only a single read-only SELECT statement is allowed.".to_string()
        }
        FailureKind::Generation => {
            "Return exactly one SELECT statement in the sql field.".to_string()
        }
        FailureKind::Connection
        | FailureKind::PermissionDenied
        | FailureKind::Internal
        | FailureKind::Unknown => "Review the error and rewrite the statement.".to_string(),
    }
}

const fn escalation_for(kind: FailureKind) -> FallbackReason {
    match kind {
        FailureKind::PermissionDenied => FallbackReason::PermissionDenied,
        FailureKind::Connection => FallbackReason::DataSourceUnavailable,
        FailureKind::Timeout => FallbackReason::QueryTimedOut,
        FailureKind::UnsafeSql => FallbackReason::UnsafeRequest,
        _ => FallbackReason::Internal,
    }
}

/// True when the two most recent failures of this turn normalize to the
/// same message. Only adjacent attempts are compared.
#[must_use]
pub fn is_repeating(state: &ConversationState) -> bool {
    let mut recent = state.current_turn_errors().rev();
    match (recent.next(), recent.next()) {
        (Some(last), Some(previous)) => {
            normalize_error_message(&last.message) == normalize_error_message(&previous.message)
        }
        _ => false,
    }
}

#[must_use]
pub fn decide_recovery(state: &ConversationState) -> RecoveryDecision {
    let Some(last) = state.last_error() else {
        return RecoveryDecision::Escalate(FallbackReason::Internal);
    };
    let unsafe_this_turn = state
        .current_turn_errors()
        .any(|record| record.kind == FailureKind::UnsafeSql);
    let escalate = |reason: FallbackReason| {
        if unsafe_this_turn {
            RecoveryDecision::Escalate(FallbackReason::UnsafeRequest)
        } else {
            RecoveryDecision::Escalate(reason)
        }
    };

    if !last.kind.is_regenerable() {
        return RecoveryDecision::Escalate(escalation_for(last.kind));
    }
    if is_repeating(state) {
        return escalate(FallbackReason::RepeatedFailure);
    }
    if state.retry_count >= state.max_retries {
        let reason = if last.kind == FailureKind::Timeout {
            FallbackReason::QueryTimedOut
        } else {
            FallbackReason::RetriesExhausted
        };
        return escalate(reason);
    }
    RecoveryDecision::Regenerate {
        hint: correction_hint(last, state.schema_info.as_ref()),
    }
}

/// Prepares the state for another generation pass.
pub fn prepare_regeneration(state: &mut ConversationState, hint: String) {
    state.retry_count += 1;
    state.recovery_hint = Some(hint);
    state.clear_attempt();
    state.cache_hit = false;
    state.fast_mode = state.requested_fast_mode;
    state.touch();
}
