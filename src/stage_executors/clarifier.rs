use crate::error::{CopilotError, Result};
use crate::types::{
    Ambiguity, AmbiguityKind, ClarificationAnswers, ClarificationQuestion, ClarificationState,
    ClarifiedTerm, ConversationState, Message, SkillContext,
};
use itertools::Itertools;

pub const TIME_RANGE_CHOICES: &[&str] = &[
    "Last 7 days",
    "Last 30 days",
    "This quarter",
    "This year",
    "All time",
];

fn question_for(ambiguity: &Ambiguity, subject_choices: &[String]) -> ClarificationQuestion {
    let kind = ambiguity.kind();
    let (prompt, choices) = match ambiguity {
        Ambiguity::NoMatchingTable => (
            "Which part of the business is this question about?".to_string(),
            subject_choices.to_vec(),
        ),
        Ambiguity::AmbiguousTerm { term, candidates } => (
            format!("When you say \"{term}\", which one do you mean?"),
            candidates.clone(),
        ),
        Ambiguity::UnresolvedTimeRange { phrase } => (
            format!("What time period should \"{phrase}\" cover?"),
            TIME_RANGE_CHOICES.iter().map(ToString::to_string).collect(),
        ),
        Ambiguity::AmbiguousAggregation { measures } => (
            "Which figure should the ranking be based on?".to_string(),
            measures.clone(),
        ),
        Ambiguity::Interpretation { description } => (
            format!("Could you say a bit more? {description}"),
            Vec::new(),
        ),
    };
    ClarificationQuestion {
        id: kind.as_str().to_string(),
        kind,
        prompt,
        choices,
    }
}

/// One business-level question per ambiguity family, in a stable order.
#[must_use]
pub fn build_questions(
    ambiguities: &[Ambiguity],
    subject_choices: &[String],
) -> Vec<ClarificationQuestion> {
    ambiguities
        .iter()
        .unique_by(|ambiguity| ambiguity.kind())
        .sorted_by_key(|ambiguity| ambiguity.kind())
        .map(|ambiguity| question_for(ambiguity, subject_choices))
        .collect()
}

const fn answer_label(kind: AmbiguityKind) -> &'static str {
    match kind {
        AmbiguityKind::Subject => "about",
        AmbiguityKind::Term => "meaning",
        AmbiguityKind::TimeRange => "time period",
        AmbiguityKind::Aggregation => "measure",
        AmbiguityKind::Interpretation => "detail",
    }
}

/// Checks that the answers match the pending suspension exactly.
///
/// # Errors
/// Returns `CopilotError::ResumeError` naming unknown or unanswered ids.
pub fn validate_answers(pending: &ClarificationState, answers: &ClarificationAnswers) -> Result<()> {
    let expected = pending.question_ids();
    let unknown: Vec<&str> = answers
        .as_map()
        .keys()
        .map(String::as_str)
        .filter(|id| !expected.contains(id))
        .collect();
    if !unknown.is_empty() {
        return Err(CopilotError::ResumeError(format!(
            "Unknown clarification ids: {}",
            unknown.join(", ")
        )));
    }

    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|id| answers.get(id).is_none_or(str::is_empty))
        .collect();
    if !missing.is_empty() {
        return Err(CopilotError::ResumeError(format!(
            "Missing answers for: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Merges validated answers into the question text and the skill context,
/// and appends exactly one user message describing them.
pub fn apply_answers(state: &mut ConversationState, answers: &ClarificationAnswers) {
    let Some(pending) = state.clarification_state.as_mut() else {
        return;
    };
    pending.answers = answers.as_map().clone();

    let clarified: Vec<(AmbiguityKind, String, String)> = pending
        .questions
        .iter()
        .filter_map(|question| {
            answers
                .get(&question.id)
                .map(|answer| (question.kind, question.id.clone(), answer.to_string()))
        })
        .collect();

    let detail = clarified
        .iter()
        .map(|(kind, _, answer)| format!("{}: {answer}", answer_label(*kind)))
        .join("; ");
    state.effective_question = format!("{} ({detail})", state.effective_question);

    let context = state.skill_context.get_or_insert_with(SkillContext::default);
    context
        .clarifications
        .extend(clarified.iter().map(|(_, id, answer)| ClarifiedTerm {
            question_id: id.clone(),
            answer: answer.clone(),
        }));
    for (kind, _, _) in &clarified {
        if !state.settled_ambiguities.contains(kind) {
            state.settled_ambiguities.push(*kind);
        }
    }

    let turn = state.turn;
    state.push_message(Message::user(format!("Clarification ({detail})"), turn));
}
