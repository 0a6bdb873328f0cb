use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{AmbiguityKind, Stage};

/// Business-level question shown to the caller. Never mentions raw schema names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub id: String,
    pub kind: AmbiguityKind,
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Pending suspension recorded on the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationState {
    pub questions: Vec<ClarificationQuestion>,
    pub resume_stage: Stage,
    pub asked_turn: u32,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

impl ClarificationState {
    #[must_use]
    pub fn question_ids(&self) -> Vec<&str> {
        self.questions.iter().map(|q| q.id.as_str()).collect()
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        !self.questions.is_empty()
            && self
                .questions
                .iter()
                .all(|question| self.answers.contains_key(&question.id))
    }
}

/// Caller-supplied answers keyed by question id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClarificationAnswers(BTreeMap<String, String>);

impl ClarificationAnswers {
    #[must_use]
    pub fn new(answers: BTreeMap<String, String>) -> Self {
        Self(
            answers
                .into_iter()
                .map(|(id, answer)| (id.trim().to_string(), answer.trim().to_string()))
                .collect(),
        )
    }

    #[must_use]
    pub fn single(id: impl Into<String>, answer: impl Into<String>) -> Self {
        let mut answers = BTreeMap::new();
        answers.insert(id.into(), answer.into());
        Self::new(answers)
    }

    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable digest used to recognise a repeated resume with the same answers.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, answer) in &self.0 {
            hasher.update(id.as_bytes());
            hasher.update([0]);
            hasher.update(answer.to_lowercase().as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Remembers which answers already resumed a given turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub turn: u32,
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::ClarificationAnswers;
    use std::collections::BTreeMap;

    #[test]
    fn fingerprint_ignores_whitespace_and_case() {
        let first = ClarificationAnswers::single("time_range", "Last 30 days");
        let mut raw = BTreeMap::new();
        raw.insert(" time_range ".to_string(), "last 30 days ".to_string());
        let second = ClarificationAnswers::new(raw);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_answer() {
        let first = ClarificationAnswers::single("metric", "Total");
        let second = ClarificationAnswers::single("metric", "Average");
        assert_ne!(first.fingerprint(), second.fingerprint());
    }
}
