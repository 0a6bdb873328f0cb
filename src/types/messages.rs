use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry of the append-only conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub turn: u32,
    pub created_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, turn: u32) -> Self {
        Self {
            role,
            content: content.into(),
            payload: None,
            turn,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>, turn: u32) -> Self {
        Self::new(Role::User, content, turn)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, turn: u32) -> Self {
        Self::new(Role::Assistant, content, turn)
    }

    #[must_use]
    pub fn tool(content: impl Into<String>, payload: Value, turn: u32) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(Role::Tool, content, turn)
        }
    }

    fn duplicates(&self, other: &Self) -> bool {
        self.role == other.role
            && self.turn == other.turn
            && self.content == other.content
            && self.payload == other.payload
    }
}

/// Drops replayed assistant/tool entries that repeat the entry before them.
///
/// A crash between "append message" and "persist checkpoint" can leave the
/// same non-user entry twice in a row. User entries are never touched.
#[must_use]
pub fn repair_messages(messages: Vec<Message>) -> (Vec<Message>, usize) {
    let original = messages.len();
    let repaired = messages
        .into_iter()
        .fold(Vec::with_capacity(original), |mut kept: Vec<Message>, message| {
            let replayed = message.role != Role::User
                && kept.last().is_some_and(|previous| previous.duplicates(&message));
            if !replayed {
                kept.push(message);
            }
            kept
        });
    let dropped = original - repaired.len();
    (repaired, dropped)
}
