use crate::orchestrator_service::ports::{
    Completion, CompletionPurpose, CompletionRequest, PromptMessage,
};
use crate::prompts::INTENT_PROMPT;
use crate::types::{Intent, Message, Role};
use serde_json::{json, Value};

/// Parsed classifier reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentVerdict {
    pub intent: Intent,
    pub confidence: f64,
}

#[must_use]
pub fn build_request(question: &str, history: &[&Message]) -> CompletionRequest {
    let mut messages = vec![PromptMessage::system(INTENT_PROMPT)];
    messages.extend(history.iter().filter_map(|message| match message.role {
        Role::User => Some(PromptMessage::user(message.content.clone())),
        Role::Assistant => Some(PromptMessage::assistant(message.content.clone())),
        Role::Tool => None,
    }));
    messages.push(PromptMessage::user(question));
    CompletionRequest::new(CompletionPurpose::IntentClassification, messages).with_schema(json!({
        "type": "object",
        "properties": {
            "intent": {"type": "string", "enum": ["data_query", "general_chat"]},
            "confidence": {"type": "number"}
        },
        "required": ["intent", "confidence"],
        "additionalProperties": false
    }))
}

#[must_use]
pub fn parse_verdict(completion: &Completion) -> Option<IntentVerdict> {
    let value = completion.json()?;
    let intent = match value.get("intent").and_then(Value::as_str)? {
        "data_query" => Intent::DataQuery,
        "general_chat" => Intent::GeneralChat,
        _ => return None,
    };
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    Some(IntentVerdict { intent, confidence })
}

/// Data queries below the threshold are treated as chat so that an unsure
/// classifier never leads to SQL.
#[must_use]
pub fn decide_intent(verdict: Option<IntentVerdict>, threshold: f64) -> Intent {
    match verdict {
        Some(IntentVerdict {
            intent: Intent::DataQuery,
            confidence,
        }) if confidence >= threshold => Intent::DataQuery,
        _ => Intent::GeneralChat,
    }
}
