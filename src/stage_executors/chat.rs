use crate::orchestrator_service::ports::{
    CompletionPort, CompletionPurpose, CompletionRequest, PromptMessage,
};
use crate::prompts::GENERAL_CHAT_PROMPT;
use crate::types::{Message, Role};
use crate::Result;

#[must_use]
pub fn build_request(question: &str, history: &[&Message]) -> CompletionRequest {
    let mut messages = vec![PromptMessage::system(GENERAL_CHAT_PROMPT)];
    messages.extend(history.iter().filter_map(|message| match message.role {
        Role::User => Some(PromptMessage::user(message.content.clone())),
        Role::Assistant => Some(PromptMessage::assistant(message.content.clone())),
        Role::Tool => None,
    }));
    messages.push(PromptMessage::user(question));
    CompletionRequest::new(CompletionPurpose::GeneralChat, messages).with_temperature(0.7)
}

/// Free-text answer for a conversational message.
///
/// # Errors
///
/// Propagates completion port errors; an empty reply is a `StageError`.
pub async fn respond<C: CompletionPort + Sync + ?Sized>(
    port: &C,
    question: &str,
    history: &[&Message],
) -> Result<String> {
    let completion = port.complete(build_request(question, history)).await?;
    let reply = completion.text.trim().to_string();
    if reply.is_empty() {
        return Err(crate::CopilotError::StageError(
            "general chat reply was empty".to_string(),
        ));
    }
    Ok(reply)
}
