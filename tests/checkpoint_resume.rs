mod support;

use copilot::orchestrator_service::ports::CompletionPurpose;
use copilot::{
    ClarificationAnswers, CopilotError, RunStatus, ThreadId, TurnRequest, TurnResponse,
    TurnStatus,
};
use serde_json::json;
use support::{rows, shop, Harness};

async fn given_suspended_thread(harness: &Harness) -> TurnResponse {
    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "how many?"))
        .await
        .unwrap();
    assert_eq!(response.status, TurnStatus::NeedsClarification);
    response
}

fn given_restarted(first: &Harness) -> Harness {
    let second = Harness::sharing(&first.checkpoints, &first.retrieval);
    second
        .model
        .given_sql("SELECT COUNT(*) AS order_count FROM orders");
    second
        .warehouse
        .given_outcome(rows(&["order_count"], vec![vec![json!(42)]]));
    second
}

#[tokio::test]
async fn suspended_thread_resumes_in_a_new_process() {
    let first = Harness::new();
    let suspended = given_suspended_thread(&first).await;
    let second = given_restarted(&first);

    let response = second
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("subject", "Orders"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.turn, suspended.turn);
    assert_eq!(response.row_count, 1);
    assert!(first.warehouse.executed().is_empty());
    assert_eq!(second.warehouse.executed().len(), 1);

    let state = second
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.effective_question.contains("Orders"));
}

#[tokio::test]
async fn replaying_the_same_answers_is_idempotent() {
    let first = Harness::new();
    let suspended = given_suspended_thread(&first).await;
    let second = given_restarted(&first);
    let answers = ClarificationAnswers::single("subject", "Orders");

    let resumed = second
        .supervisor
        .resume(&suspended.thread_id, &answers)
        .await
        .unwrap();
    let messages_after_resume = second
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap()
        .messages
        .len();

    let replayed = second
        .supervisor
        .resume(&suspended.thread_id, &answers)
        .await
        .unwrap();
    let state = second
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(replayed, resumed);
    assert_eq!(state.messages.len(), messages_after_resume);
    assert_eq!(second.warehouse.executed().len(), 1);
    assert_eq!(second.model.calls(CompletionPurpose::SqlGeneration), 1);
}

#[tokio::test]
async fn different_answers_after_completion_are_rejected() {
    let first = Harness::new();
    let suspended = given_suspended_thread(&first).await;
    let second = given_restarted(&first);
    second
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("subject", "Orders"),
        )
        .await
        .unwrap();

    let err = second
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("subject", "Customers"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::ResumeError(_)));
}

#[tokio::test]
async fn incomplete_answers_leave_the_thread_suspended() {
    let harness = Harness::new();
    let suspended = given_suspended_thread(&harness).await;

    let err = harness
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("time_range", "last month"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::ResumeError(_)));
    let state = harness
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, RunStatus::Suspended);
    assert!(harness.warehouse.executed().is_empty());
}

#[tokio::test]
async fn unknown_thread_cannot_be_resumed() {
    let harness = Harness::new();

    let err = harness
        .supervisor
        .resume(
            &ThreadId::new("never-started"),
            &ClarificationAnswers::single("subject", "Orders"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopilotError::NotFound(_)));
}

#[tokio::test]
async fn new_question_abandons_pending_clarification() {
    let harness = Harness::new();
    let suspended = given_suspended_thread(&harness).await;
    harness
        .model
        .given_sql("SELECT SUM(amount) FROM orders WHERE date >= '2024-01-01'");

    let response = harness
        .supervisor
        .run_turn(
            TurnRequest::new(shop(), "total amount of orders in 2024")
                .on_thread(suspended.thread_id.clone()),
        )
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.turn, suspended.turn + 1);
    let state = harness
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert!(state.clarification_state.is_none());
}

#[tokio::test]
async fn event_sequence_keeps_increasing_across_resume() {
    let first = Harness::new();
    let suspended = given_suspended_thread(&first).await;
    let second = given_restarted(&first);
    second
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("subject", "Orders"),
        )
        .await
        .unwrap();

    let before: Vec<u64> = first.events.events().iter().map(|e| e.sequence).collect();
    let after: Vec<u64> = second.events.events().iter().map(|e| e.sequence).collect();

    assert!(!before.is_empty() && !after.is_empty());
    assert!(before.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(after.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(before.last().unwrap() < after.first().unwrap());
}
