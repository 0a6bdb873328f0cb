mod support;

use copilot::orchestrator_service::ports::{CompletionPurpose, RetrievalPort};
use copilot::{
    ChartType, ClarificationAnswers, ExecutionOutcome, FallbackReason, RunStatus, Stage,
    TurnRequest, TurnStatus,
};
use serde_json::json;
use support::{rows, shop, Harness};

#[tokio::test]
async fn monthly_sales_question_runs_end_to_end_with_time_series_chart() {
    let harness = Harness::new();
    harness.model.given_sql(
        "SELECT date_trunc('month', date) AS month, SUM(amount) AS total_sales \
         FROM orders WHERE date >= '2024-01-01' AND date < '2025-01-01' \
         GROUP BY 1 ORDER BY 1",
    );

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "show total sales by month for 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    let sql = response.sql.clone().unwrap().to_lowercase();
    assert!(sql.starts_with("select"));
    assert!(sql.contains("date_trunc('month'"));
    assert!(sql.contains("sum(amount)"));
    assert_eq!(response.row_count, 2);
    assert_eq!(response.retry_count, 0);
    assert!(response.chart.as_ref().unwrap().chart_type.is_time_series());
    assert!(response.insight.is_some());
    assert_eq!(harness.warehouse.executed().len(), 1);
}

#[tokio::test]
async fn delete_request_is_refused_before_any_execution() {
    let harness = Harness::new();
    harness.model.given_sql("DELETE FROM customers");

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "delete all customers"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Fallback);
    assert_eq!(response.fallback_reason, Some(FallbackReason::UnsafeRequest));
    assert!(harness.warehouse.executed().is_empty());
    assert!(!response.message.contains("DELETE"));
    assert!(response.rows.is_empty());
}

#[tokio::test]
async fn stacked_statement_is_never_executed() {
    let harness = Harness::new();
    harness.model.given_sql("SELECT * FROM orders; DROP TABLE orders");

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "list the orders for 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Fallback);
    assert!(harness.warehouse.executed().is_empty());
}

#[tokio::test]
async fn question_without_subject_asks_instead_of_guessing() {
    let harness = Harness::new();
    harness.model.given_sql("SELECT COUNT(*) FROM orders");

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "how many?"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::NeedsClarification);
    assert!(response.sql.is_none());
    let question = &response.questions[0];
    assert_eq!(question.id, "subject");
    assert!(question.choices.iter().any(|choice| choice == "Orders"));
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 0);
    assert!(harness.warehouse.executed().is_empty());

    let state = harness
        .supervisor
        .conversation(&response.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, RunStatus::Suspended);
}

#[tokio::test]
async fn misspelled_column_is_corrected_on_one_retry() {
    let harness = Harness::new();
    harness
        .model
        .given_sql("SELECT SUM(revenu) AS total_revenue FROM orders WHERE date >= '2024-01-01'");
    harness
        .model
        .given_sql("SELECT SUM(revenue) AS total_revenue FROM orders WHERE date >= '2024-01-01'");
    harness
        .warehouse
        .given_outcome(ExecutionOutcome::failure("column \"revenu\" does not exist"));
    harness
        .warehouse
        .given_outcome(rows(&["total_revenue"], vec![vec![json!(98000.0)]]));

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.retry_count, 1);
    assert!(response.sql.as_deref().unwrap().contains("SUM(revenue)"));

    let executed = harness.warehouse.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].contains("revenu)"));
    assert!(executed[1].contains("revenue)"));

    let state = harness
        .supervisor
        .conversation(&response.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.current_stage, Stage::Completed);
    assert_eq!(state.error_history.len(), 1);
}

#[tokio::test]
async fn general_chat_never_reaches_generation_or_execution() {
    let harness = Harness::new();
    harness.model.given_intent("general_chat", 0.97);
    harness.model.given_sql("SELECT 1");

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "hello there, who are you?"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert!(response.sql.is_none());
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 0);
    assert!(harness.warehouse.executed().is_empty());
    assert!(harness
        .events
        .events()
        .iter()
        .all(|event| !matches!(
            &event.kind,
            copilot::ProgressEventKind::StageEntered {
                stage: Stage::SqlGeneration | Stage::SqlExecution
            }
        )));
}

#[tokio::test]
async fn retry_count_never_exceeds_the_budget() {
    let harness = Harness::with_max_retries(2);
    for column in ["alpha", "beta", "gamma", "delta"] {
        harness
            .model
            .given_sql(&format!("SELECT SUM({column}) FROM orders WHERE date >= '2024-01-01'"));
        harness.warehouse.given_outcome(ExecutionOutcome::failure(format!(
            "column \"{column}\" does not exist"
        )));
    }

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "total amount of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Fallback);
    assert_eq!(response.fallback_reason, Some(FallbackReason::RetriesExhausted));
    assert_eq!(response.retry_count, 2);
    assert_eq!(harness.warehouse.executed().len(), 3);
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 3);
}

#[tokio::test]
async fn identical_errors_after_regeneration_escalate() {
    let harness = Harness::new();
    harness
        .model
        .given_sql("SELECT SUM(revenu) FROM orders WHERE date >= '2024-01-01'");
    harness
        .model
        .given_sql("SELECT SUM(o.revenu) FROM orders o WHERE o.date >= '2024-01-01'");
    harness
        .model
        .given_sql("SELECT SUM(revenue) FROM orders WHERE date >= '2024-01-01'");
    for _ in 0..2 {
        harness
            .warehouse
            .given_outcome(ExecutionOutcome::failure("column \"revenu\" does not exist"));
    }

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Fallback);
    assert_eq!(response.fallback_reason, Some(FallbackReason::RepeatedFailure));
    assert_eq!(harness.warehouse.executed().len(), 2);
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 2);
}

#[tokio::test]
async fn grouped_categories_get_a_bar_chart() {
    let harness = Harness::new();
    harness.model.given_sql(
        "SELECT status, SUM(amount) AS total_amount FROM orders \
         WHERE date >= '2024-01-01' GROUP BY status",
    );
    harness.warehouse.given_outcome(rows(
        &["status", "total_amount"],
        vec![
            vec![json!("paid"), json!(5400.0)],
            vec![json!("refunded"), json!(320.0)],
            vec![json!("pending"), json!(780.0)],
        ],
    ));

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "total amount of orders per status in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    let chart = response.chart.unwrap();
    assert!(matches!(chart.chart_type, ChartType::Bar | ChartType::Pie));
}

#[tokio::test]
async fn fast_mode_skips_insight_and_chart() {
    let harness = Harness::new();
    harness.model.given_sql("SELECT SUM(amount) FROM orders WHERE date >= '2024-01-01'");

    let response = harness
        .supervisor
        .run_turn(
            TurnRequest::new(shop(), "total amount of orders in 2024").with_fast_mode(true),
        )
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert!(response.fast_mode);
    assert!(response.chart.is_none());
    assert_eq!(harness.model.calls(CompletionPurpose::InsightAnalysis), 0);
}

#[tokio::test]
async fn successful_query_is_reused_by_a_restarted_supervisor() {
    let first = Harness::new();
    first.model.given_sql(
        "SELECT date_trunc('month', date) AS month, SUM(amount) AS total_sales \
         FROM orders GROUP BY 1",
    );
    first
        .supervisor
        .run_turn(TurnRequest::new(shop(), "show total sales by month for 2024"))
        .await
        .unwrap();
    assert_eq!(first.retrieval.len().await, 1);

    let second = Harness::sharing(&first.checkpoints, &first.retrieval);
    let response = second
        .supervisor
        .run_turn(TurnRequest::new(shop(), "show total sales by month for 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert!(response.cache_hit);
    assert_eq!(second.model.calls(CompletionPurpose::SqlGeneration), 0);
    assert_eq!(second.warehouse.executed().len(), 1);
}

#[tokio::test]
async fn question_for_another_year_is_generated_fresh() {
    let harness = Harness::new();
    harness.model.given_sql(
        "SELECT date_trunc('month', date) AS month, SUM(amount) AS total_sales \
         FROM orders WHERE date >= '2024-01-01' AND date < '2025-01-01' GROUP BY 1",
    );
    harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "show total sales by month for 2024"))
        .await
        .unwrap();

    harness.model.given_sql(
        "SELECT date_trunc('month', date) AS month, SUM(amount) AS total_sales \
         FROM orders WHERE date >= '2023-01-01' AND date < '2024-01-01' GROUP BY 1",
    );
    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "show total sales by month for 2023"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert!(!response.cache_hit);
    assert!(response.sql.as_deref().unwrap().contains("2023-01-01"));
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 2);
}

#[tokio::test]
async fn failing_remembered_sql_falls_back_to_schema_and_regeneration() {
    let harness = Harness::new();
    harness
        .retrieval
        .remember(
            &shop(),
            "what was the total revenue of orders in 2024",
            "SELECT SUM(revenu) AS total_revenue FROM orders WHERE date >= '2024-01-01'",
        )
        .await
        .unwrap();
    harness
        .model
        .given_sql("SELECT SUM(revenue) AS total_revenue FROM orders WHERE date >= '2024-01-01'");
    harness
        .warehouse
        .given_outcome(ExecutionOutcome::failure("column \"revenu\" does not exist"));
    harness
        .warehouse
        .given_outcome(rows(&["total_revenue"], vec![vec![json!(98000.0)]]));

    let response = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert!(!response.cache_hit);
    assert!(!response.fast_mode);
    assert_eq!(response.retry_count, 1);
    assert!(response.insight.is_some());
    assert!(response.chart.is_some());
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 1);
    assert_eq!(harness.model.calls(CompletionPurpose::InsightAnalysis), 1);
    assert_eq!(harness.warehouse.schema_fetches(), 1);

    let executed = harness.warehouse.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].contains("revenu)"));
    assert!(executed[1].contains("revenue)"));
}

#[tokio::test]
async fn failed_remembered_sql_is_not_offered_again() {
    let harness = Harness::with_max_retries(0);
    harness
        .retrieval
        .remember(
            &shop(),
            "what was the total revenue of orders in 2024",
            "SELECT SUM(revenu) AS total_revenue FROM orders WHERE date >= '2024-01-01'",
        )
        .await
        .unwrap();
    harness
        .warehouse
        .given_outcome(ExecutionOutcome::failure("column \"revenu\" does not exist"));

    let first = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();
    assert_eq!(first.status, TurnStatus::Fallback);
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 0);

    harness
        .model
        .given_sql("SELECT SUM(revenue) AS total_revenue FROM orders WHERE date >= '2024-01-01'");
    let second = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(second.status, TurnStatus::Completed);
    assert!(!second.cache_hit);
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 1);
    let executed = harness.warehouse.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(
        executed.iter().filter(|sql| sql.contains("revenu)")).count(),
        1
    );
}

#[tokio::test]
async fn generator_ambiguity_resumes_at_generation_with_schema_kept() {
    let harness = Harness::new();
    harness
        .model
        .given_clarifying_reply("Revenue could be gross or net of refunds.");

    let suspended = harness
        .supervisor
        .run_turn(TurnRequest::new(shop(), "what was the total revenue of orders in 2024"))
        .await
        .unwrap();

    assert_eq!(suspended.status, TurnStatus::NeedsClarification);
    assert_eq!(suspended.questions[0].id, "interpretation");
    assert!(suspended.questions[0].prompt.contains("gross or net"));
    assert!(harness.warehouse.executed().is_empty());
    let fetches_before_resume = harness.warehouse.schema_fetches();

    harness
        .model
        .given_sql("SELECT SUM(revenue) AS total_revenue FROM orders WHERE date >= '2024-01-01'");
    let response = harness
        .supervisor
        .resume(
            &suspended.thread_id,
            &ClarificationAnswers::single("interpretation", "gross"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.turn, suspended.turn);
    assert_eq!(harness.warehouse.schema_fetches(), fetches_before_resume);
    assert_eq!(harness.model.calls(CompletionPurpose::SqlGeneration), 2);
    assert_eq!(harness.warehouse.executed().len(), 1);

    let state = harness
        .supervisor
        .conversation(&suspended.thread_id)
        .await
        .unwrap()
        .unwrap();
    assert!(state.schema_info.is_some());
    assert!(state.effective_question.contains("gross"));
}
