use crate::diagnostics::{classify_sql_error, redact_sensitive};
use crate::orchestrator_service::ports::SqlExecutionPort;
use crate::orchestrator_service::timing::elapsed_ms;
use crate::types::{ConnectionId, ExecutionError, ExecutionOutcome, ExecutionResult, FailureKind};
use std::time::Instant;
use tracing::{debug, warn};

fn into_result(attempt: u32, sql: &str, outcome: ExecutionOutcome, duration_ms: u64) -> ExecutionResult {
    let error = (!outcome.success).then(|| {
        let message = outcome
            .error
            .unwrap_or_else(|| "The database reported an unspecified error".to_string());
        ExecutionError {
            kind: classify_sql_error(&message),
            message,
        }
    });
    ExecutionResult {
        attempt,
        sql: sql.to_string(),
        success: outcome.success,
        columns: outcome.columns,
        rows: outcome.rows,
        row_count: outcome.row_count,
        truncated: outcome.truncated,
        error,
        duration_ms,
    }
}

/// Runs `sql` with exactly one call to the execution port.
///
/// Transport failures that survived the port's own backoff are folded into
/// a failed result so recovery can decide what to do with them.
pub async fn execute_once<X: SqlExecutionPort + Sync + ?Sized>(
    port: &X,
    connection_id: &ConnectionId,
    sql: &str,
    attempt: u32,
) -> ExecutionResult {
    let started = Instant::now();
    let outcome = port.execute(connection_id, sql).await;
    let duration_ms = elapsed_ms(started);

    match outcome {
        Ok(outcome) => {
            let result = into_result(attempt, sql, outcome, duration_ms);
            debug!(
                connection_id = %connection_id,
                attempt,
                success = result.success,
                row_count = result.row_count,
                duration_ms,
                "sql executed"
            );
            result
        }
        Err(err) => {
            let message = redact_sensitive(&err.to_string());
            warn!(connection_id = %connection_id, attempt, error = %message, "sql transport failed");
            let kind = match classify_sql_error(&message) {
                FailureKind::Unknown | FailureKind::Syntax | FailureKind::MissingObject => {
                    FailureKind::Connection
                }
                kind => kind,
            };
            ExecutionResult {
                attempt,
                sql: sql.to_string(),
                success: false,
                columns: Vec::new(),
                rows: Vec::new(),
                row_count: 0,
                truncated: false,
                error: Some(ExecutionError { kind, message }),
                duration_ms,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::execute_once;
    use crate::error::CopilotError;
    use crate::orchestrator_service::ports::{PortFuture, SqlExecutionPort};
    use crate::types::{ConnectionId, ExecutionOutcome, FailureKind};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneShot {
        calls: AtomicUsize,
        outcome: Result<ExecutionOutcome, String>,
    }

    impl SqlExecutionPort for OneShot {
        fn execute<'a>(
            &'a self,
            _connection_id: &'a ConnectionId,
            _sql: &'a str,
        ) -> PortFuture<'a, ExecutionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcome
                .clone()
                .map_err(|message| CopilotError::transport(message, false));
            Box::pin(async move { outcome })
        }
    }

    #[tokio::test]
    async fn success_copies_rows_and_calls_port_once() {
        let mut row = Map::new();
        row.insert("total".to_string(), json!(42));
        let port = OneShot {
            calls: AtomicUsize::new(0),
            outcome: Ok(ExecutionOutcome::rows(vec!["total".to_string()], vec![row], false)),
        };

        let result = execute_once(&port, &ConnectionId::new("shop"), "SELECT 42 AS total", 1).await;

        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn engine_error_is_classified() {
        let port = OneShot {
            calls: AtomicUsize::new(0),
            outcome: Ok(ExecutionOutcome::failure("column \"revenu\" does not exist")),
        };

        let result = execute_once(&port, &ConnectionId::new("shop"), "SELECT revenu", 2).await;

        assert!(!result.success);
        assert_eq!(result.attempt, 2);
        assert_eq!(result.error.unwrap().kind, FailureKind::MissingObject);
    }

    #[tokio::test]
    async fn transport_error_becomes_connection_failure() {
        let port = OneShot {
            calls: AtomicUsize::new(0),
            outcome: Err("socket closed".to_string()),
        };

        let result = execute_once(&port, &ConnectionId::new("shop"), "SELECT 1", 1).await;

        assert_eq!(result.error.unwrap().kind, FailureKind::Connection);
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
    }
}
