use super::{transport_error, ConnectionPools};
use crate::error::Result;
use crate::orchestrator_service::ports::{PortFuture, SqlExecutionPort};
use crate::types::{ConnectionId, ExecutionOutcome};
use serde_json::{Map, Value};
use sqlx::{Column, Executor, Row};
use std::sync::Arc;
use tracing::debug;

/// Wraps a validated SELECT so the server returns at most `max_rows + 1`
/// rows as one JSON array, keeping column order.
#[must_use]
pub fn wrap_row_limited(sql: &str, max_rows: usize) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!(
        "SELECT COALESCE(json_agg(row_to_json(limited)), '[]'::json) \
         FROM (SELECT * FROM ({inner}) AS copilot_query LIMIT {}) AS limited",
        max_rows.saturating_add(1)
    )
}

/// Read-only PostgreSQL execution over the per-connection pools.
///
/// Engine errors are returned as a failed outcome so that exactly one
/// statement reaches the database per call; only transport problems are `Err`.
#[derive(Clone)]
pub struct PgSqlExecutor {
    pools: Arc<ConnectionPools>,
    max_rows: usize,
}

impl PgSqlExecutor {
    #[must_use]
    pub fn new(pools: Arc<ConnectionPools>, max_rows: usize) -> Self {
        Self {
            pools,
            max_rows: max_rows.max(1),
        }
    }

    async fn run(&self, connection_id: &ConnectionId, sql: &str) -> Result<ExecutionOutcome> {
        let pool = self.pools.pool(connection_id).await?;
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| transport_error("Failed to begin transaction", &e))?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| transport_error("Failed to enter read-only mode", &e))?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.pools.settings().statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| transport_error("Failed to set statement timeout", &e))?;

        let fetched = sqlx::query(&wrap_row_limited(sql, self.max_rows))
            .fetch_one(&mut *tx)
            .await;
        let outcome = match fetched {
            Ok(row) => {
                let payload: Value = row
                    .try_get(0)
                    .map_err(|e| transport_error("Failed to decode result", &e))?;
                let mut rows = into_rows(payload);
                let truncated = rows.len() > self.max_rows;
                rows.truncate(self.max_rows);
                let columns = match rows.first() {
                    Some(first) => first.keys().cloned().collect(),
                    None => describe_columns(&mut tx, sql).await,
                };
                ExecutionOutcome::rows(columns, rows, truncated)
            }
            Err(sqlx::Error::Database(db_err)) => ExecutionOutcome::failure(db_err.message()),
            Err(other) => {
                let _ = tx.rollback().await;
                return Err(transport_error("Query failed", &other));
            }
        };

        tx.rollback()
            .await
            .map_err(|e| transport_error("Failed to close transaction", &e))?;
        debug!(
            connection_id = %connection_id,
            success = outcome.success,
            row_count = outcome.row_count,
            truncated = outcome.truncated,
            "target query finished"
        );
        Ok(outcome)
    }
}

async fn describe_columns(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    sql: &str,
) -> Vec<String> {
    let statement = sql.trim().trim_end_matches(';');
    match (&mut **tx).describe(statement).await {
        Ok(described) => described
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn into_rows(payload: Value) -> Vec<Map<String, Value>> {
    match payload {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl SqlExecutionPort for PgSqlExecutor {
    fn execute<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        Box::pin(self.run(connection_id, sql))
    }
}
