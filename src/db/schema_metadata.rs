use super::{transport_error, ConnectionPools};
use crate::error::Result;
use crate::orchestrator_service::ports::{PortFuture, SchemaMetadataPort};
use crate::types::{
    ColumnMetadata, ConnectionId, Dialect, Relationship, SchemaMetadata, TableMetadata,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// `(table, column, data_type, nullable, is_primary_key)` in ordinal order.
pub type ColumnRow = (String, String, String, bool, bool);

/// `(from_table, from_column, to_table, to_column)`.
pub type ForeignKeyRow = (String, String, String, String);

const COLUMNS_SQL: &str = "
SELECT c.table_name::text,
       c.column_name::text,
       c.data_type::text,
       c.is_nullable = 'YES' AS nullable,
       COALESCE(pk.is_primary_key, false) AS is_primary_key
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
LEFT JOIN (
    SELECT kcu.table_name, kcu.column_name, true AS is_primary_key
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1
) pk ON pk.table_name = c.table_name AND pk.column_name = c.column_name
WHERE c.table_schema = $1 AND t.table_type IN ('BASE TABLE', 'VIEW')
ORDER BY c.table_name, c.ordinal_position";

const DESCRIPTIONS_SQL: &str = "
SELECT c.relname::text, obj_description(c.oid, 'pg_class')
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'v', 'm')";

const FOREIGN_KEYS_SQL: &str = "
SELECT kcu.table_name::text, kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1";

/// Builds the snapshot from catalog rows, keeping only tables in
/// `table_filter` (case-insensitive) when one is given.
#[must_use]
pub fn assemble_metadata(
    connection_id: &ConnectionId,
    dialect: Dialect,
    columns: Vec<ColumnRow>,
    descriptions: &HashMap<String, String>,
    foreign_keys: Vec<ForeignKeyRow>,
    table_filter: Option<&[String]>,
) -> SchemaMetadata {
    let wanted = |table: &str| {
        table_filter.is_none_or(|filter| filter.iter().any(|name| name.eq_ignore_ascii_case(table)))
    };

    let mut tables: BTreeMap<String, Vec<ColumnMetadata>> = BTreeMap::new();
    for (table, name, data_type, nullable, is_primary_key) in columns {
        if !wanted(&table) {
            continue;
        }
        tables.entry(table).or_default().push(ColumnMetadata {
            name,
            data_type,
            nullable,
            is_primary_key,
        });
    }

    let relationships = foreign_keys
        .into_iter()
        .filter(|(from_table, _, to_table, _)| {
            tables.contains_key(from_table) && tables.contains_key(to_table)
        })
        .map(|(from_table, from_column, to_table, to_column)| Relationship {
            from_table,
            from_column,
            to_table,
            to_column,
        })
        .collect();

    SchemaMetadata {
        connection_id: connection_id.clone(),
        dialect,
        tables: tables
            .into_iter()
            .map(|(name, columns)| TableMetadata {
                description: descriptions.get(&name).cloned(),
                name,
                columns,
            })
            .collect(),
        relationships,
    }
}

/// Reads tables, columns and foreign keys from the PostgreSQL catalog.
#[derive(Clone)]
pub struct PgSchemaMetadata {
    pools: Arc<ConnectionPools>,
}

impl PgSchemaMetadata {
    #[must_use]
    pub const fn new(pools: Arc<ConnectionPools>) -> Self {
        Self { pools }
    }

    async fn load(
        &self,
        connection_id: &ConnectionId,
        table_filter: Option<&[String]>,
    ) -> Result<SchemaMetadata> {
        let spec = self.pools.spec(connection_id)?;
        let pool = self.pools.pool(connection_id).await?;

        let columns: Vec<ColumnRow> = sqlx::query_as(COLUMNS_SQL)
            .bind(&spec.schema)
            .fetch_all(&pool)
            .await
            .map_err(|e| transport_error("Failed to read columns", &e))?;
        let descriptions: Vec<(String, Option<String>)> = sqlx::query_as(DESCRIPTIONS_SQL)
            .bind(&spec.schema)
            .fetch_all(&pool)
            .await
            .map_err(|e| transport_error("Failed to read table comments", &e))?;
        let foreign_keys: Vec<ForeignKeyRow> = sqlx::query_as(FOREIGN_KEYS_SQL)
            .bind(&spec.schema)
            .fetch_all(&pool)
            .await
            .map_err(|e| transport_error("Failed to read foreign keys", &e))?;

        let descriptions: HashMap<String, String> = descriptions
            .into_iter()
            .filter_map(|(table, comment)| comment.map(|comment| (table, comment)))
            .collect();
        let metadata = assemble_metadata(
            connection_id,
            spec.dialect,
            columns,
            &descriptions,
            foreign_keys,
            table_filter,
        );
        debug!(
            connection_id = %connection_id,
            tables = metadata.tables.len(),
            relationships = metadata.relationships.len(),
            "schema metadata loaded"
        );
        Ok(metadata)
    }
}

impl SchemaMetadataPort for PgSchemaMetadata {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        Box::pin(self.load(connection_id, table_filter))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::{assemble_metadata, ColumnRow, ForeignKeyRow};
    use crate::types::{ConnectionId, Dialect};
    use std::collections::HashMap;

    fn column(table: &str, name: &str, data_type: &str, pk: bool) -> ColumnRow {
        (
            table.to_string(),
            name.to_string(),
            data_type.to_string(),
            !pk,
            pk,
        )
    }

    fn given_catalog() -> (Vec<ColumnRow>, Vec<ForeignKeyRow>) {
        (
            vec![
                column("orders", "id", "integer", true),
                column("orders", "customer_id", "integer", false),
                column("orders", "amount", "numeric", false),
                column("customers", "id", "integer", true),
                column("customers", "name", "text", false),
            ],
            vec![(
                "orders".to_string(),
                "customer_id".to_string(),
                "customers".to_string(),
                "id".to_string(),
            )],
        )
    }

    #[test]
    fn columns_are_grouped_per_table_in_order() {
        let (columns, fks) = given_catalog();
        let descriptions =
            HashMap::from([("orders".to_string(), "One row per checkout".to_string())]);

        let metadata = assemble_metadata(
            &ConnectionId::new("shop"),
            Dialect::Postgres,
            columns,
            &descriptions,
            fks,
            None,
        );

        assert_eq!(metadata.tables.len(), 2);
        let orders = metadata.tables.iter().find(|t| t.name == "orders").unwrap();
        let names: Vec<&str> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "customer_id", "amount"]);
        assert!(orders.columns[0].is_primary_key);
        assert_eq!(orders.description.as_deref(), Some("One row per checkout"));
        assert_eq!(metadata.relationships.len(), 1);
    }

    #[test]
    fn filter_drops_tables_and_dangling_relationships() {
        let (columns, fks) = given_catalog();

        let metadata = assemble_metadata(
            &ConnectionId::new("shop"),
            Dialect::Postgres,
            columns,
            &HashMap::new(),
            fks,
            Some(&["ORDERS".to_string()]),
        );

        assert_eq!(metadata.tables.len(), 1);
        assert!(metadata.relationships.is_empty());
    }
}
