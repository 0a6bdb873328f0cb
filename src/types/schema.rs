use serde::{Deserialize, Serialize};
use std::fmt;

use super::ConnectionId;

/// SQL dialect of a target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    MySql,
    SqlServer,
    Sqlite,
    #[default]
    Generic,
}

impl Dialect {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::SqlServer => "sqlserver",
            Self::Sqlite => "sqlite",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Dialect {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlserver" | "mssql" | "tsql" => Ok(Self::SqlServer),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "generic" | "ansi" => Ok(Self::Generic),
            other => Err(format!("Unknown dialect: {other}")),
        }
    }
}

/// Raw column description as reported by the metadata port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Foreign-key style link between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl Relationship {
    #[must_use]
    pub fn touches(&self, table: &str) -> bool {
        self.from_table == table || self.to_table == table
    }

    #[must_use]
    pub fn other_side(&self, table: &str) -> Option<&str> {
        if self.from_table == table {
            Some(&self.to_table)
        } else if self.to_table == table {
            Some(&self.from_table)
        } else {
            None
        }
    }
}

/// Everything the metadata port knows about one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub connection_id: ConnectionId,
    pub dialect: Dialect,
    pub tables: Vec<TableMetadata>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Datetime,
    Currency,
    Quantity,
    Identifier,
    Category,
    General,
}

impl SemanticType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Datetime => "datetime",
            Self::Currency => "currency",
            Self::Quantity => "quantity",
            Self::Identifier => "identifier",
            Self::Category => "category",
            Self::General => "general",
        }
    }

    #[must_use]
    pub const fn is_aggregatable(&self) -> bool {
        matches!(self, Self::Currency | Self::Quantity)
    }

    #[must_use]
    pub const fn is_groupable(&self) -> bool {
        matches!(self, Self::Datetime | Self::Category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub semantic_type: SemanticType,
    pub aggregatable: bool,
    pub groupable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub relevance: f64,
    /// Pulled in through a relationship rather than matched directly.
    #[serde(default)]
    pub related_only: bool,
}

/// Something the resolver could not settle on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ambiguity {
    NoMatchingTable,
    AmbiguousTerm {
        term: String,
        candidates: Vec<String>,
    },
    UnresolvedTimeRange {
        phrase: String,
    },
    AmbiguousAggregation {
        measures: Vec<String>,
    },
    Interpretation {
        description: String,
    },
}

impl Ambiguity {
    #[must_use]
    pub const fn kind(&self) -> AmbiguityKind {
        match self {
            Self::NoMatchingTable => AmbiguityKind::Subject,
            Self::AmbiguousTerm { .. } => AmbiguityKind::Term,
            Self::UnresolvedTimeRange { .. } => AmbiguityKind::TimeRange,
            Self::AmbiguousAggregation { .. } => AmbiguityKind::Aggregation,
            Self::Interpretation { .. } => AmbiguityKind::Interpretation,
        }
    }
}

/// Ambiguity family, also the stable id of the matching clarification question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityKind {
    Subject,
    Term,
    TimeRange,
    Aggregation,
    Interpretation,
}

impl AmbiguityKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Term => "term",
            Self::TimeRange => "time_range",
            Self::Aggregation => "metric",
            Self::Interpretation => "interpretation",
        }
    }

    #[must_use]
    pub fn from_question_id(id: &str) -> Option<Self> {
        [
            Self::Subject,
            Self::Term,
            Self::TimeRange,
            Self::Aggregation,
            Self::Interpretation,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == id)
    }
}

/// Resolver output: only the relevant slice of the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub connection_id: ConnectionId,
    pub dialect: Dialect,
    pub tables: Vec<TableInfo>,
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub ambiguities: Vec<Ambiguity>,
}

impl SchemaInfo {
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        !self.ambiguities.is_empty()
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|table| table.name.as_str()).collect()
    }

    /// Every `table.column` and bare column name known to this schema slice.
    #[must_use]
    pub fn known_identifiers(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|table| {
                std::iter::once(table.name.clone()).chain(
                    table
                        .columns
                        .iter()
                        .map(|column| column.name.clone()),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.tables
            .iter()
            .flat_map(|table| table.columns.iter())
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }
}
