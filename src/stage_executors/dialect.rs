use crate::types::Dialect;

/// Syntax facts the generator must respect for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectRules {
    pub dialect: Dialect,
    pub quote_open: char,
    pub quote_close: char,
    pub row_limit: &'static str,
    pub concat: &'static str,
    pub month_bucket: &'static str,
    pub supports_full_outer_join: bool,
    pub supports_ilike: bool,
}

#[must_use]
pub const fn rules_for(dialect: Dialect) -> DialectRules {
    match dialect {
        Dialect::Postgres => DialectRules {
            dialect,
            quote_open: '"',
            quote_close: '"',
            row_limit: "LIMIT n",
            concat: "a || b",
            month_bucket: "date_trunc('month', col)",
            supports_full_outer_join: true,
            supports_ilike: true,
        },
        Dialect::MySql => DialectRules {
            dialect,
            quote_open: '`',
            quote_close: '`',
            row_limit: "LIMIT n",
            concat: "CONCAT(a, b)",
            month_bucket: "DATE_FORMAT(col, '%Y-%m-01')",
            supports_full_outer_join: false,
            supports_ilike: false,
        },
        Dialect::SqlServer => DialectRules {
            dialect,
            quote_open: '[',
            quote_close: ']',
            row_limit: "SELECT TOP n",
            concat: "a + b",
            month_bucket: "DATEFROMPARTS(YEAR(col), MONTH(col), 1)",
            supports_full_outer_join: true,
            supports_ilike: false,
        },
        Dialect::Sqlite => DialectRules {
            dialect,
            quote_open: '"',
            quote_close: '"',
            row_limit: "LIMIT n",
            concat: "a || b",
            month_bucket: "strftime('%Y-%m', col)",
            supports_full_outer_join: false,
            supports_ilike: false,
        },
        Dialect::Generic => DialectRules {
            dialect,
            quote_open: '"',
            quote_close: '"',
            row_limit: "FETCH FIRST n ROWS ONLY",
            concat: "a || b",
            month_bucket: "EXTRACT(YEAR FROM col), EXTRACT(MONTH FROM col)",
            supports_full_outer_join: true,
            supports_ilike: false,
        },
    }
}

impl DialectRules {
    #[must_use]
    pub fn quote(&self, identifier: &str) -> String {
        format!("{}{identifier}{}", self.quote_open, self.quote_close)
    }

    /// Prompt section listing the rules in plain sentences.
    #[must_use]
    pub fn prompt_section(&self) -> String {
        let mut lines = vec![
            format!("Target SQL dialect: {}.", self.dialect),
            format!(
                "Quote identifiers that need quoting as {}.",
                self.quote("name")
            ),
            format!("Limit rows with `{}`.", self.row_limit),
            format!("Concatenate strings with `{}`.", self.concat),
            format!("Bucket dates by month with `{}`.", self.month_bucket),
        ];
        if !self.supports_full_outer_join {
            lines.push("FULL OUTER JOIN is not supported; emulate it with UNION.".to_string());
        }
        if self.supports_ilike {
            lines.push("Use ILIKE for case-insensitive matching.".to_string());
        } else {
            lines.push("Use LOWER(col) LIKE LOWER(pattern) for case-insensitive matching.".to_string());
        }
        lines.join("\n")
    }
}
