use crate::types::FailureKind;

const MISSING_OBJECT_PATTERNS: &[&str] = &[
    "does not exist",
    "unknown column",
    "unknown table",
    "no such column",
    "no such table",
    "invalid column name",
    "invalid object name",
    "undefined column",
    "undefined table",
    "not found in",
];

const SYNTAX_PATTERNS: &[&str] = &[
    "syntax error",
    "syntax",
    "parse error",
    "unexpected token",
    "must appear in the group by",
    "aggregate functions are not allowed",
    "operator does not exist",
    "invalid input syntax",
    "ambiguous",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "access denied",
    "not authorized",
    "insufficient privilege",
    "read-only transaction",
];

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "could not connect",
    "broken pipe",
    "pool timed out",
    "server closed the connection",
    "too many connections",
];

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "canceling statement"];

/// Best-effort classification of an engine error message.
#[must_use]
pub fn classify_sql_error(message: &str) -> FailureKind {
    let lowered = message.to_ascii_lowercase();
    let any = |patterns: &[&str]| patterns.iter().any(|pattern| lowered.contains(pattern));

    if any(PERMISSION_PATTERNS) {
        FailureKind::PermissionDenied
    } else if any(CONNECTION_PATTERNS) {
        FailureKind::Connection
    } else if any(TIMEOUT_PATTERNS) {
        FailureKind::Timeout
    } else if any(MISSING_OBJECT_PATTERNS) {
        FailureKind::MissingObject
    } else if any(SYNTAX_PATTERNS) {
        FailureKind::Syntax
    } else {
        FailureKind::Unknown
    }
}

/// Redact sensitive tokens (API keys, passwords, credentials in URLs).
#[must_use]
pub fn redact_sensitive(message: &str) -> String {
    message
        .split_whitespace()
        .map(redact_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn redact_token(token: &str) -> String {
    if let Some(redacted) = redact_url_credentials(token) {
        return redacted;
    }
    token.split_once('=').map_or_else(
        || token.to_string(),
        |(key, _)| {
            let normalized = key.to_ascii_lowercase();
            if ["token", "password", "secret", "api_key", "database_url"]
                .iter()
                .any(|sensitive| normalized.contains(sensitive))
            {
                format!("{key}=<redacted>")
            } else {
                token.to_string()
            }
        },
    )
}

fn redact_url_credentials(token: &str) -> Option<String> {
    let (scheme, rest) = token.split_once("://")?;
    let (credentials, host) = rest.split_once('@')?;
    let user = credentials
        .split_once(':')
        .map_or(credentials, |(user, _)| user);
    Some(format!("{scheme}://{user}:<redacted>@{host}"))
}
