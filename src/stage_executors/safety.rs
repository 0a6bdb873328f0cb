//! Read-only gate in front of the executor. A statement that fails here is
//! never sent to a database.

use serde::{Deserialize, Serialize};

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "UPDATE", "INSERT", "ALTER", "CREATE", "GRANT", "REVOKE",
    "MERGE", "INTO", "CALL", "EXEC", "EXECUTE", "COPY", "VACUUM", "ATTACH",
];

const LIMIT_KEYWORDS: &[&str] = &["LIMIT", "TOP", "FETCH"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub valid: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub sanitized_sql: String,
}

impl SafetyVerdict {
    fn rejected(error: impl Into<String>, sanitized_sql: String) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            warnings: Vec::new(),
            sanitized_sql,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Symbol(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    Bracket,
    LineComment,
    BlockComment,
}

/// Removes a surrounding Markdown code fence, with or without a language tag.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.split_once('\n') {
        Some((first_line, body)) if first_line.trim().chars().all(char::is_alphanumeric) => body,
        _ => rest,
    };
    body.trim_end()
        .trim_end_matches("```")
        .trim()
        .to_string()
}

/// Drops comments and splits the rest into words and symbols. Literals and
/// quoted identifiers are kept in the text but never produce tokens.
fn lex(sql: &str) -> (String, Vec<Token>) {
    let mut cleaned = String::with_capacity(sql.len());
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut state = LexState::Normal;
    let mut chars = sql.chars().peekable();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word).to_uppercase()));
        }
    };

    while let Some(ch) = chars.next() {
        match state {
            LexState::Normal => match ch {
                '-' if chars.peek() == Some(&'-') => {
                    flush(&mut word, &mut tokens);
                    chars.next();
                    state = LexState::LineComment;
                    cleaned.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    flush(&mut word, &mut tokens);
                    chars.next();
                    state = LexState::BlockComment;
                    cleaned.push(' ');
                }
                '\'' | '"' | '`' | '[' => {
                    flush(&mut word, &mut tokens);
                    state = match ch {
                        '\'' => LexState::SingleQuote,
                        '"' => LexState::DoubleQuote,
                        '`' => LexState::Backtick,
                        _ => LexState::Bracket,
                    };
                    tokens.push(Token::Word("<QUOTED>".to_string()));
                    cleaned.push(ch);
                }
                c if c.is_alphanumeric() || c == '_' => {
                    word.push(c);
                    cleaned.push(c);
                }
                c => {
                    flush(&mut word, &mut tokens);
                    if !c.is_whitespace() {
                        tokens.push(Token::Symbol(c));
                    }
                    cleaned.push(c);
                }
            },
            LexState::SingleQuote => {
                cleaned.push(ch);
                if ch == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        cleaned.push('\'');
                    } else {
                        state = LexState::Normal;
                    }
                }
            }
            LexState::DoubleQuote | LexState::Backtick | LexState::Bracket => {
                cleaned.push(ch);
                let closing = match state {
                    LexState::DoubleQuote => '"',
                    LexState::Backtick => '`',
                    _ => ']',
                };
                if ch == closing {
                    state = LexState::Normal;
                }
            }
            LexState::LineComment => {
                if ch == '\n' {
                    state = LexState::Normal;
                    cleaned.push('\n');
                }
            }
            LexState::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = LexState::Normal;
                }
            }
        }
    }
    flush(&mut word, &mut tokens);
    (cleaned, tokens)
}

fn has_select_star(tokens: &[Token]) -> bool {
    tokens.windows(2).any(|pair| {
        matches!(
            pair,
            [Token::Word(w), Token::Symbol('*')] if w == "SELECT" || w == "DISTINCT"
        ) || matches!(pair, [Token::Symbol(',' | '.'), Token::Symbol('*')])
    })
}

/// Validates that `sql` is a single read-only SELECT statement.
#[must_use]
pub fn check_sql(sql: &str) -> SafetyVerdict {
    let unfenced = strip_code_fences(sql);
    let (cleaned, tokens) = lex(&unfenced);
    let sanitized = cleaned
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();

    if sanitized.is_empty() {
        return SafetyVerdict::rejected("The generated statement is empty", sanitized);
    }

    let trailing_semicolons = tokens
        .iter()
        .rev()
        .take_while(|token| **token == Token::Symbol(';'))
        .count();
    let body = &tokens[..tokens.len() - trailing_semicolons];
    if body.contains(&Token::Symbol(';')) {
        return SafetyVerdict::rejected("Multiple statements are not allowed", sanitized);
    }

    match body.first() {
        Some(Token::Word(first)) if first == "SELECT" => {}
        _ => {
            return SafetyVerdict::rejected("Only SELECT statements are allowed", sanitized);
        }
    }

    if let Some(keyword) = body.iter().find_map(|token| match token {
        Token::Word(word) if FORBIDDEN_KEYWORDS.contains(&word.as_str()) => Some(word.clone()),
        _ => None,
    }) {
        return SafetyVerdict::rejected(
            format!("Statement contains forbidden keyword {keyword}"),
            sanitized,
        );
    }

    let mut warnings = Vec::new();
    if has_select_star(body) {
        warnings.push("SELECT * returns every column; prefer naming columns".to_string());
    }
    let limited = body.iter().any(
        |token| matches!(token, Token::Word(word) if LIMIT_KEYWORDS.contains(&word.as_str())),
    );
    if !limited {
        warnings.push("No row limit; results will be capped by the executor".to_string());
    }

    SafetyVerdict {
        valid: true,
        error: None,
        warnings,
        sanitized_sql: sanitized,
    }
}
