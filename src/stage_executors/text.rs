//! Small text helpers shared by the deterministic workers.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does", "for", "from",
    "give", "how", "i", "in", "is", "it", "me", "many", "much", "of", "on", "or", "our", "per",
    "please", "show", "tell", "that", "the", "their", "there", "this", "to", "was", "we", "were",
    "what", "when", "where", "which", "who", "with", "list", "get", "find", "all", "my", "you",
];

const MONTH_WORDS: &[&str] = &[
    "january", "jan", "february", "feb", "march", "mar", "april", "apr", "may", "june", "jun",
    "july", "jul", "august", "aug", "september", "sep", "sept", "october", "oct", "november",
    "nov", "december", "dec",
];

const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
    "twelve", "fifteen", "twenty", "fifty", "hundred", "thousand", "million", "dozen",
];

const RELATIVE_TIME_WORDS: &[&str] = &[
    "today", "yesterday", "tomorrow", "last", "this", "next", "previous", "prior", "current",
    "ytd", "mtd", "qtd",
];

/// Lowercased alphanumeric words, stopwords kept.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when `phrase` occurs in `text` as a run of whole words, so `may`
/// does not match `maybe`.
#[must_use]
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let needle = words(phrase);
    if needle.is_empty() {
        return false;
    }
    words(text)
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

/// Tokens that pin a question to concrete values: anything with a digit,
/// month names, number words, relative-time markers and double-quoted
/// literals. Two questions with different literals ask for different data.
#[must_use]
pub fn literal_tokens(text: &str) -> BTreeSet<String> {
    let mut literals: BTreeSet<String> = words(text)
        .into_iter()
        .filter(|word| {
            word.chars().any(|c| c.is_ascii_digit())
                || MONTH_WORDS.contains(&word.as_str())
                || NUMBER_WORDS.contains(&word.as_str())
                || RELATIVE_TIME_WORDS.contains(&word.as_str())
        })
        .collect();
    literals.extend(
        text.split('"')
            .skip(1)
            .step_by(2)
            .map(|quoted| quoted.trim().to_lowercase())
            .filter(|quoted| !quoted.is_empty()),
    );
    literals
}

/// Lowercased alphanumeric words, stopwords removed.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| !word.is_empty() && !STOPWORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Naive English singular form, enough to match `orders` with `order`.
#[must_use]
pub fn singularize(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
    {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Splits an identifier such as `order_items` or `createdAt` into words.
#[must_use]
pub fn identifier_words(identifier: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in identifier.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.extend(ch.to_lowercase());
        } else {
            current.extend(ch.to_lowercase());
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Business-friendly label: `order_total` becomes `Order total`.
#[must_use]
pub fn humanize(identifier: &str) -> String {
    let joined = identifier_words(identifier).join(" ");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Canonical form of an error message for loop detection: lowercase,
/// digits folded to `#`, whitespace collapsed.
#[must_use]
pub fn normalize_error_message(message: &str) -> String {
    message
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_digit() { '#' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace-collapsed, lowercase SQL used to compare two statements.
#[must_use]
pub fn normalize_sql(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True when `needle` occurs in `haystack` as a whole identifier.
#[must_use]
pub fn contains_identifier(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();
    let needle = needle.to_lowercase();
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| word == needle)
}
