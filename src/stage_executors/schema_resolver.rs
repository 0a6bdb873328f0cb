//! Narrows the connection schema to the tables a question is about and
//! flags what cannot be settled without asking.

use super::text::{contains_phrase, humanize, identifier_words, singularize, tokenize};
use crate::types::{
    Ambiguity, AmbiguityKind, ColumnInfo, ColumnMetadata, Relationship, SchemaInfo,
    SchemaMetadata, SemanticType, Skill, SkillContext, TableInfo, TableMetadata,
};
use itertools::Itertools;
use std::collections::BTreeSet;

const MIN_DIRECT_SCORE: f64 = 1.0;
const RELATED_RELEVANCE: f64 = 0.3;

/// Business words mapped to column-name fragments that usually carry them.
const MEASURE_SYNONYMS: &[(&str, &[&str])] = &[
    ("sale", &["amount", "total", "revenue", "price", "sale"]),
    ("revenue", &["amount", "total", "revenue", "price"]),
    ("income", &["amount", "revenue", "income"]),
    ("spend", &["amount", "cost", "spend", "total"]),
    ("spending", &["amount", "cost", "spend", "total"]),
    ("cost", &["cost", "price", "amount"]),
    ("price", &["price", "amount"]),
    ("profit", &["profit", "margin"]),
    ("volume", &["quantity", "qty", "units"]),
    ("unit", &["quantity", "qty", "units"]),
];

/// Business words mapped to table-name fragments.
const ENTITY_SYNONYMS: &[(&str, &[&str])] = &[
    ("sale", &["order", "sale", "invoice", "transaction", "payment"]),
    ("revenue", &["order", "sale", "invoice", "payment"]),
    ("purchase", &["order", "purchase", "transaction"]),
    ("client", &["customer", "client", "account"]),
    ("customer", &["customer", "client"]),
    ("buyer", &["customer", "client"]),
    ("product", &["product", "item", "sku"]),
    ("item", &["product", "item"]),
    ("employee", &["employee", "staff"]),
    ("staff", &["employee", "staff"]),
];

const TIME_WORDS: &[&str] = &[
    "day", "daily", "week", "weekly", "month", "monthly", "quarter", "quarterly", "year",
    "yearly", "trend", "date", "time",
];

const VAGUE_TIME_PHRASES: &[&str] = &[
    "recent",
    "recently",
    "lately",
    "a while",
    "some time",
    "last period",
    "this period",
];

const EXPLICIT_TIME_PHRASES: &[&str] = &[
    "today",
    "yesterday",
    "this week",
    "this month",
    "this quarter",
    "this year",
    "last week",
    "last month",
    "last quarter",
    "last year",
    "all time",
    "days",
    "weeks",
    "months",
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const RANKING_WORDS: &[&str] = &[
    "top", "best", "worst", "biggest", "largest", "most", "least", "highest", "lowest",
];

const CATEGORY_HINTS: &[&str] = &[
    "status", "type", "category", "region", "country", "city", "state", "segment", "channel",
    "name", "kind", "group", "department", "gender", "tier", "brand", "label", "title",
];

const CURRENCY_HINTS: &[&str] = &[
    "amount", "price", "cost", "revenue", "total", "sales", "fee", "spend", "balance", "salary",
    "income", "profit", "margin",
];

const NUMERIC_TYPES: &[&str] = &[
    "int", "numeric", "decimal", "float", "double", "real", "money", "number",
];

/// Resolver output: the narrowed schema plus the domain pack that applies.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaResolution {
    pub schema: SchemaInfo,
    pub skill_context: Option<SkillContext>,
}

/// Infers what a column means from its name and declared type.
#[must_use]
pub fn infer_semantic_type(column: &ColumnMetadata) -> SemanticType {
    let name = column.name.to_lowercase();
    let data_type = column.data_type.to_lowercase();
    let words = identifier_words(&name);
    let has_word = |hints: &[&str]| words.iter().any(|word| hints.contains(&word.as_str()));

    if column.is_primary_key || name == "id" || name.ends_with("_id") || data_type == "uuid" {
        return SemanticType::Identifier;
    }
    if data_type.contains("date")
        || data_type.contains("time")
        || name == "date"
        || name.ends_with("_at")
        || name.ends_with("_date")
        || name.ends_with("_on")
    {
        return SemanticType::Datetime;
    }
    if data_type.contains("bool") {
        return SemanticType::Category;
    }
    if NUMERIC_TYPES.iter().any(|numeric| data_type.contains(numeric)) {
        if data_type.contains("money") || has_word(CURRENCY_HINTS) {
            return SemanticType::Currency;
        }
        return SemanticType::Quantity;
    }
    if has_word(CATEGORY_HINTS) {
        return SemanticType::Category;
    }
    SemanticType::General
}

fn column_info(column: &ColumnMetadata) -> ColumnInfo {
    let semantic_type = infer_semantic_type(column);
    ColumnInfo {
        name: column.name.clone(),
        data_type: column.data_type.clone(),
        semantic_type,
        aggregatable: semantic_type.is_aggregatable(),
        groupable: semantic_type.is_groupable(),
    }
}

fn synonyms(
    table: &'static [(&'static str, &'static [&'static str])],
    token: &str,
) -> &'static [&'static str] {
    table
        .iter()
        .find(|(word, _)| *word == token)
        .map_or(&[], |(_, fragments)| *fragments)
}

fn singular_words(identifier: &str) -> Vec<String> {
    identifier_words(identifier)
        .iter()
        .map(|word| singularize(word))
        .collect()
}

/// Picks the skill with the most keyword hits; name breaks ties.
#[must_use]
pub fn select_skill<'a>(question: &str, skills: &'a [Skill]) -> Option<&'a Skill> {
    skills
        .iter()
        .map(|skill| (skill.keyword_hits(question), skill))
        .filter(|(hits, _)| *hits > 0)
        .sorted_by(|(a_hits, a), (b_hits, b)| b_hits.cmp(a_hits).then_with(|| a.name.cmp(&b.name)))
        .map(|(_, skill)| skill)
        .next()
}

fn score_table(table: &TableMetadata, tokens: &[String], skill: Option<&Skill>) -> f64 {
    let table_words = singular_words(&table.name);
    let column_words: Vec<(Vec<String>, SemanticType)> = table
        .columns
        .iter()
        .map(|column| (singular_words(&column.name), infer_semantic_type(column)))
        .collect();

    let mut score = 0.0;
    for token in tokens {
        if table_words.contains(token) {
            score += 3.0;
        } else if synonyms(ENTITY_SYNONYMS, token)
            .iter()
            .any(|fragment| table_words.iter().any(|word| word.as_str() == *fragment))
        {
            score += 2.0;
        }

        if column_words
            .iter()
            .any(|(words, kind)| *kind != SemanticType::Identifier && words.contains(token))
        {
            score += 1.0;
        }

        let measures = synonyms(MEASURE_SYNONYMS, token);
        if column_words.iter().any(|(words, kind)| {
            kind.is_aggregatable() && words.iter().any(|word| measures.contains(&word.as_str()))
        }) {
            score += 1.5;
        }
    }

    if skill.is_some_and(|skill| skill.matches_table(&table.name)) {
        score += 2.0;
    }

    let wants_time = tokens.iter().any(|token| TIME_WORDS.contains(&token.as_str()));
    if score > 0.0
        && wants_time
        && column_words
            .iter()
            .any(|(_, kind)| *kind == SemanticType::Datetime)
    {
        score += 0.5;
    }
    score
}

fn has_explicit_time(question: &str) -> bool {
    let lowered = question.to_lowercase();
    let has_year = lowered
        .split(|c: char| !c.is_ascii_digit())
        .any(|digits| digits.len() == 4 && (digits.starts_with("19") || digits.starts_with("20")));
    has_year
        || EXPLICIT_TIME_PHRASES
            .iter()
            .any(|phrase| contains_phrase(&lowered, phrase))
}

fn vague_time_phrase(question: &str) -> Option<&'static str> {
    VAGUE_TIME_PHRASES
        .iter()
        .copied()
        .find(|phrase| contains_phrase(question, phrase))
}

fn term_ambiguity(tokens: &[String], direct: &[&TableMetadata]) -> Option<Ambiguity> {
    let named_tables: BTreeSet<&str> = direct
        .iter()
        .filter(|table| {
            singular_words(&table.name)
                .iter()
                .any(|word| tokens.contains(word))
        })
        .map(|table| table.name.as_str())
        .collect();

    tokens.iter().find_map(|token| {
        let owners: Vec<(&str, &str)> = direct
            .iter()
            .filter(|table| !named_tables.contains(table.name.as_str()))
            .filter_map(|table| {
                table
                    .columns
                    .iter()
                    .find(|column| {
                        singularize(&column.name.to_lowercase()) == *token
                            && infer_semantic_type(column) != SemanticType::Identifier
                    })
                    .map(|column| (table.name.as_str(), column.name.as_str()))
            })
            .collect();
        (owners.len() >= 2 && named_tables.is_empty()).then(|| Ambiguity::AmbiguousTerm {
            term: token.clone(),
            candidates: owners
                .iter()
                .map(|(table, column)| {
                    format!("{} of {}", humanize(column), humanize(table).to_lowercase())
                })
                .collect(),
        })
    })
}

fn aggregation_ambiguity(tokens: &[String], direct: &[&TableMetadata]) -> Option<Ambiguity> {
    if !tokens.iter().any(|token| RANKING_WORDS.contains(&token.as_str())) {
        return None;
    }
    let measures: Vec<&ColumnMetadata> = direct
        .iter()
        .flat_map(|table| table.columns.iter())
        .filter(|column| infer_semantic_type(column).is_aggregatable())
        .unique_by(|column| column.name.to_lowercase())
        .collect();
    if measures.len() < 2 {
        return None;
    }
    let named = measures.iter().any(|column| {
        let words = singular_words(&column.name);
        tokens.iter().any(|token| {
            words.contains(token)
                || synonyms(MEASURE_SYNONYMS, token)
                    .iter()
                    .any(|fragment| words.iter().any(|word| word.as_str() == *fragment))
        })
    });
    (!named).then(|| Ambiguity::AmbiguousAggregation {
        measures: measures.iter().map(|column| humanize(&column.name)).collect(),
    })
}

/// Scores every table against the question, keeps the relevant ones plus
/// their direct neighbours, and records unresolved ambiguity.
///
/// Kinds listed in `settled` were already clarified and are not raised again.
#[must_use]
pub fn resolve_schema(
    question: &str,
    metadata: &SchemaMetadata,
    skills: &[Skill],
    settled: &[AmbiguityKind],
) -> SchemaResolution {
    let tokens: Vec<String> = tokenize(question)
        .iter()
        .map(|token| singularize(token))
        .collect();
    let skill = select_skill(question, skills);

    let scored: Vec<(&TableMetadata, f64)> = metadata
        .tables
        .iter()
        .map(|table| (table, score_table(table, &tokens, skill)))
        .filter(|(_, score)| *score >= MIN_DIRECT_SCORE)
        .sorted_by(|(a, a_score), (b, b_score)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| a.name.cmp(&b.name))
        })
        .collect();
    let direct: Vec<&TableMetadata> = scored.iter().map(|(table, _)| *table).collect();
    let top_score = scored.first().map_or(1.0, |(_, score)| *score);

    let mut tables: Vec<TableInfo> = scored
        .iter()
        .map(|(table, score)| TableInfo {
            name: table.name.clone(),
            columns: table.columns.iter().map(column_info).collect(),
            relevance: score / top_score,
            related_only: false,
        })
        .collect();

    let related: BTreeSet<&str> = direct
        .iter()
        .flat_map(|table| {
            metadata
                .relationships
                .iter()
                .filter_map(move |link| link.other_side(&table.name))
        })
        .filter(|name| !direct.iter().any(|table| table.name == *name))
        .collect();
    tables.extend(
        metadata
            .tables
            .iter()
            .filter(|table| related.contains(table.name.as_str()))
            .map(|table| TableInfo {
                name: table.name.clone(),
                columns: table.columns.iter().map(column_info).collect(),
                relevance: RELATED_RELEVANCE,
                related_only: true,
            }),
    );

    let kept: BTreeSet<&str> = tables.iter().map(|table| table.name.as_str()).collect();
    let relationships: Vec<Relationship> = metadata
        .relationships
        .iter()
        .filter(|link| {
            kept.contains(link.from_table.as_str()) && kept.contains(link.to_table.as_str())
        })
        .cloned()
        .collect();

    let is_settled = |kind: AmbiguityKind| settled.contains(&kind);
    let mut ambiguities = Vec::new();
    if direct.is_empty() {
        ambiguities.push(Ambiguity::NoMatchingTable);
    } else {
        if !is_settled(AmbiguityKind::Term) {
            ambiguities.extend(term_ambiguity(&tokens, &direct));
        }
        let has_datetime = tables
            .iter()
            .flat_map(|table| table.columns.iter())
            .any(|column| column.semantic_type == SemanticType::Datetime);
        if !is_settled(AmbiguityKind::TimeRange) && has_datetime && !has_explicit_time(question) {
            if let Some(phrase) = vague_time_phrase(question) {
                ambiguities.push(Ambiguity::UnresolvedTimeRange {
                    phrase: phrase.to_string(),
                });
            }
        }
        if !is_settled(AmbiguityKind::Aggregation) {
            ambiguities.extend(aggregation_ambiguity(&tokens, &direct));
        }
    }

    SchemaResolution {
        schema: SchemaInfo {
            connection_id: metadata.connection_id.clone(),
            dialect: metadata.dialect,
            tables,
            relationships,
            ambiguities,
        },
        skill_context: skill.map(SkillContext::from_skill),
    }
}
