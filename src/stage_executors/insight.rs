//! Textual reading of a result set. Chart choice lives in `chart`.

use super::text::humanize;
use crate::orchestrator_service::ports::{
    Completion, CompletionPort, CompletionPurpose, CompletionRequest, PromptMessage,
};
use crate::prompts::INSIGHT_PROMPT;
use crate::types::{ExecutionResult, Insight, InsightSource};
use serde_json::{json, Value};
use std::fmt::Write as _;
use tracing::warn;

const ANOMALY_SIGMAS: f64 = 2.0;
const MIN_ROWS_FOR_ANOMALIES: usize = 4;

pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Columns whose non-null cells are all numbers.
pub(crate) fn numeric_columns(result: &ExecutionResult) -> Vec<&str> {
    result
        .columns
        .iter()
        .filter(|column| {
            let values = result.column_values(column);
            let present: Vec<&&Value> = values.iter().filter(|value| !value.is_null()).collect();
            !present.is_empty() && present.iter().all(|value| numeric(value).is_some())
        })
        .map(String::as_str)
        .collect()
}

fn label_of(row_value: Option<&Value>) -> String {
    match row_value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "(blank)".to_string(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MeasureSummary {
    total: f64,
    mean: f64,
    stddev: f64,
    max_index: usize,
    min_index: usize,
}

fn summarize_measure(values: &[f64]) -> Option<MeasureSummary> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    let total: f64 = values.iter().sum();
    let mean = total / count;
    let stddev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count).sqrt();
    let max_index = values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map_or(0, |(index, _)| index);
    let min_index = values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map_or(0, |(index, _)| index);
    Some(MeasureSummary {
        total,
        mean,
        stddev,
        max_index,
        min_index,
    })
}

fn format_number(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Deterministic summary used when the model is unavailable.
#[must_use]
pub fn heuristic_insight(result: &ExecutionResult) -> Insight {
    if result.is_empty() {
        return Insight::no_data();
    }
    let measures = numeric_columns(result);
    let label_column = result
        .columns
        .iter()
        .find(|column| !measures.contains(&column.as_str()));

    let mut highlights = Vec::new();
    let mut anomalies = Vec::new();
    let rows = result.row_count;
    let mut summary = format!(
        "The query returned {rows} row{}.",
        if rows == 1 { "" } else { "s" }
    );

    if let Some(measure) = measures.first() {
        let cells: Vec<(usize, f64)> = result
            .column_values(measure)
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| numeric(value).map(|number| (index, number)))
            .collect();
        let values: Vec<f64> = cells.iter().map(|(_, value)| *value).collect();
        if let Some(stats) = summarize_measure(&values) {
            let name = humanize(measure).to_lowercase();
            if rows == 1 {
                summary = format!("The {name} is {}.", format_number(stats.total));
            } else {
                let _ = write!(
                    summary,
                    " Total {name} is {}, averaging {} per row.",
                    format_number(stats.total),
                    format_number(stats.mean)
                );
            }
            if let Some(label_column) = label_column.filter(|_| rows > 1) {
                let label_at = |position: usize| {
                    let row = cells.get(position).map(|(index, _)| *index);
                    label_of(
                        row.and_then(|index| result.rows.get(index))
                            .and_then(|row| row.get(label_column)),
                    )
                };
                highlights.push(format!(
                    "Highest {name}: {} ({})",
                    label_at(stats.max_index),
                    format_number(values[stats.max_index])
                ));
                highlights.push(format!(
                    "Lowest {name}: {} ({})",
                    label_at(stats.min_index),
                    format_number(values[stats.min_index])
                ));
                if values.len() >= MIN_ROWS_FOR_ANOMALIES && stats.stddev > 0.0 {
                    anomalies.extend(values.iter().enumerate().filter_map(|(position, value)| {
                        ((value - stats.mean).abs() > ANOMALY_SIGMAS * stats.stddev).then(|| {
                            format!(
                                "{} stands out at {}",
                                label_at(position),
                                format_number(*value)
                            )
                        })
                    }));
                }
            }
        }
    }
    if result.truncated {
        highlights.push("Only the first rows are shown; the full result is larger.".to_string());
    }

    Insight {
        summary,
        highlights,
        anomalies,
        no_data: false,
        source: InsightSource::Heuristic,
    }
}

fn build_request(question: &str, result: &ExecutionResult, sample_rows: usize) -> CompletionRequest {
    let sample: Vec<&serde_json::Map<String, Value>> = result.rows.iter().take(sample_rows).collect();
    let payload = json!({
        "question": question,
        "columns": result.columns,
        "row_count": result.row_count,
        "truncated": result.truncated,
        "sample_rows": sample,
    });
    CompletionRequest::new(
        CompletionPurpose::InsightAnalysis,
        vec![
            PromptMessage::system(INSIGHT_PROMPT),
            PromptMessage::user(payload.to_string()),
        ],
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "highlights": {"type": "array", "items": {"type": "string"}},
            "anomalies": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["summary", "highlights", "anomalies"],
        "additionalProperties": false
    }))
}

fn parse_insight(completion: &Completion) -> Option<Insight> {
    let strings = |value: &Value, key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let value = completion.json()?;
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())?
        .to_string();
    Some(Insight {
        summary,
        highlights: strings(&value, "highlights"),
        anomalies: strings(&value, "anomalies"),
        no_data: false,
        source: InsightSource::Model,
    })
}

/// Model-written insight, falling back to the heuristic summary on any
/// port failure or unusable reply. Empty results never reach the model.
pub async fn analyze<C: CompletionPort + Sync + ?Sized>(
    port: &C,
    question: &str,
    result: &ExecutionResult,
    sample_rows: usize,
) -> Insight {
    if result.is_empty() {
        return Insight::no_data();
    }
    match port.complete(build_request(question, result, sample_rows)).await {
        Ok(completion) => parse_insight(&completion).unwrap_or_else(|| {
            warn!("insight reply was not usable; using heuristic summary");
            heuristic_insight(result)
        }),
        Err(err) => {
            warn!(error = %err, "insight completion failed; using heuristic summary");
            heuristic_insight(result)
        }
    }
}
