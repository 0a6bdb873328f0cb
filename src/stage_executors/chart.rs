use super::insight::{numeric, numeric_columns};
use super::text::{humanize, identifier_words};
use crate::types::{
    ChartAlternative, ChartConfig, ChartRecommendation, ChartType, ExecutionResult, SchemaInfo,
    SemanticType,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeSet;

const PIE_MAX_SLICES: usize = 8;
const TIME_NAME_HINTS: &[&str] = &[
    "date", "day", "week", "month", "quarter", "year", "period", "time", "at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Time,
    Measure,
    Category,
    Identifier,
    Other,
}

fn looks_like_date(value: &Value) -> bool {
    let Value::String(text) = value else {
        return false;
    };
    let text = text.trim();
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").is_ok()
}

fn role_of(column: &str, result: &ExecutionResult, schema: Option<&SchemaInfo>, measures: &[&str]) -> Role {
    if let Some(info) = schema.and_then(|schema| schema.find_column(column)) {
        match info.semantic_type {
            SemanticType::Datetime => return Role::Time,
            SemanticType::Identifier => return Role::Identifier,
            SemanticType::Currency | SemanticType::Quantity => return Role::Measure,
            SemanticType::Category => return Role::Category,
            SemanticType::General => {}
        }
    }

    let values = result.column_values(column);
    let present: Vec<&Value> = values.into_iter().filter(|value| !value.is_null()).collect();
    let lowered = column.to_lowercase();
    if lowered == "id" || lowered.ends_with("_id") {
        return Role::Identifier;
    }
    if !present.is_empty() && present.iter().all(|value| looks_like_date(value)) {
        return Role::Time;
    }
    let time_named = identifier_words(column)
        .iter()
        .any(|word| TIME_NAME_HINTS.contains(&word.as_str()));
    if measures.contains(&column) {
        let integral_years = present
            .iter()
            .filter_map(|value| numeric(value))
            .all(|number| number.fract().abs() < f64::EPSILON && (1900.0..=2100.0).contains(&number));
        return if time_named && integral_years {
            Role::Time
        } else {
            Role::Measure
        };
    }
    if present.iter().all(|value| value.is_string() || value.is_boolean()) {
        return if time_named { Role::Time } else { Role::Category };
    }
    Role::Other
}

fn distinct_count(result: &ExecutionResult, column: &str) -> usize {
    result
        .column_values(column)
        .iter()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .len()
}

fn title_for(measures: &[&str], by: Option<&str>) -> String {
    let measure = measures
        .first()
        .map_or_else(|| "Result".to_string(), |name| humanize(name));
    by.map_or_else(
        || measure.clone(),
        |by| format!("{measure} by {}", humanize(by).to_lowercase()),
    )
}

fn alternative(chart_type: ChartType, confidence: f64, reason: &str) -> ChartAlternative {
    ChartAlternative {
        chart_type,
        confidence,
        reason: reason.to_string(),
    }
}

fn table_recommendation(result: &ExecutionResult, reason: &str) -> ChartRecommendation {
    ChartRecommendation {
        chart_type: ChartType::Table,
        config: ChartConfig {
            title: "Query results".to_string(),
            x_axis: None,
            y_axis: result.columns.clone(),
            series: None,
        },
        confidence: 0.6,
        reason: reason.to_string(),
        alternatives: Vec::new(),
    }
}

/// Picks a chart for the result. Time against a measure wins, then a
/// category against a measure, then a single figure, then a plain table.
#[must_use]
pub fn recommend_chart(result: &ExecutionResult, schema: Option<&SchemaInfo>) -> ChartRecommendation {
    if result.rows.is_empty() {
        return table_recommendation(result, "There is no data to plot");
    }
    let numeric_cols = numeric_columns(result);
    let roles: Vec<(&str, Role)> = result
        .columns
        .iter()
        .map(|column| (column.as_str(), role_of(column, result, schema, &numeric_cols)))
        .collect();
    let pick = |wanted: Role| -> Vec<&str> {
        roles
            .iter()
            .filter(|(_, role)| *role == wanted)
            .map(|(column, _)| *column)
            .collect()
    };
    let times = pick(Role::Time);
    let measures = pick(Role::Measure);
    let categories = pick(Role::Category);

    if let (Some(time), false) = (times.first(), measures.is_empty()) {
        return ChartRecommendation {
            chart_type: ChartType::Line,
            config: ChartConfig {
                title: title_for(&measures, Some(*time)),
                x_axis: Some((*time).to_string()),
                y_axis: measures.iter().map(ToString::to_string).collect(),
                series: categories.first().map(ToString::to_string),
            },
            confidence: 0.9,
            reason: "A date column paired with a numeric measure reads best as a trend".to_string(),
            alternatives: vec![
                alternative(ChartType::Area, 0.7, "Emphasises cumulative volume over time"),
                alternative(ChartType::Bar, 0.5, "Compares individual periods"),
                alternative(ChartType::Table, 0.3, "Exact values"),
            ],
        };
    }

    if let (Some(category), false) = (categories.first(), measures.is_empty()) {
        let slices = distinct_count(result, category);
        let non_negative = measures.len() == 1
            && result
                .column_values(measures[0])
                .into_iter()
                .filter_map(numeric)
                .all(|value| value >= 0.0);
        let mut alternatives = Vec::new();
        if slices <= PIE_MAX_SLICES && non_negative {
            alternatives.push(alternative(ChartType::Pie, 0.65, "Few groups sharing one total"));
        }
        alternatives.push(alternative(ChartType::Table, 0.3, "Exact values"));
        return ChartRecommendation {
            chart_type: ChartType::Bar,
            config: ChartConfig {
                title: title_for(&measures, Some(*category)),
                x_axis: Some((*category).to_string()),
                y_axis: measures.iter().map(ToString::to_string).collect(),
                series: categories.get(1).map(ToString::to_string),
            },
            confidence: 0.85,
            reason: "A grouping column paired with a numeric measure compares well as bars"
                .to_string(),
            alternatives,
        };
    }

    if result.rows.len() == 1 && measures.len() == 1 {
        return ChartRecommendation {
            chart_type: ChartType::Metric,
            config: ChartConfig {
                title: title_for(&measures, None),
                x_axis: None,
                y_axis: vec![measures[0].to_string()],
                series: None,
            },
            confidence: 0.9,
            reason: "A single figure is clearest on its own".to_string(),
            alternatives: vec![alternative(ChartType::Table, 0.4, "Exact value")],
        };
    }

    if measures.len() >= 2 && result.rows.len() > 2 {
        return ChartRecommendation {
            chart_type: ChartType::Scatter,
            config: ChartConfig {
                title: format!("{} against {}", humanize(measures[1]), humanize(measures[0]).to_lowercase()),
                x_axis: Some(measures[0].to_string()),
                y_axis: vec![measures[1].to_string()],
                series: None,
            },
            confidence: 0.6,
            reason: "Two numeric measures without a grouping suggest a correlation view"
                .to_string(),
            alternatives: vec![alternative(ChartType::Table, 0.5, "Exact values")],
        };
    }

    table_recommendation(result, "No date or grouping column pairs with a numeric measure")
}
