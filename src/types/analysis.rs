use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Model,
    Heuristic,
}

/// Business-language reading of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub anomalies: Vec<String>,
    pub no_data: bool,
    pub source: InsightSource,
}

impl Insight {
    #[must_use]
    pub fn no_data() -> Self {
        Self {
            summary: "The query ran successfully but returned no data for this question."
                .to_string(),
            highlights: Vec::new(),
            anomalies: Vec::new(),
            no_data: true,
            source: InsightSource::Heuristic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Area,
    Bar,
    Pie,
    Scatter,
    Metric,
    Table,
}

impl ChartType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Area => "area",
            Self::Bar => "bar",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::Metric => "metric",
            Self::Table => "table",
        }
    }

    #[must_use]
    pub const fn is_time_series(&self) -> bool {
        matches!(self, Self::Line | Self::Area)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    pub title: String,
    pub x_axis: Option<String>,
    #[serde(default)]
    pub y_axis: Vec<String>,
    pub series: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartAlternative {
    pub chart_type: ChartType,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecommendation {
    pub chart_type: ChartType,
    pub config: ChartConfig,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub alternatives: Vec<ChartAlternative>,
}
