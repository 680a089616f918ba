//! Query intent: the typed interpretation of one question
//!
//! The extractor builds a `QueryIntent` from model output; everything after
//! it (compiler, synthesizer) works only from this structure and never
//! re-reads the free text.

pub mod extractor;
pub mod resolver;

pub use extractor::IntentExtractor;
pub use resolver::{resolve_relative_window, EntityResolver};

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the question asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Compare,
    Trend,
    Extremum,
    Correlate,
    Lookup,
    Aggregate,
}

impl IntentType {
    pub const ALL: [IntentType; 6] = [
        IntentType::Compare,
        IntentType::Trend,
        IntentType::Extremum,
        IntentType::Correlate,
        IntentType::Lookup,
        IntentType::Aggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Compare => "compare",
            IntentType::Trend => "trend",
            IntentType::Extremum => "extremum",
            IntentType::Correlate => "correlate",
            IntentType::Lookup => "lookup",
            IntentType::Aggregate => "aggregate",
        }
    }

    /// Exact (case-insensitive) match against the closed set; no synonyms
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the ranking an extremum question wants
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Highest,
    Lowest,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "highest" | "max" | "maximum" | "top" | "most" => Some(Direction::Highest),
            "lowest" | "min" | "minimum" | "bottom" | "least" => Some(Direction::Lowest),
            _ => None,
        }
    }

    pub fn sql_function(&self) -> &'static str {
        match self {
            Direction::Highest => "MAX",
            Direction::Lowest => "MIN",
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            Direction::Highest => "highest",
            Direction::Lowest => "lowest",
        }
    }
}

/// SQL aggregate applied to a metric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFn {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sum" | "total" => Some(AggregateFn::Sum),
            "avg" | "average" | "mean" => Some(AggregateFn::Avg),
            "min" | "minimum" => Some(AggregateFn::Min),
            "max" | "maximum" => Some(AggregateFn::Max),
            "count" => Some(AggregateFn::Count),
            _ => None,
        }
    }

    pub fn sql_function(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Count => "COUNT",
        }
    }

    /// Wording used in answer text ("total Production")
    pub fn word(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "total",
            AggregateFn::Avg => "average",
            AggregateFn::Min => "minimum",
            AggregateFn::Max => "maximum",
            AggregateFn::Count => "number of records of",
        }
    }
}

/// Absolute year window; relative phrases are resolved before this is built
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalScope {
    pub start_year: i64,
    pub end_year: i64,

    /// The relative phrase this window was resolved from, if any
    pub relative_window: Option<String>,
}

impl TemporalScope {
    pub fn years(start_year: i64, end_year: i64) -> Self {
        Self {
            start_year: start_year.min(end_year),
            end_year: start_year.max(end_year),
            relative_window: None,
        }
    }

    pub fn is_single_year(&self) -> bool {
        self.start_year == self.end_year
    }

    /// Number of years covered, inclusive
    pub fn span(&self) -> i64 {
        self.end_year.saturating_sub(self.start_year).saturating_add(1)
    }
}

impl fmt::Display for TemporalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_year() {
            write!(f, "{}", self.start_year)
        } else {
            write!(f, "{}-{}", self.start_year, self.end_year)
        }
    }
}

/// Structured interpretation of a natural-language question
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub intent_type: IntentType,

    /// Entity values (e.g. states), canonical spelling from the dataset
    pub entities: Vec<String>,

    /// Category filter values (e.g. crops), canonical spelling
    pub categories: Vec<String>,

    /// Requested measures, in the order they were asked for
    pub metrics: Vec<String>,

    pub temporal_scope: Option<TemporalScope>,

    /// Extremum direction (highest when absent)
    pub direction: Option<Direction>,

    /// Requested aggregate for aggregate/lookup questions
    pub aggregation: Option<AggregateFn>,

    /// Extremum per year instead of over the whole window
    pub per_period: bool,

    pub raw_question: String,
}

impl QueryIntent {
    pub fn new(intent_type: IntentType, raw_question: impl Into<String>) -> Self {
        Self {
            intent_type,
            entities: Vec::new(),
            categories: Vec::new(),
            metrics: Vec::new(),
            temporal_scope: None,
            direction: None,
            aggregation: None,
            per_period: false,
            raw_question: raw_question.into(),
        }
    }

    pub fn with_entities<S: Into<String>>(mut self, entities: impl IntoIterator<Item = S>) -> Self {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_categories<S: Into<String>>(mut self, categories: impl IntoIterator<Item = S>) -> Self {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics<S: Into<String>>(mut self, metrics: impl IntoIterator<Item = S>) -> Self {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_years(mut self, start_year: i64, end_year: i64) -> Self {
        self.temporal_scope = Some(TemporalScope::years(start_year, end_year));
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregateFn) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn per_period(mut self) -> Self {
        self.per_period = true;
        self
    }

    /// One-line summary for trace entries
    pub fn summary(&self) -> String {
        format!(
            "intent={} entities={:?} categories={:?} metrics={:?} years={}",
            self.intent_type,
            self.entities,
            self.categories,
            self.metrics,
            self.temporal_scope
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string())
        )
    }
}
