//! Answer synthesis: query results -> cited, checkable answer
//!
//! Synthesis is split in two passes:
//! - a deterministic skeleton computed from the rows (totals, rankings,
//!   changes, correlations) plus a rule-based chart choice and citations
//! - one language-model pass that turns the skeleton into prose, accepted
//!   only if every number it writes is traceable to the skeleton
//!
//! When the second pass fails the skeleton alone is the answer.

pub mod consistency;
mod shape;
pub mod skeleton;
pub mod synthesizer;
pub mod visualization;

pub use consistency::{extract_numbers, untraceable_number};
pub use skeleton::{format_number, Skeleton};
pub use synthesizer::AnswerSynthesizer;
pub use visualization::choose_visualization;

use crate::error::{Stage, SynthesisDegraded};
use crate::execution::QueryResult;
use crate::schema::SchemaMetadata;
use serde::Serialize;
use uuid::Uuid;

/// Provenance of one successful result
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Citation {
    pub table: String,

    /// Source file, or the table name when no source is configured
    pub file: String,
    pub url: Option<String>,
    pub rows_retrieved: usize,
    pub plan_id: String,
}

/// One citation per successful result, in result order
pub fn build_citations(results: &[QueryResult], schema: &SchemaMetadata) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for result in results.iter().filter(|r| r.is_success()) {
        let seen = citations
            .iter()
            .any(|c| c.table == result.source_table && c.plan_id == result.plan_id);
        if seen {
            continue;
        }
        let source = schema
            .table(&result.source_table)
            .and_then(|t| t.source.as_ref());
        citations.push(Citation {
            table: result.source_table.clone(),
            file: source.map_or_else(|| result.source_table.clone(), |s| s.file.clone()),
            url: source.map(|s| s.url.clone()),
            rows_retrieved: result.row_count,
            plan_id: result.plan_id.clone(),
        });
    }
    citations
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    None,
}

/// Chart suggestion over one result set
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VisualizationSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,

    /// Index into the bundle's results
    pub result_index: usize,

    #[serde(rename = "x")]
    pub x_field: String,

    #[serde(rename = "y")]
    pub y_field: String,

    #[serde(rename = "color", skip_serializing_if = "Option::is_none")]
    pub grouping_field: Option<String>,

    pub title: String,
}

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Every plan succeeded and the prose passed the number check
    Complete,

    /// An answer was produced, but some plan failed or the prose was replaced
    Partial,

    /// The run stopped at `stage`; the answer explains why
    Failed { stage: Stage },
}

/// What happened to one stage of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Completed,

    /// Ran, but some plan failed or the prose was replaced
    Partial,
    Failed,

    /// Never started because an earlier stage stopped the run
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub state: StageState,
    pub elapsed_ms: u64,
}

/// Confidence in an answer, in [0, 1]
///
/// 0 without results, 0.2 when no plan returned rows, otherwise
/// 0.4 + 0.4 * (plans with rows / plans) + 0.2 when the prose passed the
/// number check. Rounded to two decimals.
pub fn confidence_score(results: &[QueryResult], degraded: bool) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let answered = results.iter().filter(|r| r.has_rows()).count();
    if answered == 0 {
        return 0.2;
    }
    let coverage = answered as f64 / results.len() as f64;
    let checked = if degraded { 0.0 } else { 0.2 };
    ((0.4 + 0.4 * coverage + checked) * 100.0).round() / 100.0
}

/// Terminal artifact of a run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnswerBundle {
    pub run_id: Uuid,
    pub answer_text: String,
    pub key_findings: Vec<String>,
    pub visualization: Option<VisualizationSpec>,
    pub citations: Vec<Citation>,
    pub limitations: String,
    pub logs: Vec<String>,
    pub results: Vec<QueryResult>,
    pub outcome: Outcome,
    pub confidence: f64,

    /// One entry per stage, in pipeline order
    pub stages: Vec<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<SynthesisDegraded>,
}

impl AnswerBundle {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::schema::tests::crop_yield_schema;
    use std::time::Duration;

    fn result(plan_id: &str, rows: usize, error: Option<ExecutionError>) -> QueryResult {
        QueryResult {
            plan_id: plan_id.to_string(),
            subject: None,
            source_table: "crop_yield".to_string(),
            sql: String::new(),
            parameters: vec![],
            columns: vec![],
            rows: vec![],
            row_count: rows,
            execution_time: Duration::ZERO,
            error,
        }
    }

    #[test]
    fn test_citations_skip_failed_results() {
        let schema = crop_yield_schema();
        let results = vec![
            result("compare-1", 5, None),
            result("compare-2", 0, Some(ExecutionError::store("no such column"))),
            result("compare-3", 0, None),
        ];

        let citations = build_citations(&results, &schema);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].plan_id, "compare-1");
        assert_eq!(citations[0].rows_retrieved, 5);
        assert_eq!(citations[0].table, "crop_yield");
        assert_eq!(citations[0].file, "crop_yield.csv");
        assert!(citations[0].url.is_some());
        assert_eq!(citations[1].plan_id, "compare-3");
    }

    #[test]
    fn test_citation_without_source_names_the_table() {
        let schema = crop_yield_schema();
        let mut orphan = result("lookup-1", 3, None);
        orphan.source_table = "district_rainfall".to_string();

        let citations = build_citations(&[orphan], &schema);
        assert_eq!(citations[0].file, "district_rainfall");
        assert_eq!(citations[0].url, None);
    }

    #[test]
    fn test_confidence_tracks_coverage_and_checking() {
        let answered = result("compare-1", 5, None);
        let empty = result("compare-2", 0, None);
        let failed = result("compare-3", 0, Some(ExecutionError::store("no such column")));

        assert_eq!(confidence_score(&[], false), 0.0);
        assert_eq!(confidence_score(&[empty.clone()], false), 0.2);
        assert_eq!(confidence_score(&[answered.clone()], false), 1.0);
        assert_eq!(confidence_score(&[answered.clone()], true), 0.8);
        assert_eq!(confidence_score(&[answered.clone(), empty, failed], false), 0.73);
        assert!(confidence_score(&[answered.clone()], true) < confidence_score(&[answered], false));
    }

    #[test]
    fn test_visualization_wire_names() {
        let spec = VisualizationSpec {
            chart_type: ChartType::Line,
            result_index: 0,
            x_field: "Crop_Year".to_string(),
            y_field: "Production".to_string(),
            grouping_field: Some("State".to_string()),
            title: "Production by Crop_Year".to_string(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "line");
        assert_eq!(json["x"], "Crop_Year");
        assert_eq!(json["y"], "Production");
        assert_eq!(json["color"], "State");
    }

    #[test]
    fn test_outcome_serialization() {
        let failed = Outcome::Failed {
            stage: Stage::IntentExtraction,
        };
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "intent_extraction");
        assert_eq!(serde_json::to_value(Outcome::Partial).unwrap()["status"], "partial");
    }
}
