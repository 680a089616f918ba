//! Wire shape of a pipeline answer, as consumed by the UI

use crate::execution::QueryResult;
use crate::synthesis::{AnswerBundle, Citation, Outcome, StageStatus, VisualizationSpec};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse<'a> {
    pub answer: &'a str,
    pub key_findings: &'a [String],
    pub visualization: Option<&'a VisualizationSpec>,
    pub citations: &'a [Citation],
    pub results: &'a [QueryResult],
    pub logs: &'a [String],
    pub limitations: &'a str,
    pub outcome: Outcome,
    pub confidence: f64,
    pub stages: &'a [StageStatus],
    pub run_id: Uuid,
}

impl<'a> From<&'a AnswerBundle> for PipelineResponse<'a> {
    fn from(bundle: &'a AnswerBundle) -> Self {
        Self {
            answer: &bundle.answer_text,
            key_findings: &bundle.key_findings,
            visualization: bundle.visualization.as_ref(),
            citations: &bundle.citations,
            results: &bundle.results,
            logs: &bundle.logs,
            limitations: &bundle.limitations,
            outcome: bundle.outcome,
            confidence: bundle.confidence,
            stages: &bundle.stages,
            run_id: bundle.run_id,
        }
    }
}

impl AnswerBundle {
    pub fn to_response(&self) -> PipelineResponse<'_> {
        PipelineResponse::from(self)
    }
}
