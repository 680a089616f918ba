//! AnswerSynthesizer: results -> AnswerBundle
//!
//! Pass 1 is deterministic (skeleton, chart, citations, limitations). Pass 2
//! asks the model to write prose around the skeleton and keeps it only if it
//! parses, is non-empty, and cites no figure outside the skeleton. Any
//! failure in pass 2 degrades to skeleton-only text; it never fails the run.

use crate::config::{PipelineConfig, SynthesisConfig};
use crate::error::{DegradedReason, SynthesisDegraded};
use crate::execution::QueryResult;
use crate::intent::QueryIntent;
use crate::llm::json::excerpt;
use crate::llm::{extract_json_from_response, CompletionRequest, LanguageModel};
use crate::schema::SchemaMetadata;
use crate::synthesis::consistency::untraceable_number;
use crate::synthesis::{
    build_citations, choose_visualization, confidence_score, AnswerBundle, ChartType, Outcome,
    Skeleton,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "You are an agricultural data analyst. You explain computed figures about Indian crop production and rainfall. You never invent numbers.";

#[derive(Deserialize, Debug)]
struct RawAnswer {
    answer: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    limitations: Option<RawLimitations>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawLimitations {
    Text(String),
    List(Vec<String>),
}

impl RawLimitations {
    fn into_lines(self) -> Vec<String> {
        let lines = match self {
            RawLimitations::Text(text) => vec![text],
            RawLimitations::List(items) => items,
        };
        lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// Accepted model prose
struct Generated {
    answer: String,
    key_findings: Vec<String>,
    limitations: Vec<String>,
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_tokens: u32,
    config: SynthesisConfig,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: &PipelineConfig) -> Self {
        Self {
            model,
            timeout: config.timeouts.synthesis(),
            max_tokens: config.llm.max_tokens,
            config: config.synthesis.clone(),
        }
    }

    /// Build the answer bundle for one run
    ///
    /// `logs` and `stages` are left for the orchestrator to fill in.
    pub async fn synthesize(
        &self,
        intent: &QueryIntent,
        results: Vec<QueryResult>,
        schema: &SchemaMetadata,
    ) -> AnswerBundle {
        let skeleton = Skeleton::build(intent, &results, schema, self.config.max_prompt_rows);
        let visualization = Some(choose_visualization(intent, &results, schema))
            .filter(|v| v.chart_type != ChartType::None);
        let citations = build_citations(&results, schema);
        let mut limitations = describe_limitations(intent, &results, schema);

        let mut degraded = None;
        let (answer_text, key_findings) = if !results.iter().any(QueryResult::has_rows) {
            tracing::info!("no rows returned, skipping generation");
            (no_data_text(intent), skeleton.statements.clone())
        } else {
            match self.generate(intent, &results, &skeleton, &limitations).await {
                Ok(generated) => {
                    limitations.extend(generated.limitations);
                    (generated.answer, generated.key_findings)
                }
                Err(reason) => {
                    tracing::warn!(%reason, "answer synthesis degraded to computed summary");
                    limitations.push(format!(
                        "The explanation could not be generated ({reason}); the figures shown are computed directly from the data."
                    ));
                    degraded = Some(SynthesisDegraded { reason });
                    (fallback_text(&skeleton, &results), skeleton.statements.clone())
                }
            }
        };

        let outcome = if degraded.is_some() || results.iter().any(|r| !r.is_success()) {
            Outcome::Partial
        } else {
            Outcome::Complete
        };

        let confidence = confidence_score(&results, degraded.is_some());
        tracing::debug!(confidence, "answer confidence");

        AnswerBundle {
            run_id: Uuid::new_v4(),
            answer_text,
            key_findings,
            visualization,
            citations,
            limitations: limitations.join("\n"),
            logs: Vec::new(),
            results,
            outcome,
            confidence,
            stages: Vec::new(),
            degraded,
        }
    }

    async fn generate(
        &self,
        intent: &QueryIntent,
        results: &[QueryResult],
        skeleton: &Skeleton,
        limitations: &[String],
    ) -> Result<Generated, DegradedReason> {
        let prompt = build_prompt(
            &intent.raw_question,
            skeleton,
            &data_preview(results, self.config.max_prompt_rows),
            limitations,
        );
        let request = CompletionRequest::json(prompt, 0.1, self.max_tokens).with_system(SYSTEM_PROMPT);

        tracing::debug!(model = self.model.name(), statements = skeleton.statements.len(), "requesting answer prose");
        let output = match tokio::time::timeout(self.timeout, self.model.complete(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(DegradedReason::ModelUnavailable(err.to_string())),
            Err(_) => return Err(DegradedReason::Timeout(self.timeout.as_millis() as u64)),
        };

        let json = extract_json_from_response(&output);
        let raw: RawAnswer = serde_json::from_str(&json)
            .map_err(|e| DegradedReason::MalformedOutput(format!("{e}; output was: {}", excerpt(&json, 200))))?;

        let answer = raw.answer.trim().to_string();
        if answer.is_empty() {
            return Err(DegradedReason::MalformedOutput("empty answer".to_string()));
        }
        let key_findings: Vec<String> = raw
            .key_findings
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        let check = |text: &str| {
            untraceable_number(
                text,
                &skeleton.numbers,
                self.config.relative_tolerance,
                self.config.absolute_tolerance,
            )
        };
        for text in std::iter::once(&answer).chain(key_findings.iter()) {
            if let Some(number) = check(text) {
                return Err(DegradedReason::UntraceableNumber(number));
            }
        }

        let limitations = raw
            .limitations
            .map(RawLimitations::into_lines)
            .unwrap_or_default()
            .into_iter()
            .filter(|line| match check(line) {
                Some(number) => {
                    tracing::debug!(%number, "dropping model limitation with an untraceable figure");
                    false
                }
                None => true,
            })
            .filter(|line| !limitations.contains(line))
            .collect();

        Ok(Generated {
            answer,
            key_findings,
            limitations,
        })
    }
}

/// Missing subjects, empty results and uncovered years
pub fn describe_limitations(
    intent: &QueryIntent,
    results: &[QueryResult],
    schema: &SchemaMetadata,
) -> Vec<String> {
    let mut lines = Vec::new();
    for result in results {
        match &result.error {
            Some(err) => lines.push(format!(
                "Data for {} is unavailable: query {} failed ({err}).",
                result.label(),
                result.plan_id
            )),
            None if result.row_count == 0 => {
                lines.push(format!("No rows matched for {}.", result.label()))
            }
            None => {}
        }
    }

    let table = results
        .first()
        .and_then(|r| schema.table(&r.source_table))
        .or_else(|| schema.primary_table());
    if let (Some(scope), Some((min, max))) = (&intent.temporal_scope, table.and_then(|t| t.date_range)) {
        if scope.end_year < min || scope.start_year > max {
            lines.push(format!(
                "The dataset covers {min}-{max}; the requested period {scope} is outside it."
            ));
        } else if scope.start_year < min || scope.end_year > max {
            lines.push(format!(
                "The dataset covers {min}-{max}; the requested period {scope} is only partly covered."
            ));
        }
    }
    lines
}

/// Result rows as compact CSV blocks, at most `max_rows` rows each
pub fn data_preview(results: &[QueryResult], max_rows: usize) -> String {
    let mut out = String::new();
    for result in results {
        if let Some(err) = &result.error {
            out.push_str(&format!("--- {} ({}): failed, {err} ---\n", result.label(), result.plan_id));
            continue;
        }
        out.push_str(&format!(
            "--- {} ({}, table {}): {} row(s) ---\n",
            result.label(),
            result.plan_id,
            result.source_table,
            result.row_count
        ));
        if result.rows.is_empty() {
            continue;
        }
        out.push_str(&result.columns.join(","));
        out.push('\n');
        for row in result.rows.iter().take(max_rows) {
            let cells: Vec<String> = row.iter().map(|(_, v)| v.to_string().trim().to_string()).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        if result.rows.len() > max_rows {
            out.push_str("(more rows omitted)\n");
        }
    }
    out
}

pub fn build_prompt(question: &str, skeleton: &Skeleton, preview: &str, limitations: &[String]) -> String {
    let limitations = if limitations.is_empty() {
        "- none".to_string()
    } else {
        limitations.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n")
    };

    format!(
        r#"Answer the user's question using ONLY the computed facts and data below.

USER QUESTION: "{question}"

COMPUTED FACTS (exact):
{facts}

DATA:
{preview}
KNOWN LIMITATIONS:
{limitations}

Respond with a single JSON object:
{{"answer": "markdown answer", "key_findings": ["short finding", "..."], "limitations": "caveats, or empty"}}

RULES:
1. Start with a direct answer to the question.
2. Every number you write must appear in the computed facts or data above. Copy numbers as written; do not round differently, convert units or compute new figures.
3. Mention units (Production in tonnes, Area in hectares, Annual_Rainfall in mm).
4. If data is missing for part of the question, say so plainly.
5. Use markdown (**bold**, bullet points) in "answer"."#,
        facts = skeleton.render(),
    )
}

fn fallback_text(skeleton: &Skeleton, results: &[QueryResult]) -> String {
    let mut text = format!("**Summary computed from the data**\n\n{}", skeleton.render());
    let missing = missing_data(results);
    if !missing.is_empty() {
        text.push_str("\n\n**Missing data**\n");
        text.push_str(&missing.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n"));
    }
    text
}

/// Subjects whose query failed or returned nothing
fn missing_data(results: &[QueryResult]) -> Vec<String> {
    results
        .iter()
        .filter_map(|result| match &result.error {
            Some(_) => Some(format!("Data for {} is unavailable: its query failed.", result.label())),
            None if result.row_count == 0 => Some(format!("No rows matched for {}.", result.label())),
            None => None,
        })
        .collect()
}

fn no_data_text(intent: &QueryIntent) -> String {
    match &intent.temporal_scope {
        Some(scope) => format!("No rows in the dataset matched this question for {scope}."),
        None => "No rows in the dataset matched this question.".to_string(),
    }
}
