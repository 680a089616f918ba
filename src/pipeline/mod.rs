//! Pipeline orchestrator
//!
//! Drives one question through the four stages in order:
//! - intent extraction (model call, bounded by a timeout)
//! - plan compilation (deterministic)
//! - plan execution (store round-trips, per-plan failure isolation)
//! - answer synthesis (never fails, may degrade)
//!
//! Intent and plan failures end the run with a failed bundle; execution and
//! synthesis problems are carried as partial results. Every path records
//! where it stopped in the bundle's logs and stage statuses.

pub mod response;

pub use response::PipelineResponse;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage};
use crate::execution::{PlanExecutor, QueryResult};
use crate::intent::{IntentExtractor, QueryIntent};
use crate::llm::LanguageModel;
use crate::plan::{CompiledPlans, PlanCompiler, QueryPlan};
use crate::schema::{SchemaLoader, SchemaMetadata};
use crate::store::TabularStore;
use crate::synthesis::{AnswerBundle, AnswerSynthesizer, Outcome, StageState, StageStatus};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Stage-boundary trace kept in the bundle
#[derive(Debug, Default)]
struct Trace {
    entries: Vec<String>,
    stages: Vec<StageStatus>,
}

impl Trace {
    fn record(&mut self, stage: Stage, state: StageState, started: Instant, summary: impl AsRef<str>) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let entry = format!("[{stage}] {elapsed_ms}ms {}", summary.as_ref());
        tracing::debug!(target: "pipeline_trace", "{entry}");
        self.entries.push(entry);
        self.stages.push(StageStatus {
            stage,
            state,
            elapsed_ms,
        });
    }

    fn note(&mut self, stage: Stage, line: impl AsRef<str>) {
        self.entries.push(format!("[{stage}] {}", line.as_ref()));
    }

    /// Write logs and stage statuses into `bundle`; unreached stages are skipped
    fn finish(mut self, bundle: &mut AnswerBundle) {
        for stage in Stage::ALL {
            if !self.stages.iter().any(|s| s.stage == stage) {
                self.stages.push(StageStatus {
                    stage,
                    state: StageState::Skipped,
                    elapsed_ms: 0,
                });
            }
        }
        self.stages.sort_by_key(|s| Stage::ALL.iter().position(|x| *x == s.stage));
        bundle.logs = self.entries;
        bundle.stages = self.stages;
    }
}

pub struct Pipeline {
    schema: Arc<SchemaMetadata>,
    extractor: IntentExtractor,
    compiler: PlanCompiler,
    executor: PlanExecutor,
    synthesizer: AnswerSynthesizer,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        schema: Arc<SchemaMetadata>,
        store: Arc<TabularStore>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            schema,
            extractor: IntentExtractor::new(model.clone(), config),
            compiler: PlanCompiler::new(config.compiler.clone()),
            executor: PlanExecutor::new(store, config),
            synthesizer: AnswerSynthesizer::new(model, config),
        }
    }

    /// Open the store, load the schema snapshot once and assemble the stages
    pub async fn bootstrap(config: &PipelineConfig, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let store = TabularStore::open_read_only(&config.store.database_path, config.store.pool_size)
            .with_context(|| {
                format!("Failed to open store at {}", config.store.database_path.display())
            })?;
        let store = Arc::new(store);

        let schema = SchemaLoader::new(&store, &config.store, config.timeouts.execution())
            .load(&config.sources)
            .await
            .context("Failed to load schema snapshot")?;
        tracing::info!(tables = schema.tables().len(), "schema snapshot ready");

        Ok(Self::new(config, Arc::new(schema), store, model))
    }

    pub fn schema(&self) -> &SchemaMetadata {
        &self.schema
    }

    /// Answer one question
    pub async fn run_pipeline(&self, question: &str) -> AnswerBundle {
        self.run_with_cancellation(question, &CancellationToken::new()).await
    }

    /// Answer one question; once `token` fires no further stage is started
    pub async fn run_with_cancellation(&self, question: &str, token: &CancellationToken) -> AnswerBundle {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", %run_id);
        let started = Instant::now();

        let mut bundle = self.run_stages(question, token).instrument(span.clone()).await;
        bundle.run_id = run_id;

        span.in_scope(|| {
            tracing::info!(
                outcome = ?bundle.outcome,
                degraded = bundle.is_degraded(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pipeline run finished"
            )
        });
        bundle
    }

    async fn run_stages(&self, question: &str, token: &CancellationToken) -> AnswerBundle {
        let mut trace = Trace::default();

        // Stage 1
        let stage_started = Instant::now();
        let extracted = guarded(token, Stage::IntentExtraction, async {
            self.extractor
                .extract(question, &self.schema)
                .await
                .map_err(PipelineError::from)
        })
        .await;
        let intent = match extracted {
            Ok(intent) => {
                trace.record(Stage::IntentExtraction, StageState::Completed, stage_started, intent.summary());
                intent
            }
            Err(err) => return failed(err, trace, stage_started),
        };

        // Stage 2
        let stage_started = Instant::now();
        if token.is_cancelled() {
            return failed(PipelineError::Cancelled(Stage::PlanCompilation), trace, stage_started);
        }
        let compiled = match self.compiler.compile(&intent, &self.schema) {
            Ok(compiled) => compiled,
            Err(err) => {
                return failed(PipelineError::from(err), trace, stage_started);
            }
        };
        record_compilation(&mut trace, stage_started, &compiled);

        self.execute_and_synthesize(&intent, compiled.plans, trace, token).await
    }

    /// Execute already compiled plans for `intent` and synthesize the answer
    pub async fn execute_plans(&self, intent: &QueryIntent, plans: Vec<QueryPlan>) -> AnswerBundle {
        self.execute_and_synthesize(intent, plans, Trace::default(), &CancellationToken::new())
            .await
    }

    async fn execute_and_synthesize(
        &self,
        intent: &QueryIntent,
        plans: Vec<QueryPlan>,
        mut trace: Trace,
        token: &CancellationToken,
    ) -> AnswerBundle {
        // Stage 3
        let stage_started = Instant::now();
        if token.is_cancelled() {
            return failed(PipelineError::Cancelled(Stage::PlanExecution), trace, stage_started);
        }
        let results = self.executor.execute_with_cancellation(plans, token).await;
        record_execution(&mut trace, stage_started, &results);

        // Stage 4
        let stage_started = Instant::now();
        if token.is_cancelled() {
            let mut bundle = failed(PipelineError::Cancelled(Stage::AnswerSynthesis), trace, stage_started);
            bundle.results = results;
            return bundle;
        }
        let mut bundle = self.synthesizer.synthesize(intent, results, &self.schema).await;
        let (state, summary) = match &bundle.degraded {
            Some(degraded) => (StageState::Partial, format!("degraded answer: {}", degraded.reason)),
            None => (
                StageState::Completed,
                format!(
                    "answer ready, {} finding(s), {} citation(s), confidence {:.2}",
                    bundle.key_findings.len(),
                    bundle.citations.len(),
                    bundle.confidence
                ),
            ),
        };
        trace.record(Stage::AnswerSynthesis, state, stage_started, summary);

        trace.finish(&mut bundle);
        bundle
    }
}

/// Run `stage` unless `token` fires first
async fn guarded<T>(
    token: &CancellationToken,
    stage: Stage,
    work: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    if token.is_cancelled() {
        return Err(PipelineError::Cancelled(stage));
    }
    tokio::select! {
        result = work => result,
        _ = token.cancelled() => Err(PipelineError::Cancelled(stage)),
    }
}

fn record_compilation(trace: &mut Trace, started: Instant, compiled: &CompiledPlans) {
    let ids: Vec<&str> = compiled.plans.iter().map(|p| p.plan_id()).collect();
    trace.record(
        Stage::PlanCompilation,
        StageState::Completed,
        started,
        format!("{} plan(s): {}", ids.len(), ids.join(", ")),
    );
    for explanation in &compiled.explanations {
        trace.note(
            Stage::PlanCompilation,
            format!("{}: {} ({})", explanation.step, explanation.decision, explanation.reason),
        );
    }
}

fn record_execution(trace: &mut Trace, started: Instant, results: &[QueryResult]) {
    let failed: Vec<&str> = results.iter().filter(|r| !r.is_success()).map(|r| r.label()).collect();
    let summary = if failed.is_empty() {
        format!("{} plan(s) succeeded", results.len())
    } else {
        format!(
            "{} of {} plan(s) succeeded; failed: {}",
            results.len() - failed.len(),
            results.len(),
            failed.join(", ")
        )
    };
    let state = if failed.is_empty() {
        StageState::Completed
    } else {
        StageState::Partial
    };
    trace.record(Stage::PlanExecution, state, started, summary);

    for result in results {
        let line = match &result.error {
            Some(err) => format!("{} ({}) failed: {err}", result.plan_id, result.label()),
            None => format!(
                "{} ({}) returned {} row(s) in {:.1}ms",
                result.plan_id,
                result.label(),
                result.row_count,
                result.execution_time.as_secs_f64() * 1000.0
            ),
        };
        trace.note(Stage::PlanExecution, line);
    }
}

/// Terminal bundle for a run that stopped at a stage boundary
fn failed(error: PipelineError, mut trace: Trace, stage_started: Instant) -> AnswerBundle {
    let stage = error.stage();
    tracing::warn!(%stage, kind = error.kind(), error = %error, "pipeline stopped");
    trace.record(
        stage,
        StageState::Failed,
        stage_started,
        format!("failed ({}): {error}", error.kind()),
    );

    let mut bundle = AnswerBundle {
        run_id: Uuid::nil(),
        answer_text: error.describe(),
        key_findings: Vec::new(),
        visualization: None,
        citations: Vec::new(),
        limitations: format!("No data was retrieved: the run stopped while {}.", stage.label()),
        logs: Vec::new(),
        results: Vec::new(),
        outcome: Outcome::Failed { stage },
        confidence: 0.0,
        stages: Vec::new(),
        degraded: None,
    };
    trace.finish(&mut bundle);
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::llm::ScriptedModel;
    use crate::schema::tests::crop_yield_schema;
    use crate::store::Scalar;
    use crate::testing::seeded_database;
    use std::time::Duration;

    const WHEAT_2014: &str = r#"{"intent_type": "extremum", "entities": [], "categories": ["wheat"],
        "metrics": ["production"], "temporal_scope": {"start_year": 2014, "end_year": 2014},
        "direction": "highest"}"#;

    fn pipeline(model: ScriptedModel, config: &PipelineConfig) -> (tempfile::TempDir, Pipeline, Arc<ScriptedModel>) {
        let (dir, path) = seeded_database();
        let store = Arc::new(TabularStore::open_read_only(&path, 2).unwrap());
        let model = Arc::new(model);
        let pipeline = Pipeline::new(config, Arc::new(crop_yield_schema()), store, model.clone());
        (dir, pipeline, model)
    }

    #[tokio::test]
    async fn test_full_run_logs_every_stage() {
        let model = ScriptedModel::new()
            .reply(WHEAT_2014)
            .reply(r#"{"answer": "Punjab had the highest wheat production in 2014: 16,200 tonnes."}"#);
        let (_dir, pipeline, _) = pipeline(model, &PipelineConfig::default());

        let bundle = pipeline.run_pipeline("Which state had the highest wheat production in 2014?").await;
        assert_eq!(bundle.outcome, Outcome::Complete);
        assert_ne!(bundle.run_id, Uuid::nil());
        for stage in ["[intent_extraction]", "[plan_compilation]", "[plan_execution]", "[answer_synthesis]"] {
            assert!(bundle.logs.iter().any(|l| l.starts_with(stage)), "missing {stage}");
        }
        assert!(bundle.logs.iter().any(|l| l.contains("table_selection: crop_yield")));

        let stages: Vec<(Stage, StageState)> = bundle.stages.iter().map(|s| (s.stage, s.state)).collect();
        assert_eq!(stages, Stage::ALL.map(|stage| (stage, StageState::Completed)));
        assert_eq!(bundle.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_compile_failure_stops_before_execution() {
        let model = ScriptedModel::new().reply(
            r#"{"intent_type": "correlate", "entities": [], "metrics": ["production"]}"#,
        );
        let (_dir, pipeline, model) = pipeline(model, &PipelineConfig::default());

        let bundle = pipeline.run_pipeline("Does production correlate?").await;
        assert_eq!(
            bundle.outcome,
            Outcome::Failed {
                stage: Stage::PlanCompilation
            }
        );
        assert!(bundle.results.is_empty());
        assert!(bundle.answer_text.contains("could not build a safe data query"));
        assert!(bundle.logs.last().unwrap().contains("unsupported_intent"));
        assert!(!bundle.logs.iter().any(|l| l.starts_with("[plan_execution]")));
        assert_eq!(model.calls(), 1);

        let states: Vec<StageState> = bundle.stages.iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            [StageState::Completed, StageState::Failed, StageState::Skipped, StageState::Skipped]
        );
        assert_eq!(bundle.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, pipeline, model) = pipeline(ScriptedModel::new(), &PipelineConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let bundle = pipeline.run_with_cancellation("anything", &token).await;
        assert_eq!(
            bundle.outcome,
            Outcome::Failed {
                stage: Stage::IntentExtraction
            }
        );
        assert_eq!(model.calls(), 0);
        assert!(bundle.answer_text.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancellation_during_extraction() {
        let model = ScriptedModel::new().reply_after(WHEAT_2014, Duration::from_secs(5));
        let (_dir, pipeline, _) = pipeline(model, &PipelineConfig::default());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let bundle = pipeline.run_with_cancellation("slow question", &token).await;
        assert_eq!(
            bundle.outcome,
            Outcome::Failed {
                stage: Stage::IntentExtraction
            }
        );
        assert!(bundle.logs[0].contains("cancelled"));
    }

    #[tokio::test]
    async fn test_failed_plan_is_named_in_logs() {
        let model = ScriptedModel::new().reply(r#"{"answer": "Punjab produced 16,200 tonnes."}"#);
        let (_dir, pipeline, _) = pipeline(model, &PipelineConfig::default());
        let intent = QueryIntent::new(crate::intent::IntentType::Extremum, "q")
            .with_categories(["Wheat"])
            .with_years(2014, 2014);
        let good = pipeline.compiler.compile(&intent, pipeline.schema()).unwrap().plans;
        let bad = QueryPlan::new("extremum-2", "crop_yield", r#"SELECT Humidity FROM "crop_yield" WHERE "State" IN (?)"#, vec![Scalar::text("Assam")])
            .unwrap()
            .with_subject("Assam");
        let plans = good.into_iter().chain([bad]).collect();

        let bundle = pipeline.execute_plans(&intent, plans).await;
        assert_eq!(bundle.outcome, Outcome::Partial);
        assert!(matches!(bundle.results[1].error, Some(ExecutionError::Store { .. })));
        assert!(bundle.logs.iter().any(|l| l.contains("failed: Assam")));
        assert_eq!(bundle.citations.len(), 1);

        let execution = bundle.stages.iter().find(|s| s.stage == Stage::PlanExecution).unwrap();
        assert_eq!(execution.state, StageState::Partial);
        assert_eq!(bundle.confidence, 0.8);
    }
}
