//! # Samarth QA
//!
//! Question answering over Indian agricultural crop statistics. A question
//! goes through four stages:
//!
//! 1. **Intent extraction**: a language model classifies the question into a
//!    structured intent, validated against the dataset's real values
//! 2. **Plan compilation**: the intent becomes parameterized SQL plans,
//!    deterministically, with identifiers taken only from the schema
//! 3. **Plan execution**: plans run read-only against the SQLite store; one
//!    failing plan never hides the others
//! 4. **Answer synthesis**: computed facts are phrased by the model, and the
//!    prose is kept only if every number in it traces back to the data
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use samarth_qa::config::PipelineConfig;
//! use samarth_qa::llm::build_model;
//! use samarth_qa::pipeline::Pipeline;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::default().with_env_overrides()?;
//! let pipeline = Pipeline::bootstrap(&config, build_model(&config.llm)?).await?;
//!
//! let bundle = pipeline
//!     .run_pipeline("Which state had the highest wheat production in 2014?")
//!     .await;
//! println!("{}", bundle.answer_text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod schema;
pub mod store;
pub mod synthesis;

#[cfg(test)]
mod testing;

// Public API - main types users need
pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineResponse};
pub use synthesis::{AnswerBundle, Outcome, StageState, StageStatus};

// Stage artifacts
pub use execution::QueryResult;
pub use intent::{IntentType, QueryIntent, TemporalScope};
pub use plan::QueryPlan;
pub use schema::SchemaMetadata;

// Error types
pub use error::{
    ExecutionError, IntentExtractionError, PipelineError, PlanCompilationError, Stage,
    SynthesisDegraded,
};
