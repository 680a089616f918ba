//! Error taxonomy for the question-answering pipeline
//!
//! Each stage owns one error kind; the orchestrator turns terminal ones into a failed answer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage, used to label trace entries and failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntentExtraction,
    PlanCompilation,
    PlanExecution,
    AnswerSynthesis,
}

impl Stage {
    /// Every stage, in run order
    pub const ALL: [Stage; 4] = [
        Stage::IntentExtraction,
        Stage::PlanCompilation,
        Stage::PlanExecution,
        Stage::AnswerSynthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IntentExtraction => "intent_extraction",
            Stage::PlanCompilation => "plan_compilation",
            Stage::PlanExecution => "plan_execution",
            Stage::AnswerSynthesis => "answer_synthesis",
        }
    }

    /// Human wording used in user-facing failure text
    pub fn label(&self) -> &'static str {
        match self {
            Stage::IntentExtraction => "understanding the question",
            Stage::PlanCompilation => "planning the data queries",
            Stage::PlanExecution => "running the data queries",
            Stage::AnswerSynthesis => "writing the answer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage 1 failures: the model output could not be turned into a trusted intent
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentExtractionError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("language model did not answer within {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("language model call failed: {message}")]
    Model { message: String },

    #[error("model output is not a valid intent: {message}")]
    Malformed { message: String },

    #[error("intent type '{value}' is not one of compare, trend, extremum, correlate, lookup, aggregate")]
    UnknownIntentType { value: String },

    #[error("'{value}' does not match any known {domain} value{}", closest_hint(.closest))]
    UnresolvedValue {
        domain: String,
        value: String,
        closest: Option<String>,
    },

    #[error("time window '{phrase}' cannot be resolved: {reason}")]
    InvalidTemporalScope { phrase: String, reason: String },
}

fn closest_hint(closest: &Option<String>) -> String {
    closest
        .as_ref()
        .map(|c| format!(" (closest: '{c}')"))
        .unwrap_or_default()
}

impl IntentExtractionError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn temporal(phrase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemporalScope {
            phrase: phrase.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used in trace entries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuestion => "empty_question",
            Self::Timeout { .. } => "timeout",
            Self::Model { .. } => "model_error",
            Self::Malformed { .. } => "malformed_output",
            Self::UnknownIntentType { .. } => "unknown_intent_type",
            Self::UnresolvedValue { .. } => "unresolved_value",
            Self::InvalidTemporalScope { .. } => "invalid_temporal_scope",
        }
    }
}

/// Stage 2 failures: the intent has no safe compilation against this schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanCompilationError {
    #[error("schema snapshot has no tables")]
    EmptySchema,

    #[error("metric '{metric}' is not a column of any known table")]
    UnknownMetric { metric: String },

    #[error("table '{table}' has no {role} column")]
    MissingRole { table: String, role: String },

    #[error("{intent_type} questions need {needed}")]
    Unsupported { intent_type: String, needed: String },

    #[error("plan {plan_id}: template has {placeholders} placeholders but {parameters} bound parameters")]
    ParameterMismatch {
        plan_id: String,
        placeholders: usize,
        parameters: usize,
    },
}

impl PlanCompilationError {
    pub fn missing_role(table: impl Into<String>, role: impl Into<String>) -> Self {
        Self::MissingRole {
            table: table.into(),
            role: role.into(),
        }
    }

    pub fn unsupported(intent_type: impl Into<String>, needed: impl Into<String>) -> Self {
        Self::Unsupported {
            intent_type: intent_type.into(),
            needed: needed.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptySchema => "empty_schema",
            Self::UnknownMetric { .. } => "unknown_metric",
            Self::MissingRole { .. } => "missing_role",
            Self::Unsupported { .. } => "unsupported_intent",
            Self::ParameterMismatch { .. } => "parameter_mismatch",
        }
    }
}

/// Per-plan execution failure; recorded on the result, never fatal to siblings
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("store error: {message}")]
    Store { message: String },

    #[error("query exceeded {after_ms} ms and was interrupted")]
    Timeout { after_ms: u64 },

    #[error("statement rejected: {message}")]
    Rejected { message: String },

    #[error("run cancelled before this plan started")]
    Cancelled,
}

impl ExecutionError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::store(err.to_string())
    }
}

/// Why the synthesizer fell back to skeleton-only text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
    ModelUnavailable(String),
    Timeout(u64),
    MalformedOutput(String),
    UntraceableNumber(String),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelUnavailable(msg) => write!(f, "language model unavailable: {msg}"),
            Self::Timeout(ms) => write!(f, "language model did not answer within {ms} ms"),
            Self::MalformedOutput(msg) => write!(f, "language model output unusable: {msg}"),
            Self::UntraceableNumber(n) => {
                write!(f, "generated text cited {n}, which is not in the computed figures")
            }
        }
    }
}

/// Not a failure: signals that deterministic fallback text replaced generated prose
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisDegraded {
    pub reason: DegradedReason,
}

/// Terminal failure of a pipeline run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("intent extraction failed: {0}")]
    Intent(#[from] IntentExtractionError),

    #[error("plan compilation failed: {0}")]
    Plan(#[from] PlanCompilationError),

    #[error("run cancelled before {0}")]
    Cancelled(Stage),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Intent(_) => Stage::IntentExtraction,
            Self::Plan(_) => Stage::PlanCompilation,
            Self::Cancelled(stage) => *stage,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Intent(e) => e.kind(),
            Self::Plan(e) => e.kind(),
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Plain-language explanation shown as the answer of a failed run
    pub fn describe(&self) -> String {
        match self {
            Self::Intent(IntentExtractionError::Timeout { after_ms }) => format!(
                "I could not understand the question because the language model did not respond within {after_ms} ms (intent extraction timed out)."
            ),
            Self::Intent(IntentExtractionError::UnresolvedValue { domain, value, closest }) => {
                let hint = closest
                    .as_ref()
                    .map(|c| format!(" Did you mean '{c}'?"))
                    .unwrap_or_default();
                format!("I could not find the {domain} '{value}' in the dataset, so I did not guess.{hint}")
            }
            Self::Intent(e) => format!("I could not understand the question (intent extraction failed: {e})."),
            Self::Plan(e) => format!("I understood the question but could not build a safe data query for it (plan compilation failed: {e})."),
            Self::Cancelled(stage) => format!("The request was cancelled before {}.", stage.label()),
        }
    }
}

/// Store-level failures outside a plan run (opening, pooling)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
