//! IntentExtractor: natural-language question -> QueryIntent
//!
//! One JSON-mode model call at temperature 0, then strict validation at
//! the boundary:
//! - `intent_type` must be one of the six known kinds, verbatim
//! - entity/category names are fuzzy-matched to canonical dataset values;
//!   one unresolvable name fails the whole extraction
//! - metric names are grounded to metric columns where possible
//! - time phrases become absolute year windows against the dataset's max year

use crate::config::PipelineConfig;
use crate::error::IntentExtractionError;
use crate::intent::resolver::{check_year_bounds, resolve_metric, resolve_time_phrase, Resolution};
use crate::intent::{
    resolve_relative_window, AggregateFn, Direction, EntityResolver, IntentType, QueryIntent,
    TemporalScope,
};
use crate::llm::json::excerpt;
use crate::llm::{extract_json_from_response, CompletionRequest, LanguageModel};
use crate::schema::{SchemaMetadata, TableMetadata};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Model output as received, before validation
#[derive(Deserialize, Debug)]
struct RawIntent {
    intent_type: String,
    entities: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    metrics: Vec<String>,
    #[serde(default)]
    temporal_scope: Option<RawTemporalScope>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    aggregation: Option<String>,
    #[serde(default)]
    per_period: bool,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawTemporalScope {
    Year(i64),
    Phrase(String),
    Window {
        #[serde(default)]
        start_year: Option<i64>,
        #[serde(default)]
        end_year: Option<i64>,
        #[serde(default)]
        relative_window: Option<String>,
    },
}

pub struct IntentExtractor {
    model: Arc<dyn LanguageModel>,
    resolver: EntityResolver,
    timeout: Duration,
    max_tokens: u32,
}

impl IntentExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: &PipelineConfig) -> Self {
        Self {
            model,
            resolver: EntityResolver::new(config.resolution.similarity_threshold),
            timeout: config.timeouts.intent(),
            max_tokens: config.llm.max_tokens,
        }
    }

    /// Extract a validated intent for one question
    pub async fn extract(
        &self,
        raw_question: &str,
        schema: &SchemaMetadata,
    ) -> Result<QueryIntent, IntentExtractionError> {
        let question = raw_question.trim();
        if question.is_empty() {
            return Err(IntentExtractionError::EmptyQuestion);
        }

        let request = CompletionRequest::json(build_prompt(question, schema), 0.0, self.max_tokens);

        tracing::debug!(model = self.model.name(), "requesting intent");
        let output = match tokio::time::timeout(self.timeout, self.model.complete(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(IntentExtractionError::model(err.to_string())),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "intent extraction timed out");
                return Err(IntentExtractionError::timeout(self.timeout));
            }
        };

        let intent = self.interpret(&output, question, schema)?;
        tracing::info!(
            intent_type = %intent.intent_type,
            entities = ?intent.entities,
            categories = ?intent.categories,
            metrics = ?intent.metrics,
            "intent extracted"
        );
        Ok(intent)
    }

    /// Validate raw model output into a `QueryIntent`
    pub fn interpret(
        &self,
        output: &str,
        raw_question: &str,
        schema: &SchemaMetadata,
    ) -> Result<QueryIntent, IntentExtractionError> {
        let json = extract_json_from_response(output);
        let raw: RawIntent = serde_json::from_str(&json).map_err(|e| {
            IntentExtractionError::malformed(format!("{e}; output was: {}", excerpt(&json, 300)))
        })?;

        let intent_type = IntentType::parse(&raw.intent_type).ok_or_else(|| {
            IntentExtractionError::UnknownIntentType {
                value: raw.intent_type.clone(),
            }
        })?;

        let direction = match raw.direction.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => Some(
                Direction::parse(d)
                    .ok_or_else(|| IntentExtractionError::malformed(format!("unknown direction '{d}'")))?,
            ),
            None => None,
        };
        let aggregation = match raw.aggregation.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(a) => Some(
                AggregateFn::parse(a)
                    .ok_or_else(|| IntentExtractionError::malformed(format!("unknown aggregation '{a}'")))?,
            ),
            None => None,
        };

        let table = schema.primary_table();
        let (entities, categories) = self.resolve_names(&raw.entities, &raw.categories, table)?;

        let mut metrics: Vec<String> = Vec::new();
        for name in raw.metrics.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
            let grounded = table
                .and_then(|t| resolve_metric(name, &t.roles.metrics, &self.resolver))
                .unwrap_or_else(|| name.to_string());
            if !metrics.contains(&grounded) {
                metrics.push(grounded);
            }
        }

        let temporal_scope = match raw.temporal_scope {
            Some(scope) => resolve_scope(scope, schema)?,
            // The model sometimes drops the window; the question text still has it
            None => match schema.max_year() {
                Some(max_year) => resolve_relative_window(raw_question, Some(max_year))?,
                None => None,
            },
        };

        Ok(QueryIntent {
            intent_type,
            entities,
            categories,
            metrics,
            temporal_scope,
            direction,
            aggregation,
            per_period: raw.per_period,
            raw_question: raw_question.to_string(),
        })
    }

    /// Canonical entity and category values, de-duplicated in order
    fn resolve_names(
        &self,
        raw_entities: &[String],
        raw_categories: &[String],
        table: Option<&TableMetadata>,
    ) -> Result<(Vec<String>, Vec<String>), IntentExtractionError> {
        let (entity_values, category_values): (&[String], &[String]) = match table {
            Some(t) => (t.entity_values(), t.category_values()),
            None => (&[], &[]),
        };

        let mut entities = Vec::new();
        let mut categories = Vec::new();

        for raw in raw_entities.iter().filter(|r| !r.trim().is_empty()) {
            // A crop named in the entity list is a filter, not an entity
            if let Some(category) = self.resolver.exact(raw, category_values) {
                push_unique(&mut categories, category.clone());
                continue;
            }
            let value = self.resolve_value(raw, entity_values, "entity")?;
            push_unique(&mut entities, value);
        }

        for raw in raw_categories.iter().filter(|r| !r.trim().is_empty()) {
            if let Some(entity) = self.resolver.exact(raw, entity_values) {
                push_unique(&mut entities, entity.clone());
                continue;
            }
            let value = self.resolve_value(raw, category_values, "category")?;
            push_unique(&mut categories, value);
        }

        Ok((entities, categories))
    }

    fn resolve_value(
        &self,
        raw: &str,
        candidates: &[String],
        domain: &str,
    ) -> Result<String, IntentExtractionError> {
        match self.resolver.resolve(raw, candidates) {
            Resolution::Exact(value) => Ok(value),
            Resolution::Fuzzy { value, similarity } => {
                tracing::debug!(raw, resolved = %value, similarity, "fuzzy-matched {domain}");
                Ok(value)
            }
            Resolution::Unresolved { closest } => Err(IntentExtractionError::UnresolvedValue {
                domain: domain.to_string(),
                value: raw.trim().to_string(),
                closest,
            }),
        }
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn resolve_scope(
    scope: RawTemporalScope,
    schema: &SchemaMetadata,
) -> Result<Option<TemporalScope>, IntentExtractionError> {
    match scope_from_raw(scope, schema)? {
        Some(scope) => {
            let phrase = scope
                .relative_window
                .clone()
                .unwrap_or_else(|| format!("{}-{}", scope.start_year, scope.end_year));
            check_year_bounds(scope, &phrase).map(Some)
        }
        None => Ok(None),
    }
}

fn scope_from_raw(
    scope: RawTemporalScope,
    schema: &SchemaMetadata,
) -> Result<Option<TemporalScope>, IntentExtractionError> {
    let (min_year, max_year) = (schema.min_year(), schema.max_year());
    match scope {
        RawTemporalScope::Year(year) => Ok(Some(TemporalScope::years(year, year))),
        RawTemporalScope::Phrase(phrase) if phrase.trim().is_empty() => Ok(None),
        RawTemporalScope::Phrase(phrase) => resolve_time_phrase(&phrase, min_year, max_year).map(Some),
        RawTemporalScope::Window {
            relative_window: Some(phrase),
            ..
        } if !phrase.trim().is_empty() => resolve_time_phrase(&phrase, min_year, max_year).map(Some),
        RawTemporalScope::Window {
            start_year,
            end_year,
            ..
        } => match (start_year, end_year) {
            (Some(start), Some(end)) => Ok(Some(TemporalScope::years(start, end))),
            (Some(start), None) => {
                let end = max_year.ok_or_else(|| {
                    IntentExtractionError::temporal(start.to_string(), "dataset has no year column")
                })?;
                Ok(Some(TemporalScope::years(start, end.max(start))))
            }
            (None, Some(end)) => {
                let start = min_year.ok_or_else(|| {
                    IntentExtractionError::temporal(end.to_string(), "dataset has no year column")
                })?;
                Ok(Some(TemporalScope::years(start.min(end), end)))
            }
            (None, None) => Ok(None),
        },
    }
}

/// Prompt for the intent call
pub fn build_prompt(question: &str, schema: &SchemaMetadata) -> String {
    let mut known = String::new();
    if let Some(table) = schema.primary_table() {
        if let Some(column) = &table.roles.entity {
            known.push_str(&format!("Known {} values: {}\n", column, table.entity_values().join(", ")));
        }
        if let Some(column) = &table.roles.category {
            known.push_str(&format!("Known {} values: {}\n", column, table.category_values().join(", ")));
        }
    }
    let max_year = schema
        .max_year()
        .map(|y| y.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r#"You are an expert query understanding system for agricultural data analysis.
Classify the user's question and extract structured information.

USER QUESTION: "{question}"

AVAILABLE DATA:
{summary}
{known}Latest year in the data: {max_year}

Respond with JSON only, in exactly this shape:
{{
    "intent_type": "compare|trend|extremum|correlate|lookup|aggregate",
    "entities": ["state names"],
    "categories": ["crop names"],
    "metrics": ["Production", "Annual_Rainfall", "Area", "Yield", "Fertilizer", "Pesticide"],
    "temporal_scope": {{"start_year": 2014, "end_year": 2018}} or {{"relative_window": "last 5 years"}} or null,
    "direction": "highest|lowest" or null,
    "aggregation": "sum|avg|min|max|count" or null,
    "per_period": false
}}

Rules:
1. intent_type:
   - compare: comparing values across states or crops
   - trend: how a value changes over time
   - extremum: finding the highest or lowest
   - correlate: relationship between two metrics
   - aggregate: a total, average or count
   - lookup: simple fact retrieval
2. entities: only states mentioned, spelled as in the known values
3. categories: only crops mentioned, spelled as in the known values
4. metrics: measurements needed, using column names
5. temporal_scope: copy relative phrases ("last 5 years") verbatim into relative_window
6. per_period: true only when the question asks for the highest/lowest in each year

JSON Response:
"#,
        summary = schema.summary().trim_end(),
    )
}
