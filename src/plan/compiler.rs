//! PlanCompiler: deterministic compiler from QueryIntent -> QueryPlan(s)
//!
//! No language model is involved here. The compiler:
//! - selects the table that carries the entity/temporal/metric roles
//! - grounds every requested metric to an actual column (or fails)
//! - picks a strategy per intent type (compare, trend, extremum, ...)
//! - emits SQL whose identifiers come only from the schema snapshot and
//!   whose values are bound parameters
//! - records why each decision was made

use crate::config::CompilerConfig;
use crate::error::PlanCompilationError;
use crate::intent::{AggregateFn, IntentType, QueryIntent, TemporalScope};
use crate::plan::{quote_ident, QueryPlan};
use crate::schema::{MetricColumn, SchemaMetadata, TableMetadata};
use crate::store::Scalar;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilerExplanation {
    pub step: String,
    pub decision: String,
    pub reason: String,
}

/// Plans for one intent, in execution order, plus the compiler's reasoning
#[derive(Debug, Clone)]
pub struct CompiledPlans {
    pub plans: Vec<QueryPlan>,
    pub explanations: Vec<CompilerExplanation>,
}

pub struct PlanCompiler {
    config: CompilerConfig,
}

impl PlanCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile an intent against the snapshot
    ///
    /// Deterministic: the same intent and snapshot always produce the same
    /// plans, with the same ids, templates and parameters.
    pub fn compile(
        &self,
        intent: &QueryIntent,
        schema: &SchemaMetadata,
    ) -> Result<CompiledPlans, PlanCompilationError> {
        let table = schema.primary_table().ok_or(PlanCompilationError::EmptySchema)?;

        let mut ctx = Context {
            intent,
            table,
            metrics: Vec::new(),
            explanations: Vec::new(),
        };
        ctx.explain(
            "table_selection",
            &table.name,
            "table carries the entity, temporal and metric roles",
        );

        // Step 1: ground metrics to columns
        ctx.metrics = ground_metrics(intent, table, &mut ctx.explanations)?;

        // Step 2: strategy per intent type
        let plans = match intent.intent_type {
            IntentType::Compare => self.compare(&mut ctx)?,
            IntentType::Trend => self.trend(&mut ctx)?,
            IntentType::Extremum => self.extremum(&mut ctx)?,
            IntentType::Correlate => self.correlate(&mut ctx)?,
            IntentType::Aggregate => self.aggregate(&mut ctx)?,
            IntentType::Lookup => self.lookup(&mut ctx)?,
        };
        let plans = plans
            .into_iter()
            .map(|plan| plan.for_intent(intent.intent_type))
            .collect();

        for explanation in &ctx.explanations {
            tracing::debug!(
                step = %explanation.step,
                decision = %explanation.decision,
                reason = %explanation.reason,
                "compiler decision"
            );
        }

        Ok(CompiledPlans {
            plans,
            explanations: ctx.explanations,
        })
    }

    /// Metric per compared value and year
    ///
    /// The compared dimension is the entity unless the question names a
    /// single entity (or none) and several categories. With neither, every
    /// entity is ranked.
    fn compare(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let intent = ctx.intent;
        if intent.entities.is_empty() && intent.categories.len() < 2 {
            return self.compare_all_entities(ctx);
        }
        let by_entity = !intent.entities.is_empty()
            && !(intent.entities.len() == 1 && intent.categories.len() >= 2);

        let (dimension, values, filters) = if by_entity {
            let dimension = ctx.entity_column()?;
            let filters = ctx.filters(false, true)?;
            (dimension, &intent.entities, filters)
        } else if intent.categories.len() >= 2 {
            let dimension = ctx.category_column()?;
            let filters = ctx.filters(true, false)?;
            (dimension, &intent.categories, filters)
        } else {
            return Err(PlanCompilationError::unsupported(
                "compare",
                "at least one entity or two categories",
            ));
        };

        let temporal = ctx.table.roles.temporal.clone();
        let mut keys = vec![dimension.clone()];
        keys.extend(temporal);

        let build = |plan_id: String, dimension_values: &[String]| {
            let mut b = SqlBuilder::select(&keys, &ctx.metric_exprs(None));
            b.from(&ctx.table.name);
            let mut filters = filters.clone();
            filters.prepend_in(&dimension, dimension_values);
            filters.write(&mut b);
            b.group_by(&keys);
            b.order_by(&keys);
            b.finish(plan_id, &ctx.table.name)
        };

        let plans = if self.config.compare_fan_out && values.len() > 1 {
            values
                .iter()
                .enumerate()
                .map(|(idx, value)| {
                    build(format!("compare-{}", idx + 1), std::slice::from_ref(value))
                        .map(|plan| plan.with_subject(value.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![build("compare-1".to_string(), values.as_slice())?]
        };

        ctx.explain(
            "strategy",
            &format!("compare {} value(s) of {} in {} plan(s)", values.len(), dimension, plans.len()),
            if plans.len() > 1 {
                "fan-out enabled: one plan per compared value"
            } else {
                "single plan with an IN filter over the compared values"
            },
        );
        Ok(plans)
    }

    /// Every entity's metric over the window, ranked by the first metric
    fn compare_all_entities(
        &self,
        ctx: &mut Context<'_>,
    ) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let entity = ctx.entity_column()?;
        let filters = ctx.filters(false, true)?;
        let keys = vec![entity.clone()];
        let first = ctx
            .metrics
            .first()
            .map(|m| quote_ident(&m.name))
            .ok_or_else(|| PlanCompilationError::unsupported("compare", "a metric to rank by"))?;

        let mut b = SqlBuilder::select(&keys, &ctx.metric_exprs(None));
        b.from(&ctx.table.name);
        filters.write(&mut b);
        b.group_by(&keys);
        b.push(&format!(" ORDER BY {first} DESC, {}", quote_ident(&entity)));
        b.push(" LIMIT ");
        b.bind(Scalar::Integer(self.config.compare_top_n));
        let plan = b.finish("compare-1".to_string(), &ctx.table.name)?;

        ctx.explain(
            "strategy",
            &format!("compare every {} ranked by {}", entity, ctx.metric_names().join(", ")),
            &format!("no {entity} named; top {} kept", self.config.compare_top_n),
        );
        Ok(vec![plan])
    }

    /// Ordered time series, one plan per entity (national when none named)
    fn trend(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let intent = ctx.intent;
        let temporal = ctx.temporal_column()?;
        let base = ctx.filters(false, true)?;

        let mut subjects: Vec<Option<&String>> = intent.entities.iter().map(Some).collect();
        if subjects.is_empty() {
            subjects.push(None);
        }

        let mut plans = Vec::with_capacity(subjects.len());
        for (idx, subject) in subjects.into_iter().enumerate() {
            let mut keys = Vec::new();
            let mut filters = base.clone();
            if let Some(entity) = subject {
                let column = ctx.entity_column()?;
                filters.prepend_in(&column, std::slice::from_ref(entity));
                keys.push(column);
            }
            keys.push(temporal.clone());

            let mut b = SqlBuilder::select(&keys, &ctx.metric_exprs(None));
            b.from(&ctx.table.name);
            filters.write(&mut b);
            b.group_by(&keys);
            b.order_by(std::slice::from_ref(&temporal));
            b.push(" ASC");

            let plan = b.finish(format!("trend-{}", idx + 1), &ctx.table.name)?;
            plans.push(match subject {
                Some(entity) => plan.with_subject(entity.clone()),
                None => plan,
            });
        }

        ctx.explain(
            "strategy",
            &format!("trend over {} in {} plan(s)", temporal, plans.len()),
            "one ordered series per named entity",
        );
        Ok(plans)
    }

    /// Top (or bottom) grouping key per metric, keeping ties
    fn extremum(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let intent = ctx.intent;
        let direction = intent.direction.unwrap_or_default();

        // Rank whatever the question leaves open: states, then crops, then years
        let key = if intent.entities.is_empty() {
            ctx.entity_column()?
        } else if intent.categories.is_empty() {
            ctx.category_column()?
        } else {
            ctx.temporal_column()?
        };
        let filters = ctx.filters(true, true)?;

        let per_period = intent.per_period && ctx.table.roles.temporal.as_deref() != Some(key.as_str());
        let temporal = if per_period { Some(ctx.temporal_column()?) } else { None };

        let mut plans = Vec::with_capacity(ctx.metrics.len());
        for (idx, metric) in ctx.metrics.iter().enumerate() {
            let value = quote_ident(&metric.name);
            let aggregate = ctx.aggregate_for(metric, intent.aggregation);
            let expr = metric_expr(metric, aggregate);

            let mut keys: Vec<String> = temporal.iter().cloned().collect();
            keys.push(key.clone());
            let key_list = ident_list(&keys);

            let mut b = SqlBuilder::new();
            b.push("WITH totals AS (");
            b.push(&format!("SELECT {key_list}, {expr}"));
            b.from(&ctx.table.name);
            filters.write(&mut b);
            b.group_by(&keys);
            b.push(")");

            match &temporal {
                Some(year) => {
                    let year = quote_ident(year);
                    b.push(&format!(
                        ", ranked AS (SELECT {key_list}, {value}, {}({value}) OVER (PARTITION BY {year}) AS extremum_value FROM totals)",
                        direction.sql_function()
                    ));
                    b.push(&format!(
                        " SELECT {key_list}, {value} FROM ranked WHERE {value} = extremum_value ORDER BY {key_list}"
                    ));
                }
                None => {
                    b.push(&format!(
                        " SELECT {key_list}, {value} FROM totals WHERE {value} = (SELECT {}({value}) FROM totals) ORDER BY {key_list}",
                        direction.sql_function()
                    ));
                }
            }

            let mut plan = b.finish(format!("extremum-{}", idx + 1), &ctx.table.name)?;
            if ctx.metrics.len() > 1 {
                plan = plan.with_subject(metric.name.clone());
            }
            plans.push(plan);
        }

        ctx.explain(
            "strategy",
            &format!(
                "{} {} by {}{}",
                direction.word(),
                ctx.metric_names().join(", "),
                key,
                if per_period { " per year" } else { "" }
            ),
            "every row equal to the extremum is returned so ties are kept",
        );
        Ok(plans)
    }

    /// Paired metric series on the (entity, year) grain, one plan per pair
    fn correlate(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        if ctx.metrics.len() < 2 {
            return Err(PlanCompilationError::unsupported("correlate", "at least two metrics"));
        }
        let temporal = ctx.temporal_column()?;
        let filters = ctx.filters(true, true)?;

        let mut keys: Vec<String> = ctx.table.roles.entity.iter().cloned().collect();
        keys.push(temporal);

        let mut plans = Vec::new();
        for (i, a) in ctx.metrics.iter().enumerate() {
            for b_metric in ctx.metrics.iter().skip(i + 1) {
                let exprs = vec![
                    metric_expr(a, a.aggregate),
                    metric_expr(b_metric, b_metric.aggregate),
                ];
                let mut b = SqlBuilder::select(&keys, &exprs);
                b.from(&ctx.table.name);
                filters.write(&mut b);
                b.group_by(&keys);
                b.order_by(&keys);

                let plan = b
                    .finish(format!("correlate-{}", plans.len() + 1), &ctx.table.name)?
                    .with_subject(format!("{} vs {}", a.name, b_metric.name));
                plans.push(plan);
            }
        }

        ctx.explain(
            "strategy",
            &format!("correlate {} metric pair(s) on {}", plans.len(), ident_list(&keys)),
            "both metrics are read from the same grouped rows",
        );
        Ok(plans)
    }

    /// Requested aggregate, grouped by entity when entities are named
    fn aggregate(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let filters = ctx.filters(true, true)?;

        let mut keys = Vec::new();
        if !ctx.intent.entities.is_empty() {
            keys.push(ctx.entity_column()?);
        }
        if ctx.intent.categories.len() > 1 {
            keys.push(ctx.category_column()?);
        }

        let mut b = SqlBuilder::select(&keys, &ctx.metric_exprs(ctx.intent.aggregation));
        b.from(&ctx.table.name);
        filters.write(&mut b);
        if !keys.is_empty() {
            b.group_by(&keys);
            b.order_by(&keys);
        }
        let plan = b.finish("aggregate-1".to_string(), &ctx.table.name)?;

        ctx.explain(
            "strategy",
            &format!(
                "aggregate {} grouped by [{}]",
                ctx.metric_names().join(", "),
                keys.join(", ")
            ),
            "aggregate function follows the question, else the metric's natural one",
        );
        Ok(vec![plan])
    }

    /// Filtered rows on the (entity, category, year) grain, bounded by a limit
    fn lookup(&self, ctx: &mut Context<'_>) -> Result<Vec<QueryPlan>, PlanCompilationError> {
        let filters = ctx.filters(true, true)?;
        let roles = &ctx.table.roles;
        let keys: Vec<String> = [&roles.entity, &roles.category, &roles.temporal]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        let mut order: Vec<String> = roles.temporal.iter().cloned().collect();
        order.extend(roles.entity.iter().cloned());
        order.extend(roles.category.iter().cloned());

        let mut b = SqlBuilder::select(&keys, &ctx.metric_exprs(ctx.intent.aggregation));
        b.from(&ctx.table.name);
        filters.write(&mut b);
        if !keys.is_empty() {
            b.group_by(&keys);
            b.order_by(&order);
        }
        b.push(" LIMIT ");
        b.bind(Scalar::Integer(self.config.lookup_row_limit));
        let plan = b.finish("lookup-1".to_string(), &ctx.table.name)?;

        ctx.explain(
            "strategy",
            &format!("lookup on [{}]", keys.join(", ")),
            &format!("row count bounded at {}", self.config.lookup_row_limit),
        );
        Ok(vec![plan])
    }
}

/// Map requested metric names to columns; default to the primary metric
fn ground_metrics<'a>(
    intent: &QueryIntent,
    table: &'a TableMetadata,
    explanations: &mut Vec<CompilerExplanation>,
) -> Result<Vec<&'a MetricColumn>, PlanCompilationError> {
    let mut metrics: Vec<&MetricColumn> = Vec::new();

    for name in &intent.metrics {
        let metric = table
            .metric(name)
            .ok_or_else(|| PlanCompilationError::UnknownMetric { metric: name.clone() })?;
        if !metrics.iter().any(|m| m.name == metric.name) {
            metrics.push(metric);
        }
    }

    if metrics.is_empty() {
        let primary = table
            .primary_metric()
            .ok_or_else(|| PlanCompilationError::missing_role(&table.name, "metric"))?;
        explanations.push(CompilerExplanation {
            step: "metric_grounding".to_string(),
            decision: primary.name.clone(),
            reason: "question names no metric; using the primary metric".to_string(),
        });
        metrics.push(primary);
    } else {
        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        explanations.push(CompilerExplanation {
            step: "metric_grounding".to_string(),
            decision: names.join(", "),
            reason: "requested metrics matched to columns".to_string(),
        });
    }

    Ok(metrics)
}

struct Context<'a> {
    intent: &'a QueryIntent,
    table: &'a TableMetadata,
    metrics: Vec<&'a MetricColumn>,
    explanations: Vec<CompilerExplanation>,
}

impl<'a> Context<'a> {
    fn explain(&mut self, step: &str, decision: &str, reason: &str) {
        self.explanations.push(CompilerExplanation {
            step: step.to_string(),
            decision: decision.to_string(),
            reason: reason.to_string(),
        });
    }

    fn role(&self, column: &Option<String>, role: &str) -> Result<String, PlanCompilationError> {
        column
            .clone()
            .ok_or_else(|| PlanCompilationError::missing_role(&self.table.name, role))
    }

    fn entity_column(&self) -> Result<String, PlanCompilationError> {
        self.role(&self.table.roles.entity, "entity")
    }

    fn category_column(&self) -> Result<String, PlanCompilationError> {
        self.role(&self.table.roles.category, "category")
    }

    fn temporal_column(&self) -> Result<String, PlanCompilationError> {
        self.role(&self.table.roles.temporal, "temporal")
    }

    fn metric_names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }

    fn aggregate_for(&self, metric: &MetricColumn, requested: Option<AggregateFn>) -> AggregateFn {
        requested.unwrap_or(metric.aggregate)
    }

    fn metric_exprs(&self, requested: Option<AggregateFn>) -> Vec<String> {
        self.metrics
            .iter()
            .map(|m| metric_expr(m, self.aggregate_for(m, requested)))
            .collect()
    }

    /// Filters from the intent's entities, categories and years
    fn filters(&self, entities: bool, categories: bool) -> Result<Filters, PlanCompilationError> {
        let mut filters = Filters::default();
        if entities && !self.intent.entities.is_empty() {
            filters.push_in(&self.entity_column()?, &self.intent.entities);
        }
        if categories && !self.intent.categories.is_empty() {
            filters.push_in(&self.category_column()?, &self.intent.categories);
        }
        if let Some(scope) = &self.intent.temporal_scope {
            filters.push_between(&self.temporal_column()?, scope);
        }
        Ok(filters)
    }
}

fn metric_expr(metric: &MetricColumn, aggregate: AggregateFn) -> String {
    let column = quote_ident(&metric.name);
    format!("{}({column}) AS {column}", aggregate.sql_function())
}

fn ident_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Debug)]
enum Condition {
    In { column: String, values: Vec<Scalar> },
    Between { column: String, low: i64, high: i64 },
}

#[derive(Clone, Debug, Default)]
struct Filters {
    conditions: Vec<Condition>,
}

impl Filters {
    fn push_in(&mut self, column: &str, values: &[String]) {
        self.conditions.push(Condition::In {
            column: column.to_string(),
            values: values.iter().map(|v| Scalar::text(v.as_str())).collect(),
        });
    }

    fn prepend_in(&mut self, column: &str, values: &[String]) {
        self.conditions.insert(
            0,
            Condition::In {
                column: column.to_string(),
                values: values.iter().map(|v| Scalar::text(v.as_str())).collect(),
            },
        );
    }

    fn push_between(&mut self, column: &str, scope: &TemporalScope) {
        self.conditions.push(Condition::Between {
            column: column.to_string(),
            low: scope.start_year,
            high: scope.end_year,
        });
    }

    fn write(&self, b: &mut SqlBuilder) {
        for (idx, condition) in self.conditions.iter().enumerate() {
            b.push(if idx == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::In { column, values } => {
                    b.push(&quote_ident(column));
                    b.push(" IN (");
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            b.push(", ");
                        }
                        b.bind(value.clone());
                    }
                    b.push(")");
                }
                Condition::Between { column, low, high } => {
                    b.push(&quote_ident(column));
                    b.push(" BETWEEN ");
                    b.bind(Scalar::Integer(*low));
                    b.push(" AND ");
                    b.bind(Scalar::Integer(*high));
                }
            }
        }
    }
}

/// Accumulates SQL text and bound values together so they cannot drift apart
struct SqlBuilder {
    sql: String,
    params: Vec<Scalar>,
}

impl SqlBuilder {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn select(keys: &[String], exprs: &[String]) -> Self {
        let mut items: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
        items.extend(exprs.iter().cloned());
        let mut b = Self::new();
        b.push("SELECT ");
        b.push(&items.join(", "));
        b
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: Scalar) {
        self.sql.push('?');
        self.params.push(value);
    }

    fn from(&mut self, table: &str) {
        self.push(" FROM ");
        self.push(&quote_ident(table));
    }

    fn group_by(&mut self, keys: &[String]) {
        self.push(" GROUP BY ");
        self.push(&ident_list(keys));
    }

    fn order_by(&mut self, keys: &[String]) {
        self.push(" ORDER BY ");
        self.push(&ident_list(keys));
    }

    fn finish(self, plan_id: String, table: &str) -> Result<QueryPlan, PlanCompilationError> {
        QueryPlan::new(plan_id, table, self.sql, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Direction;
    use crate::schema::tests::crop_yield_schema;

    fn compiler() -> PlanCompiler {
        PlanCompiler::new(CompilerConfig::default())
    }

    fn texts(plan: &QueryPlan) -> Vec<String> {
        plan.bound_parameters().iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_compare_single_plan_with_in_filter() {
        let intent = QueryIntent::new(IntentType::Compare, "Compare rice production in Punjab and Assam 2014-2018")
            .with_entities(["Punjab", "Assam"])
            .with_categories(["Rice"])
            .with_metrics(["Production"])
            .with_years(2014, 2018);

        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        assert_eq!(compiled.plans.len(), 1);
        let plan = &compiled.plans[0];
        assert_eq!(plan.plan_id(), "compare-1");
        assert_eq!(
            plan.sql_template(),
            r#"SELECT "State", "Crop_Year", SUM("Production") AS "Production" FROM "crop_yield" WHERE "State" IN (?, ?) AND "Crop" IN (?) AND "Crop_Year" BETWEEN ? AND ? GROUP BY "State", "Crop_Year" ORDER BY "State", "Crop_Year""#
        );
        assert_eq!(texts(plan), ["Punjab", "Assam", "Rice", "2014", "2018"]);
    }

    #[test]
    fn test_compare_fan_out_sets_subjects() {
        let config = CompilerConfig {
            compare_fan_out: true,
            ..CompilerConfig::default()
        };
        let intent = QueryIntent::new(IntentType::Compare, "q").with_entities(["Punjab", "Assam"]);

        let compiled = PlanCompiler::new(config).compile(&intent, &crop_yield_schema()).unwrap();
        let subjects: Vec<_> = compiled.plans.iter().map(|p| p.subject()).collect();
        assert_eq!(subjects, [Some("Punjab"), Some("Assam")]);
        assert!(compiled.plans.iter().all(|p| p.sql_template().contains(r#""State" IN (?)"#)));
    }

    #[test]
    fn test_compare_categories_within_one_state() {
        let intent = QueryIntent::new(IntentType::Compare, "q")
            .with_entities(["Punjab"])
            .with_categories(["Rice", "Wheat"]);

        let plan = &compiler().compile(&intent, &crop_yield_schema()).unwrap().plans[0];
        assert!(plan.sql_template().starts_with(r#"SELECT "Crop", "Crop_Year""#));
        assert_eq!(texts(plan), ["Rice", "Wheat", "Punjab"]);
    }

    #[test]
    fn test_compare_without_entities_ranks_all_of_them() {
        let intent = QueryIntent::new(IntentType::Compare, "q")
            .with_categories(["Rice"])
            .with_years(2014, 2018);

        let plans = compiler().compile(&intent, &crop_yield_schema()).unwrap().plans;
        assert_eq!(plans.len(), 1);
        assert_eq!(
            plans[0].sql_template(),
            r#"SELECT "State", SUM("Production") AS "Production" FROM "crop_yield" WHERE "Crop" IN (?) AND "Crop_Year" BETWEEN ? AND ? GROUP BY "State" ORDER BY "Production" DESC, "State" LIMIT ?"#
        );
        assert_eq!(texts(&plans[0]), ["Rice", "2014", "2018", "10"]);
    }

    #[test]
    fn test_trend_one_plan_per_entity_ordered_by_year() {
        let intent = QueryIntent::new(IntentType::Trend, "q")
            .with_entities(["Assam", "Odisha"])
            .with_metrics(["Annual_Rainfall"]);

        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        assert_eq!(compiled.plans.len(), 2);
        let plan = &compiled.plans[1];
        assert_eq!(plan.plan_id(), "trend-2");
        assert_eq!(plan.subject(), Some("Odisha"));
        assert_eq!(
            plan.sql_template(),
            r#"SELECT "State", "Crop_Year", AVG("Annual_Rainfall") AS "Annual_Rainfall" FROM "crop_yield" WHERE "State" IN (?) GROUP BY "State", "Crop_Year" ORDER BY "Crop_Year" ASC"#
        );
    }

    #[test]
    fn test_trend_without_entity_is_national() {
        let intent = QueryIntent::new(IntentType::Trend, "q").with_categories(["Rice"]);
        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        assert_eq!(compiled.plans.len(), 1);
        assert_eq!(compiled.plans[0].subject(), None);
        assert!(compiled.plans[0].sql_template().starts_with(r#"SELECT "Crop_Year", SUM("Production")"#));
    }

    #[test]
    fn test_extremum_keeps_ties_and_binds_filters() {
        let intent = QueryIntent::new(IntentType::Extremum, "Which state had the highest wheat production in 2014?")
            .with_categories(["Wheat"])
            .with_metrics(["Production"])
            .with_years(2014, 2014);

        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        let plan = &compiled.plans[0];
        assert_eq!(
            plan.sql_template(),
            r#"WITH totals AS (SELECT "State", SUM("Production") AS "Production" FROM "crop_yield" WHERE "Crop" IN (?) AND "Crop_Year" BETWEEN ? AND ? GROUP BY "State") SELECT "State", "Production" FROM totals WHERE "Production" = (SELECT MAX("Production") FROM totals) ORDER BY "State""#
        );
        assert_eq!(texts(plan), ["Wheat", "2014", "2014"]);
    }

    #[test]
    fn test_extremum_per_period_and_lowest() {
        let intent = QueryIntent::new(IntentType::Extremum, "q")
            .with_metrics(["Yield"])
            .with_direction(Direction::Lowest)
            .per_period();

        let plan = &compiler().compile(&intent, &crop_yield_schema()).unwrap().plans[0];
        assert!(plan
            .sql_template()
            .contains(r#"MIN("Yield") OVER (PARTITION BY "Crop_Year") AS extremum_value"#));
        assert!(plan.sql_template().ends_with(r#"ORDER BY "Crop_Year", "State""#));
    }

    #[test]
    fn test_extremum_ranks_crops_within_a_named_state() {
        let intent = QueryIntent::new(IntentType::Extremum, "q").with_entities(["Punjab"]);
        let plan = &compiler().compile(&intent, &crop_yield_schema()).unwrap().plans[0];
        assert!(plan.sql_template().contains(r#"SELECT "Crop", SUM("Production")"#));
        assert_eq!(texts(plan), ["Punjab"]);
    }

    #[test]
    fn test_correlate_needs_two_metrics() {
        let intent = QueryIntent::new(IntentType::Correlate, "q").with_metrics(["Production"]);
        let err = compiler().compile(&intent, &crop_yield_schema()).unwrap_err();
        assert_eq!(
            err,
            PlanCompilationError::unsupported("correlate", "at least two metrics")
        );
    }

    #[test]
    fn test_correlate_pairs() {
        let intent = QueryIntent::new(IntentType::Correlate, "q")
            .with_metrics(["Annual_Rainfall", "Yield", "Production"]);
        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        let subjects: Vec<_> = compiled.plans.iter().map(|p| p.subject().unwrap_or("")).collect();
        assert_eq!(
            subjects,
            [
                "Annual_Rainfall vs Yield",
                "Annual_Rainfall vs Production",
                "Yield vs Production"
            ]
        );
    }

    #[test]
    fn test_aggregate_uses_requested_function() {
        let intent = QueryIntent::new(IntentType::Aggregate, "q")
            .with_entities(["Assam"])
            .with_aggregation(AggregateFn::Avg);
        let plan = &compiler().compile(&intent, &crop_yield_schema()).unwrap().plans[0];
        assert_eq!(
            plan.sql_template(),
            r#"SELECT "State", AVG("Production") AS "Production" FROM "crop_yield" WHERE "State" IN (?) GROUP BY "State" ORDER BY "State""#
        );
    }

    #[test]
    fn test_lookup_binds_row_limit() {
        let intent = QueryIntent::new(IntentType::Lookup, "q").with_entities(["Assam"]).with_years(2015, 2015);
        let plan = &compiler().compile(&intent, &crop_yield_schema()).unwrap().plans[0];
        assert!(plan.sql_template().ends_with("LIMIT ?"));
        assert_eq!(texts(plan), ["Assam", "2015", "2015", "200"]);
    }

    #[test]
    fn test_unknown_metric_fails_closed() {
        let intent = QueryIntent::new(IntentType::Trend, "q").with_metrics(["Humidity"]);
        let err = compiler().compile(&intent, &crop_yield_schema()).unwrap_err();
        assert_eq!(err, PlanCompilationError::UnknownMetric { metric: "Humidity".to_string() });
    }

    #[test]
    fn test_empty_schema() {
        let intent = QueryIntent::new(IntentType::Trend, "q");
        let err = compiler().compile(&intent, &SchemaMetadata::default()).unwrap_err();
        assert_eq!(err, PlanCompilationError::EmptySchema);
    }

    #[test]
    fn test_injection_text_never_reaches_template() {
        let hostile = "Assam'); DROP TABLE crop_yield; --";
        let intent = QueryIntent::new(IntentType::Compare, "q").with_entities([hostile, "Punjab"]);
        let compiled = compiler().compile(&intent, &crop_yield_schema()).unwrap();
        for plan in &compiled.plans {
            assert!(!plan.sql_template().contains("DROP"));
            assert!(plan.bound_parameters().contains(&Scalar::text(hostile)));
        }
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let intent = QueryIntent::new(IntentType::Correlate, "q").with_metrics(["Yield", "Annual_Rainfall"]);
        let schema = crop_yield_schema();
        let a = compiler().compile(&intent, &schema).unwrap();
        let b = compiler().compile(&intent, &schema).unwrap();
        assert_eq!(a.plans, b.plans);
        assert_eq!(a.explanations, b.explanations);
    }
}
