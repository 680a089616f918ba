//! Plan execution: runs compiled plans against the store and keeps provenance
//!
//! Every plan yields exactly one `QueryResult`, successful or not, in plan
//! order. A failing plan never stops its siblings.

use crate::config::PipelineConfig;
use crate::error::ExecutionError;
use crate::plan::QueryPlan;
use crate::store::{Row, RowSet, Scalar, TabularStore};
use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of one plan, with what ran and where the rows came from
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub plan_id: String,
    pub subject: Option<String>,
    pub source_table: String,
    pub sql: String,
    pub parameters: Vec<Scalar>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub execution_time: Duration,
    pub error: Option<ExecutionError>,
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_micros() as f64 / 1000.0)
}

impl QueryResult {
    fn success(plan: QueryPlan, rows: RowSet) -> Self {
        let mut result = Self::from_plan(plan, rows.elapsed);
        result.row_count = rows.rows.len();
        result.columns = rows.columns;
        result.rows = rows.rows;
        result
    }

    fn failure(plan: QueryPlan, error: ExecutionError, elapsed: Duration) -> Self {
        let mut result = Self::from_plan(plan, elapsed);
        result.error = Some(error);
        result
    }

    fn from_plan(plan: QueryPlan, elapsed: Duration) -> Self {
        Self {
            plan_id: plan.plan_id().to_string(),
            subject: plan.subject().map(str::to_string),
            source_table: plan.target_table().to_string(),
            sql: plan.sql_template().to_string(),
            parameters: plan.bound_parameters().to_vec(),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time: elapsed,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn has_rows(&self) -> bool {
        self.is_success() && self.row_count > 0
    }

    /// Subject when the plan has one, else its id
    pub fn label(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.plan_id)
    }
}

pub struct PlanExecutor {
    store: Arc<TabularStore>,
    timeout: Duration,
    concurrent: bool,
}

impl PlanExecutor {
    pub fn new(store: Arc<TabularStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            timeout: config.timeouts.execution(),
            concurrent: config.executor.concurrent_plans,
        }
    }

    /// Run all plans; results come back in plan order
    pub async fn execute(&self, plans: Vec<QueryPlan>) -> Vec<QueryResult> {
        self.execute_with_cancellation(plans, &CancellationToken::new()).await
    }

    /// Like `execute`, but plans not yet started when `token` fires are
    /// recorded as cancelled instead of run
    pub async fn execute_with_cancellation(
        &self,
        plans: Vec<QueryPlan>,
        token: &CancellationToken,
    ) -> Vec<QueryResult> {
        if self.concurrent {
            join_all(plans.into_iter().map(|plan| self.run_one(plan, token))).await
        } else {
            let mut results = Vec::with_capacity(plans.len());
            for plan in plans {
                results.push(self.run_one(plan, token).await);
            }
            results
        }
    }

    async fn run_one(&self, plan: QueryPlan, token: &CancellationToken) -> QueryResult {
        if token.is_cancelled() {
            tracing::debug!(plan_id = plan.plan_id(), "skipping plan, run cancelled");
            return QueryResult::failure(plan, ExecutionError::Cancelled, Duration::ZERO);
        }

        let started = Instant::now();
        match self.store.execute(&plan, self.timeout).await {
            Ok(rows) => {
                tracing::info!(
                    plan_id = plan.plan_id(),
                    subject = plan.subject().unwrap_or("-"),
                    rows = rows.rows.len(),
                    elapsed_ms = rows.elapsed.as_millis() as u64,
                    "plan executed"
                );
                QueryResult::success(plan, rows)
            }
            Err(err) => {
                tracing::warn!(
                    plan_id = plan.plan_id(),
                    subject = plan.subject().unwrap_or("-"),
                    error = %err,
                    "plan failed"
                );
                QueryResult::failure(plan, err, started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_database;

    fn plan(id: &str, subject: &str, sql: &str, params: Vec<Scalar>) -> QueryPlan {
        QueryPlan::new(id, "crop_yield", sql, params).unwrap().with_subject(subject)
    }

    fn production_plan(id: &str, state: &str) -> QueryPlan {
        plan(
            id,
            state,
            r#"SELECT "Crop_Year", SUM("Production") AS "Production" FROM "crop_yield" WHERE "State" IN (?) GROUP BY "Crop_Year" ORDER BY "Crop_Year""#,
            vec![Scalar::text(state)],
        )
    }

    fn executor(config: &PipelineConfig) -> (tempfile::TempDir, PlanExecutor) {
        let (dir, path) = seeded_database();
        let store = Arc::new(TabularStore::open_read_only(&path, 2).unwrap());
        (dir, PlanExecutor::new(store, config))
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_order_kept() {
        let (_dir, executor) = executor(&PipelineConfig::default());
        let plans = vec![
            production_plan("compare-1", "Punjab"),
            plan("compare-2", "Assam", r#"SELECT Humidity FROM "crop_yield" WHERE "State" IN (?)"#, vec![Scalar::text("Assam")]),
            production_plan("compare-3", "Odisha"),
        ];

        let results = executor.execute(plans).await;
        let ids: Vec<&str> = results.iter().map(|r| r.plan_id.as_str()).collect();
        assert_eq!(ids, ["compare-1", "compare-2", "compare-3"]);

        assert!(results[0].has_rows());
        assert_eq!(results[0].row_count, 9);
        assert!(matches!(results[1].error, Some(ExecutionError::Store { .. })));
        assert_eq!(results[1].label(), "Assam");
        assert!(results[1].rows.is_empty());
        assert!(results[2].has_rows());
        assert_eq!(results[2].parameters, vec![Scalar::text("Odisha")]);
    }

    #[tokio::test]
    async fn test_sequential_mode_matches_concurrent() {
        let mut config = PipelineConfig::default();
        config.executor.concurrent_plans = false;
        let (_dir, sequential) = executor(&config);
        let (_dir2, concurrent) = executor(&PipelineConfig::default());

        let plans = vec![production_plan("trend-1", "Assam"), production_plan("trend-2", "Punjab")];
        let a = sequential.execute(plans.clone()).await;
        let b = concurrent.execute(plans).await;
        let rows = |r: &[QueryResult]| r.iter().map(|x| x.rows.clone()).collect::<Vec<_>>();
        assert_eq!(rows(&a), rows(&b));
    }

    #[tokio::test]
    async fn test_cancelled_plans_do_not_run() {
        let (_dir, executor) = executor(&PipelineConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let results = executor
            .execute_with_cancellation(vec![production_plan("trend-1", "Assam")], &token)
            .await;
        assert_eq!(results[0].error, Some(ExecutionError::Cancelled));
        assert_eq!(results[0].row_count, 0);
    }

    #[tokio::test]
    async fn test_runaway_query_times_out() {
        let mut config = PipelineConfig::default();
        config.timeouts.execution_ms = 50;
        let (_dir, executor) = executor(&config);

        let runaway = plan(
            "lookup-1",
            "runaway",
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) AS n FROM c",
            vec![],
        );
        let results = executor.execute(vec![runaway, production_plan("lookup-2", "Punjab")]).await;
        assert_eq!(results[0].error, Some(ExecutionError::Timeout { after_ms: 50 }));
        assert!(results[1].has_rows());
    }

    #[test]
    fn test_result_serializes_time_in_ms() {
        let plan = production_plan("trend-1", "Assam");
        let result = QueryResult::failure(plan, ExecutionError::Cancelled, Duration::from_millis(12));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["execution_time_ms"], 12.0);
        assert_eq!(json["error"]["kind"], "cancelled");
        assert_eq!(json["subject"], "Assam");
    }
}
