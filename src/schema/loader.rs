//! SchemaLoader: builds the schema snapshot by querying the store
//!
//! Every introspection query goes through `QueryPlan` like any other plan,
//! so the loader never formats a value into SQL text.

use crate::config::{DataSourceConfig, StoreConfig};
use crate::plan::{quote_ident, QueryPlan};
use crate::schema::{ColumnInfo, KeyColumnRoles, SchemaMetadata, TableMetadata};
use crate::store::{RowSet, Scalar, TabularStore};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

pub struct SchemaLoader<'a> {
    store: &'a TabularStore,
    config: &'a StoreConfig,
    timeout: Duration,
}

impl<'a> SchemaLoader<'a> {
    pub fn new(store: &'a TabularStore, config: &'a StoreConfig, timeout: Duration) -> Self {
        Self { store, config, timeout }
    }

    /// Load a snapshot covering every configured source table
    pub async fn load(&self, sources: &[DataSourceConfig]) -> Result<SchemaMetadata> {
        if sources.is_empty() {
            bail!("no data sources configured");
        }

        let mut tables = Vec::with_capacity(sources.len());
        for source in sources {
            let table = self
                .load_table(source)
                .await
                .with_context(|| format!("Failed to load schema for table '{}'", source.table))?;
            tracing::info!(
                table = %table.name,
                columns = table.columns.len(),
                rows = table.row_count,
                date_range = ?table.date_range,
                "loaded table metadata"
            );
            tables.push(table);
        }

        Ok(SchemaMetadata::new(tables))
    }

    async fn load_table(&self, source: &DataSourceConfig) -> Result<TableMetadata> {
        let name = source.table.as_str();
        let quoted = quote_ident(name);

        let info = self
            .run(
                "schema-columns",
                name,
                "SELECT name, type FROM pragma_table_info(?)",
                vec![Scalar::text(name)],
            )
            .await?;
        let columns: Vec<ColumnInfo> = info
            .rows
            .iter()
            .filter_map(|row| {
                let column = row.label("name")?;
                Some(ColumnInfo::new(column, row.label("type").unwrap_or_default()))
            })
            .collect();
        if columns.is_empty() {
            bail!("table '{}' does not exist or has no columns", name);
        }

        let roles = KeyColumnRoles::infer(&columns);

        let count = self
            .run(
                "schema-count",
                name,
                &format!("SELECT COUNT(*) AS row_count FROM {quoted}"),
                vec![],
            )
            .await?;
        let row_count = count
            .rows
            .first()
            .and_then(|r| r.get("row_count"))
            .and_then(Scalar::as_i64)
            .unwrap_or(0);

        let sample = self
            .run(
                "schema-sample",
                name,
                &format!("SELECT * FROM {quoted} LIMIT ?"),
                vec![Scalar::Integer(self.config.sample_rows as i64)],
            )
            .await?;

        let date_range = match &roles.temporal {
            Some(temporal) => {
                let col = quote_ident(temporal);
                let range = self
                    .run(
                        "schema-years",
                        name,
                        &format!("SELECT MIN({col}) AS min_year, MAX({col}) AS max_year FROM {quoted}"),
                        vec![],
                    )
                    .await?;
                range.rows.first().and_then(|r| {
                    let min = r.get("min_year").and_then(Scalar::as_i64)?;
                    let max = r.get("max_year").and_then(Scalar::as_i64)?;
                    Some((min, max))
                })
            }
            None => None,
        };

        let mut distinct_values = BTreeMap::new();
        for column in [roles.entity.as_deref(), roles.category.as_deref()].into_iter().flatten() {
            let values = self.distinct(name, column).await?;
            distinct_values.insert(column.to_string(), values);
        }

        Ok(TableMetadata {
            name: name.to_string(),
            columns,
            roles,
            date_range,
            sample_rows: sample.rows,
            distinct_values,
            row_count,
            source: Some(source.clone()),
        })
    }

    /// Distinct non-empty values of one column, as stored
    async fn distinct(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let col = quote_ident(column);
        let sql = format!(
            "SELECT DISTINCT {col} AS value FROM {} WHERE {col} IS NOT NULL ORDER BY 1 LIMIT ?",
            quote_ident(table)
        );
        let rows = self
            .run(
                "schema-distinct",
                table,
                &sql,
                vec![Scalar::Integer(self.config.max_distinct_values as i64)],
            )
            .await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|r| r.label("value"))
            .filter(|v| !v.trim().is_empty())
            .collect())
    }

    async fn run(&self, id: &str, table: &str, sql: &str, params: Vec<Scalar>) -> Result<RowSet> {
        let plan = QueryPlan::new(id, table, sql, params)?;
        let rows = self.store.execute(&plan, self.timeout).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_database;

    #[tokio::test]
    async fn test_loads_seeded_snapshot() {
        let (_dir, path) = seeded_database();
        let store = TabularStore::open_read_only(&path, 1).unwrap();
        let config = StoreConfig::default();
        let loader = SchemaLoader::new(&store, &config, Duration::from_secs(5));

        let schema = loader.load(&[DataSourceConfig::crop_yield()]).await.unwrap();
        let table = schema.table("crop_yield").unwrap();

        assert_eq!(table.columns.len(), 10);
        assert_eq!(table.row_count, 54);
        assert_eq!(table.date_range, Some((2010, 2018)));
        assert_eq!(table.entity_values(), ["Assam", "Odisha", "Punjab"]);
        assert_eq!(table.category_values(), ["Rice", "Wheat"]);
        assert_eq!(table.sample_rows.len(), config.sample_rows);
        assert_eq!(schema.max_year(), Some(2018));
    }

    #[tokio::test]
    async fn test_unknown_table_fails() {
        let (_dir, path) = seeded_database();
        let store = TabularStore::open_read_only(&path, 1).unwrap();
        let config = StoreConfig::default();
        let loader = SchemaLoader::new(&store, &config, Duration::from_secs(5));

        let mut source = DataSourceConfig::crop_yield();
        source.table = "rainfall".to_string();
        let err = loader.load(&[source]).await.unwrap_err();
        assert!(format!("{err:#}").contains("rainfall"));
    }
}
