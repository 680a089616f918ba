//! Schema snapshot: what the pipeline knows about the dataset
//!
//! Loaded once at startup and shared read-only by every run:
//! - column names and declared types per table
//! - key column roles (entity, category, temporal, metrics)
//! - covered year range, sample rows, distinct entity/category values
//! - where the table's data came from (for citations)

pub mod loader;

pub use loader::SchemaLoader;

use crate::config::DataSourceConfig;
use crate::intent::AggregateFn;
use crate::store::Row;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A measurable column and the aggregate that combines it across rows
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricColumn {
    pub name: String,
    pub aggregate: AggregateFn,
    pub unit: Option<String>,
}

/// Which column plays which part in a question
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct KeyColumnRoles {
    pub entity: Option<String>,
    pub category: Option<String>,
    pub temporal: Option<String>,
    pub season: Option<String>,
    pub metrics: Vec<MetricColumn>,
}

/// Measures with a natural total; everything else is a rate or level and is averaged
const ADDITIVE_METRICS: [&str; 4] = ["production", "area", "fertilizer", "pesticide"];
const AVERAGED_METRICS: [&str; 2] = ["yield", "rainfall"];

impl KeyColumnRoles {
    /// Infer roles from column names
    ///
    /// Rules are name based: a column containing "state" or "district" is the entity,
    /// exactly "crop" is the category, containing "year" is temporal, and
    /// the agronomic measures are metrics.
    pub fn infer(columns: &[ColumnInfo]) -> Self {
        let mut roles = KeyColumnRoles::default();

        for column in columns {
            let lower = column.name.to_lowercase();
            if roles.entity.is_none() && (lower.contains("state") || lower.contains("district")) {
                roles.entity = Some(column.name.clone());
            } else if roles.category.is_none() && lower == "crop" {
                roles.category = Some(column.name.clone());
            } else if roles.temporal.is_none() && lower.contains("year") {
                roles.temporal = Some(column.name.clone());
            } else if roles.season.is_none() && lower == "season" {
                roles.season = Some(column.name.clone());
            } else if let Some(metric) = metric_for(&column.name, &lower) {
                roles.metrics.push(metric);
            }
        }

        roles
    }
}

fn metric_for(name: &str, lower: &str) -> Option<MetricColumn> {
    let aggregate = if ADDITIVE_METRICS.iter().any(|m| lower.contains(m)) {
        AggregateFn::Sum
    } else if AVERAGED_METRICS.iter().any(|m| lower.contains(m)) {
        AggregateFn::Avg
    } else {
        return None;
    };

    let unit = if lower.contains("production") {
        Some("tonnes")
    } else if lower.contains("area") {
        Some("hectares")
    } else if lower.contains("rainfall") {
        Some("mm")
    } else if lower.contains("fertilizer") || lower.contains("pesticide") {
        Some("kg")
    } else if lower.contains("yield") {
        Some("tonnes per hectare")
    } else {
        None
    };

    Some(MetricColumn {
        name: name.to_string(),
        aggregate,
        unit: unit.map(str::to_string),
    })
}

/// Snapshot of one table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub roles: KeyColumnRoles,

    /// (earliest, latest) value of the temporal column
    pub date_range: Option<(i64, i64)>,
    pub sample_rows: Vec<Row>,

    /// Distinct values of the entity and category columns, keyed by column
    pub distinct_values: BTreeMap<String, Vec<String>>,
    pub row_count: i64,
    pub source: Option<DataSourceConfig>,
}

impl TableMetadata {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Metric column by name, case-insensitive
    pub fn metric(&self, name: &str) -> Option<&MetricColumn> {
        self.roles
            .metrics
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Metric used when a question names none
    pub fn primary_metric(&self) -> Option<&MetricColumn> {
        self.roles
            .metrics
            .iter()
            .find(|m| m.name.to_lowercase().contains("production"))
            .or_else(|| self.roles.metrics.first())
    }

    pub fn entity_values(&self) -> &[String] {
        self.values_of(self.roles.entity.as_deref())
    }

    pub fn category_values(&self) -> &[String] {
        self.values_of(self.roles.category.as_deref())
    }

    fn values_of(&self, column: Option<&str>) -> &[String] {
        column
            .and_then(|c| self.distinct_values.get(c))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read-only snapshot of every table the pipeline may query
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SchemaMetadata {
    tables: Vec<TableMetadata>,
}

impl SchemaMetadata {
    pub fn new(tables: Vec<TableMetadata>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[TableMetadata] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table questions are answered from: the first with entity, temporal
    /// and metric roles, else the first table
    pub fn primary_table(&self) -> Option<&TableMetadata> {
        self.tables
            .iter()
            .find(|t| {
                t.roles.entity.is_some() && t.roles.temporal.is_some() && !t.roles.metrics.is_empty()
            })
            .or_else(|| self.tables.first())
    }

    /// Latest year covered by the primary table; anchors relative windows
    pub fn max_year(&self) -> Option<i64> {
        self.primary_table().and_then(|t| t.date_range).map(|(_, max)| max)
    }

    pub fn min_year(&self) -> Option<i64> {
        self.primary_table().and_then(|t| t.date_range).map(|(min, _)| min)
    }

    /// Resolve a metric name to its table and column
    pub fn resolve_metric(&self, name: &str) -> Option<(&TableMetadata, &MetricColumn)> {
        self.tables
            .iter()
            .find_map(|t| t.metric(name).map(|m| (t, m)))
    }

    /// Text rendering used in the intent prompt
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&format!("Table {} ({} rows)\n", table.name, table.row_count));
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            out.push_str(&format!("  columns: {}\n", columns.join(", ")));

            if let Some(entity) = &table.roles.entity {
                out.push_str(&format!("  entity column: {entity}\n"));
            }
            if let Some(category) = &table.roles.category {
                out.push_str(&format!("  category column: {category}\n"));
            }
            if let Some(temporal) = &table.roles.temporal {
                out.push_str(&format!("  year column: {temporal}\n"));
            }
            let metrics: Vec<String> = table
                .roles
                .metrics
                .iter()
                .map(|m| match &m.unit {
                    Some(unit) => format!("{} ({unit})", m.name),
                    None => m.name.clone(),
                })
                .collect();
            if !metrics.is_empty() {
                out.push_str(&format!("  metrics: {}\n", metrics.join(", ")));
            }
            if let Some((min, max)) = table.date_range {
                out.push_str(&format!("  years covered: {min}-{max}\n"));
            }
            if let Some(source) = &table.source {
                out.push_str(&format!("  source: {}\n", source.description));
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn crop_yield_columns() -> Vec<ColumnInfo> {
        [
            ("Crop", "TEXT"),
            ("Crop_Year", "INTEGER"),
            ("Season", "TEXT"),
            ("State", "TEXT"),
            ("Area", "REAL"),
            ("Production", "REAL"),
            ("Annual_Rainfall", "REAL"),
            ("Fertilizer", "REAL"),
            ("Pesticide", "REAL"),
            ("Yield", "REAL"),
        ]
        .into_iter()
        .map(|(n, t)| ColumnInfo::new(n, t))
        .collect()
    }

    /// In-memory snapshot matching the seeded fixture database
    pub(crate) fn crop_yield_schema() -> SchemaMetadata {
        let columns = crop_yield_columns();
        let roles = KeyColumnRoles::infer(&columns);
        let mut distinct_values = BTreeMap::new();
        distinct_values.insert(
            "State".to_string(),
            vec!["Assam".to_string(), "Odisha".to_string(), "Punjab".to_string()],
        );
        distinct_values.insert("Crop".to_string(), vec!["Rice".to_string(), "Wheat".to_string()]);

        SchemaMetadata::new(vec![TableMetadata {
            name: "crop_yield".to_string(),
            columns,
            roles,
            date_range: Some((2010, 2018)),
            sample_rows: Vec::new(),
            distinct_values,
            row_count: 54,
            source: Some(DataSourceConfig::crop_yield()),
        }])
    }

    #[test]
    fn test_infers_crop_yield_roles() {
        let roles = KeyColumnRoles::infer(&crop_yield_columns());
        assert_eq!(roles.entity.as_deref(), Some("State"));
        assert_eq!(roles.category.as_deref(), Some("Crop"));
        assert_eq!(roles.temporal.as_deref(), Some("Crop_Year"));
        assert_eq!(roles.season.as_deref(), Some("Season"));

        let metrics: Vec<(&str, AggregateFn)> =
            roles.metrics.iter().map(|m| (m.name.as_str(), m.aggregate)).collect();
        assert_eq!(
            metrics,
            vec![
                ("Area", AggregateFn::Sum),
                ("Production", AggregateFn::Sum),
                ("Annual_Rainfall", AggregateFn::Avg),
                ("Fertilizer", AggregateFn::Sum),
                ("Pesticide", AggregateFn::Sum),
                ("Yield", AggregateFn::Avg),
            ]
        );
    }

    #[test]
    fn test_primary_metric_and_years() {
        let schema = crop_yield_schema();
        let table = schema.primary_table().unwrap();
        assert_eq!(table.primary_metric().unwrap().name, "Production");
        assert_eq!(schema.max_year(), Some(2018));
        assert_eq!(schema.min_year(), Some(2010));
        assert_eq!(table.entity_values().len(), 3);
        assert_eq!(table.category_values(), ["Rice", "Wheat"]);
    }

    #[test]
    fn test_resolve_metric_is_case_insensitive() {
        let schema = crop_yield_schema();
        let (table, metric) = schema.resolve_metric("annual_rainfall").unwrap();
        assert_eq!(table.name, "crop_yield");
        assert_eq!(metric.name, "Annual_Rainfall");
        assert!(schema.resolve_metric("Humidity").is_none());
    }

    #[test]
    fn test_summary_mentions_roles_and_years() {
        let summary = crop_yield_schema().summary();
        assert!(summary.contains("Table crop_yield"));
        assert!(summary.contains("entity column: State"));
        assert!(summary.contains("Production (tonnes)"));
        assert!(summary.contains("years covered: 2010-2018"));
    }
}
