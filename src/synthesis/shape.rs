//! Which result columns are keys and which are measures

use crate::execution::QueryResult;
use crate::schema::{MetricColumn, SchemaMetadata, TableMetadata};
use crate::store::Row;

/// Roles of the columns of one result set
#[derive(Debug, Clone)]
pub(crate) struct ResultShape<'a> {
    pub entity: Option<&'a str>,
    pub category: Option<&'a str>,
    pub temporal: Option<&'a str>,
    pub metrics: Vec<&'a MetricColumn>,
}

impl<'a> ResultShape<'a> {
    pub fn of(result: &QueryResult, schema: &'a SchemaMetadata) -> Option<Self> {
        let table: &'a TableMetadata = schema
            .table(&result.source_table)
            .or_else(|| schema.primary_table())?;
        let has = |column: &'a Option<String>| -> Option<&'a str> {
            let column = column.as_deref()?;
            result.columns.iter().any(|c| c == column).then_some(column)
        };

        let roles = &table.roles;
        Some(Self {
            entity: has(&roles.entity),
            category: has(&roles.category),
            temporal: has(&roles.temporal),
            metrics: result
                .columns
                .iter()
                .filter_map(|c| roles.metrics.iter().find(|m| &m.name == c))
                .collect(),
        })
    }

    /// Non-temporal key columns present, entity first
    pub fn labels(&self) -> Vec<&'a str> {
        [self.entity, self.category].into_iter().flatten().collect()
    }

    /// Display label for a row from its non-temporal keys
    pub fn row_label(&self, row: &Row) -> Option<String> {
        let parts: Vec<String> = self
            .labels()
            .into_iter()
            .filter_map(|c| row.label(c))
            .map(|v| v.trim().to_string())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" / "))
    }

    pub fn year(&self, row: &Row) -> Option<i64> {
        self.temporal.and_then(|c| row.get(c)).and_then(|v| v.as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::crop_yield_schema;
    use crate::store::Scalar;
    use std::time::Duration;

    #[test]
    fn test_shape_of_compare_result() {
        let schema = crop_yield_schema();
        let result = QueryResult {
            plan_id: "compare-1".to_string(),
            subject: None,
            source_table: "crop_yield".to_string(),
            sql: String::new(),
            parameters: vec![],
            columns: vec!["State".into(), "Crop_Year".into(), "Production".into()],
            rows: vec![],
            row_count: 0,
            execution_time: Duration::ZERO,
            error: None,
        };
        let shape = ResultShape::of(&result, &schema).unwrap();
        assert_eq!(shape.entity, Some("State"));
        assert_eq!(shape.category, None);
        assert_eq!(shape.temporal, Some("Crop_Year"));
        assert_eq!(shape.metrics.len(), 1);

        let row: Row = [("State", Scalar::text("Assam ")), ("Crop_Year", Scalar::Integer(2014))]
            .into_iter()
            .collect();
        assert_eq!(shape.row_label(&row).as_deref(), Some("Assam"));
        assert_eq!(shape.year(&row), Some(2014));
    }
}
