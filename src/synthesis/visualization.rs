//! Rule-based chart choice
//!
//! Rules, first match wins, applied to the first result that has rows:
//! 1. correlate with two numeric metrics -> scatter
//! 2. a year column with at least two distinct years -> line over years,
//!    one series per entity (or category)
//! 3. an entity or category column -> bar
//! 4. otherwise no chart

use crate::execution::QueryResult;
use crate::intent::{IntentType, QueryIntent};
use crate::schema::SchemaMetadata;
use crate::synthesis::shape::ResultShape;
use crate::synthesis::{ChartType, VisualizationSpec};
use std::collections::BTreeSet;

pub fn choose_visualization(
    intent: &QueryIntent,
    results: &[QueryResult],
    schema: &SchemaMetadata,
) -> VisualizationSpec {
    let Some((index, result)) = results.iter().enumerate().find(|(_, r)| r.has_rows()) else {
        return none();
    };
    let Some(shape) = ResultShape::of(result, schema) else {
        return none();
    };

    let numeric: Vec<&str> = shape
        .metrics
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| result.rows.iter().any(|row| row.number(name).is_some()))
        .collect();
    let Some(&y) = numeric.first() else {
        return none();
    };
    let label = shape.labels().first().map(|c| c.to_string());

    if intent.intent_type == IntentType::Correlate && numeric.len() >= 2 {
        return VisualizationSpec {
            chart_type: ChartType::Scatter,
            result_index: index,
            x_field: numeric[0].to_string(),
            y_field: numeric[1].to_string(),
            grouping_field: label,
            title: format!("{} vs {}", numeric[1], numeric[0]),
        };
    }

    if let Some(temporal) = shape.temporal {
        let years: BTreeSet<i64> = result.rows.iter().filter_map(|row| shape.year(row)).collect();
        if years.len() >= 2 {
            let title = match &label {
                Some(by) => format!("{y} by {temporal} and {by}"),
                None => format!("{y} by {temporal}"),
            };
            return VisualizationSpec {
                chart_type: ChartType::Line,
                result_index: index,
                x_field: temporal.to_string(),
                y_field: y.to_string(),
                grouping_field: label,
                title,
            };
        }
    }

    match label {
        Some(x) => VisualizationSpec {
            chart_type: ChartType::Bar,
            result_index: index,
            title: format!("{y} by {x}"),
            x_field: x,
            y_field: y.to_string(),
            grouping_field: None,
        },
        None => none(),
    }
}

fn none() -> VisualizationSpec {
    VisualizationSpec {
        chart_type: ChartType::None,
        result_index: 0,
        x_field: String::new(),
        y_field: String::new(),
        grouping_field: None,
        title: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Row, Scalar};
    use crate::schema::tests::crop_yield_schema;
    use std::time::Duration;

    fn result(columns: &[&str], rows: Vec<Row>) -> QueryResult {
        QueryResult {
            plan_id: "p-1".to_string(),
            subject: None,
            source_table: "crop_yield".to_string(),
            sql: String::new(),
            parameters: vec![],
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: rows.len(),
            rows,
            execution_time: Duration::ZERO,
            error: None,
        }
    }

    fn state_year(state: &str, year: i64, production: f64) -> Row {
        [
            ("State", Scalar::text(state)),
            ("Crop_Year", Scalar::Integer(year)),
            ("Production", Scalar::Real(production)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_multi_year_series_is_a_line_colored_by_state() {
        let schema = crop_yield_schema();
        let intent = QueryIntent::new(IntentType::Compare, "q");
        let results = vec![result(
            &["State", "Crop_Year", "Production"],
            vec![state_year("Assam", 2017, 1.0), state_year("Assam", 2018, 2.0)],
        )];

        let chart = choose_visualization(&intent, &results, &schema);
        assert_eq!(chart.chart_type, ChartType::Line);
        assert_eq!(chart.x_field, "Crop_Year");
        assert_eq!(chart.y_field, "Production");
        assert_eq!(chart.grouping_field.as_deref(), Some("State"));
    }

    #[test]
    fn test_single_year_ranking_is_a_bar() {
        let schema = crop_yield_schema();
        let intent = QueryIntent::new(IntentType::Compare, "q");
        let results = vec![result(
            &["State", "Crop_Year", "Production"],
            vec![state_year("Assam", 2017, 1.0), state_year("Punjab", 2017, 2.0)],
        )];

        let chart = choose_visualization(&intent, &results, &schema);
        assert_eq!(chart.chart_type, ChartType::Bar);
        assert_eq!(chart.x_field, "State");
    }

    #[test]
    fn test_correlation_is_a_scatter() {
        let schema = crop_yield_schema();
        let intent = QueryIntent::new(IntentType::Correlate, "q");
        let row: Row = [
            ("State", Scalar::text("Assam")),
            ("Crop_Year", Scalar::Integer(2017)),
            ("Annual_Rainfall", Scalar::Real(2570.0)),
            ("Yield", Scalar::Real(4.7)),
        ]
        .into_iter()
        .collect();
        let results = vec![result(&["State", "Crop_Year", "Annual_Rainfall", "Yield"], vec![row])];

        let chart = choose_visualization(&intent, &results, &schema);
        assert_eq!(chart.chart_type, ChartType::Scatter);
        assert_eq!(chart.x_field, "Annual_Rainfall");
        assert_eq!(chart.y_field, "Yield");
    }

    #[test]
    fn test_no_rows_no_chart() {
        let schema = crop_yield_schema();
        let intent = QueryIntent::new(IntentType::Trend, "q");
        let results = vec![result(&["Crop_Year", "Production"], vec![])];
        assert_eq!(choose_visualization(&intent, &results, &schema).chart_type, ChartType::None);
    }
}
