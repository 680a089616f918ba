//! Deterministic answer skeleton
//!
//! The skeleton is computed from result rows only. Each statement is a plain
//! sentence; every figure written into a statement (values, years, counts,
//! ranks, percentages) is recorded in `numbers`, together with the numeric
//! cells of the rows shown to the model. Generated prose is later checked
//! against that set.

use crate::execution::QueryResult;
use crate::intent::{AggregateFn, IntentType, QueryIntent};
use crate::schema::{MetricColumn, SchemaMetadata};
use crate::store::Row;
use crate::synthesis::shape::ResultShape;
use serde::Serialize;

/// Leading rows quoted in a lookup skeleton
const LOOKUP_ROWS_STATED: usize = 5;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Skeleton {
    pub statements: Vec<String>,
    pub numbers: Vec<f64>,
}

impl Skeleton {
    /// Compute the skeleton for `intent` over `results`
    ///
    /// `preview_rows` is how many rows per result the model will see; their
    /// numeric cells become citable figures too.
    pub fn build(
        intent: &QueryIntent,
        results: &[QueryResult],
        schema: &SchemaMetadata,
        preview_rows: usize,
    ) -> Self {
        let mut sk = Skeleton::default();
        if let Some(scope) = &intent.temporal_scope {
            sk.year(scope.start_year);
            sk.year(scope.end_year);
            sk.count(usize::try_from(scope.span()).unwrap_or(0));
        }

        let usable: Vec<&QueryResult> = results.iter().filter(|r| r.has_rows()).collect();
        for result in &usable {
            sk.admit_rows(result.rows.iter().take(preview_rows));
        }
        if usable.is_empty() {
            return sk;
        }

        match intent.intent_type {
            IntentType::Compare => sk.compare(&usable, schema),
            IntentType::Trend => sk.trend(&usable, schema),
            IntentType::Extremum => sk.extremum(intent, &usable, schema),
            IntentType::Correlate => sk.correlate(&usable, schema),
            IntentType::Aggregate => sk.aggregate(intent, &usable, schema),
            IntentType::Lookup => sk.lookup(&usable, schema),
        }
        sk
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements as a markdown bullet list
    pub fn render(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn num(&mut self, value: f64) -> String {
        self.numbers.push(value);
        format_number(value)
    }

    fn year(&mut self, year: i64) -> String {
        self.numbers.push(year as f64);
        year.to_string()
    }

    fn count(&mut self, n: usize) -> String {
        self.numbers.push(n as f64);
        n.to_string()
    }

    fn percent(&mut self, part: f64, whole: f64) -> Option<String> {
        (whole != 0.0).then(|| format!("{}%", self.num(part / whole.abs() * 100.0)))
    }

    fn admit_rows<'r>(&mut self, rows: impl Iterator<Item = &'r Row>) {
        for row in rows {
            self.numbers.extend(row.iter().filter_map(|(_, v)| v.as_f64()));
        }
    }

    fn quantity(&mut self, value: f64, metric: &MetricColumn) -> String {
        let formatted = self.num(value);
        match &metric.unit {
            Some(unit) => format!("{formatted} {unit}"),
            None => formatted,
        }
    }

    /// Totals (or means for averaged measures) per compared value, then ranking and gap
    fn compare(&mut self, results: &[&QueryResult], schema: &SchemaMetadata) {
        let Some(shape) = ResultShape::of(results[0], schema) else {
            return;
        };
        let rows: Vec<&Row> = results.iter().flat_map(|r| r.rows.iter()).collect();

        for metric in &shape.metrics {
            let groups = group_values(&rows, |row| shape.row_label(row), &metric.name);
            let mut ranked: Vec<(String, f64)> = Vec::with_capacity(groups.len());

            for (label, values) in &groups {
                let n = values.len();
                let mean = values.iter().sum::<f64>() / n as f64;
                if shape.temporal.is_none() {
                    // Already aggregated over the whole window
                    let value: f64 = values.iter().sum();
                    ranked.push((label.clone(), value));
                    let statement = format!(
                        "{label}: {} {} {}",
                        metric.aggregate.word(),
                        metric.name,
                        self.quantity(value, metric)
                    );
                    self.statements.push(statement);
                    continue;
                }
                let years = self.count(n);
                let statement = if metric.aggregate == AggregateFn::Sum {
                    let total: f64 = values.iter().sum();
                    ranked.push((label.clone(), total));
                    format!(
                        "{label}: total {} {} over {years} year(s), {} per year on average",
                        metric.name,
                        self.quantity(total, metric),
                        self.quantity(mean, metric)
                    )
                } else {
                    ranked.push((label.clone(), mean));
                    format!(
                        "{label}: average {} {} across {years} year(s)",
                        metric.name,
                        self.quantity(mean, metric)
                    )
                };
                self.statements.push(statement);
            }

            if ranked.len() < 2 {
                continue;
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            let order: Vec<String> = ranked
                .iter()
                .enumerate()
                .map(|(i, (label, _))| format!("{}. {label}", self.count(i + 1)))
                .collect();
            self.statements
                .push(format!("Ranking by {}: {}", metric.name, order.join(", ")));

            let (top, top_value) = &ranked[0];
            let (second, second_value) = &ranked[1];
            let gap = top_value - second_value;
            let gap_text = self.quantity(gap, metric);
            let statement = match self.percent(gap, *second_value) {
                Some(pct) => format!("{top} exceeds {second} by {gap_text} ({pct})"),
                None => format!("{top} exceeds {second} by {gap_text}"),
            };
            self.statements.push(statement);
        }
    }

    /// First/last value, change, peak and low per series
    fn trend(&mut self, results: &[&QueryResult], schema: &SchemaMetadata) {
        for result in results {
            let Some(shape) = ResultShape::of(result, schema) else {
                continue;
            };
            let fallback = result.subject.clone().unwrap_or_else(|| "Overall".to_string());
            let rows: Vec<&Row> = result.rows.iter().collect();

            for metric in &shape.metrics {
                let series = group_points(&rows, &shape, &fallback, &metric.name);
                for (label, mut points) in series {
                    points.sort_by_key(|(year, _)| *year);
                    self.series(&label, metric, &points);
                }
            }
        }
    }

    fn series(&mut self, label: &str, metric: &MetricColumn, points: &[(i64, f64)]) {
        let (Some(&(first_year, first)), Some(&(last_year, last))) = (points.first(), points.last()) else {
            return;
        };
        if points.len() == 1 {
            let statement = format!(
                "{label}: {} was {} in {}",
                metric.name,
                self.quantity(first, metric),
                self.year(first_year)
            );
            self.statements.push(statement);
            return;
        }

        let change = last - first;
        let direction = if change > 0.0 {
            "rose"
        } else if change < 0.0 {
            "fell"
        } else {
            "was unchanged"
        };
        let from = self.quantity(first, metric);
        let from_year = self.year(first_year);
        let to = self.quantity(last, metric);
        let to_year = self.year(last_year);
        let delta = self.quantity(change.abs(), metric);
        let mut statement = format!(
            "{label}: {} {direction} from {from} in {from_year} to {to} in {to_year}, a change of {delta}",
            metric.name
        );
        if let Some(pct) = self.percent(change.abs(), first) {
            statement.push_str(&format!(" ({pct})"));
        }
        self.statements.push(statement);

        let peak = points.iter().copied().max_by(|a, b| a.1.total_cmp(&b.1));
        let low = points.iter().copied().min_by(|a, b| a.1.total_cmp(&b.1));
        if let (Some((peak_year, peak_value)), Some((low_year, low_value))) = (peak, low) {
            let statement = format!(
                "{label}: peak {} in {}, low {} in {}",
                self.quantity(peak_value, metric),
                self.year(peak_year),
                self.quantity(low_value, metric),
                self.year(low_year)
            );
            self.statements.push(statement);
        }
    }

    /// Winners, ties included; per year when the rows carry a year and a label
    fn extremum(&mut self, intent: &QueryIntent, results: &[&QueryResult], schema: &SchemaMetadata) {
        let direction = intent.direction.unwrap_or_default().word();
        let scope = intent
            .temporal_scope
            .as_ref()
            .map(|s| format!(" in {s}"))
            .unwrap_or_default();

        for result in results {
            let Some(shape) = ResultShape::of(result, schema) else {
                continue;
            };
            let Some(metric) = shape.metrics.first().copied() else {
                continue;
            };
            let per_year = shape.temporal.is_some() && !shape.labels().is_empty();

            if per_year {
                let mut by_year: Vec<(i64, Vec<String>, f64)> = Vec::new();
                for row in &result.rows {
                    let (Some(year), Some(label), Some(value)) =
                        (shape.year(row), shape.row_label(row), row.number(&metric.name))
                    else {
                        continue;
                    };
                    match by_year.iter_mut().find(|(y, _, _)| *y == year) {
                        Some((_, labels, _)) => labels.push(label),
                        None => by_year.push((year, vec![label], value)),
                    }
                }
                for (year, labels, value) in by_year {
                    let statement = format!(
                        "{}: {direction} {} was {} with {}",
                        self.year(year),
                        metric.name,
                        labels.join(", "),
                        self.quantity(value, metric)
                    );
                    self.statements.push(statement);
                }
                continue;
            }

            let mut winners = Vec::new();
            let mut value = None;
            for row in &result.rows {
                let label = shape
                    .row_label(row)
                    .or_else(|| shape.year(row).map(|y| self.year(y)));
                if let (Some(label), Some(v)) = (label, row.number(&metric.name)) {
                    winners.push(label);
                    value.get_or_insert(v);
                }
            }
            let Some(value) = value else {
                continue;
            };
            let tie = if winners.len() > 1 {
                format!(" (tie between {})", self.count(winners.len()))
            } else {
                String::new()
            };
            let statement = format!(
                "{} {}{scope}: {} with {}{tie}",
                capitalize(direction),
                metric.name,
                winners.join(", "),
                self.quantity(value, metric)
            );
            self.statements.push(statement);
        }
    }

    /// Pearson r over paired rows of the two metrics of each result
    fn correlate(&mut self, results: &[&QueryResult], schema: &SchemaMetadata) {
        for result in results {
            let Some(shape) = ResultShape::of(result, schema) else {
                continue;
            };
            let (Some(a), Some(b)) = (shape.metrics.first(), shape.metrics.get(1)) else {
                continue;
            };
            let pairs: Vec<(f64, f64)> = result
                .rows
                .iter()
                .filter_map(|row| Some((row.number(&a.name)?, row.number(&b.name)?)))
                .collect();
            let n = self.count(pairs.len());

            let statement = match pearson(&pairs) {
                Some(r) => {
                    let rounded = (r * 100.0).round() / 100.0;
                    self.numbers.push(r);
                    format!(
                        "Correlation between {} and {}: r = {} ({}) across {n} paired observations",
                        a.name,
                        b.name,
                        self.num(rounded),
                        strength_label(r)
                    )
                }
                None => format!(
                    "{} and {} could not be correlated: {n} paired observations without enough variation",
                    a.name, b.name
                ),
            };
            self.statements.push(statement);

            let mean = |values: Vec<f64>| values.iter().sum::<f64>() / values.len().max(1) as f64;
            let mean_a = mean(pairs.iter().map(|p| p.0).collect());
            let mean_b = mean(pairs.iter().map(|p| p.1).collect());
            if !pairs.is_empty() {
                let statement = format!(
                    "Average {} {}, average {} {}",
                    a.name,
                    self.quantity(mean_a, a),
                    b.name,
                    self.quantity(mean_b, b)
                );
                self.statements.push(statement);
            }
        }
    }

    fn aggregate(&mut self, intent: &QueryIntent, results: &[&QueryResult], schema: &SchemaMetadata) {
        let scope = intent
            .temporal_scope
            .as_ref()
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();

        for result in results {
            let Some(shape) = ResultShape::of(result, schema) else {
                continue;
            };
            for row in &result.rows {
                let label = shape.row_label(row).unwrap_or_else(|| "Overall".to_string());
                for metric in &shape.metrics {
                    let Some(value) = row.number(&metric.name) else {
                        continue;
                    };
                    let function = intent.aggregation.unwrap_or(metric.aggregate);
                    let value = if function == AggregateFn::Count {
                        self.num(value)
                    } else {
                        self.quantity(value, metric)
                    };
                    self.statements.push(format!(
                        "{label}: {} {} {value}{scope}",
                        function.word(),
                        metric.name
                    ));
                }
            }
        }
    }

    fn lookup(&mut self, results: &[&QueryResult], schema: &SchemaMetadata) {
        for result in results {
            let Some(shape) = ResultShape::of(result, schema) else {
                continue;
            };
            let statement = format!("{} matching row(s) found", self.count(result.row_count));
            self.statements.push(statement);

            for row in result.rows.iter().take(LOOKUP_ROWS_STATED) {
                let mut key = shape.row_label(row).unwrap_or_default();
                if let Some(year) = shape.year(row) {
                    let year = self.year(year);
                    key = if key.is_empty() { year } else { format!("{key}, {year}") };
                }
                let values: Vec<String> = shape
                    .metrics
                    .iter()
                    .filter_map(|m| row.number(&m.name).map(|v| (m, v)))
                    .map(|(m, v)| format!("{} {}", m.name, self.quantity(v, m)))
                    .collect();
                self.statements.push(format!("{key}: {}", values.join(", ")));
            }
        }
    }
}

/// Values of `column` grouped by row label, groups in first-seen order
fn group_values(
    rows: &[&Row],
    label: impl Fn(&Row) -> Option<String>,
    column: &str,
) -> Vec<(String, Vec<f64>)> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for row in rows {
        let (Some(label), Some(value)) = (label(row), row.number(column)) else {
            continue;
        };
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, values)) => values.push(value),
            None => groups.push((label, vec![value])),
        }
    }
    groups
}

/// (year, value) points per series label
fn group_points(
    rows: &[&Row],
    shape: &ResultShape<'_>,
    fallback: &str,
    column: &str,
) -> Vec<(String, Vec<(i64, f64)>)> {
    let mut series: Vec<(String, Vec<(i64, f64)>)> = Vec::new();
    for row in rows {
        let (Some(year), Some(value)) = (shape.year(row), row.number(column)) else {
            continue;
        };
        let label = shape.row_label(row).unwrap_or_else(|| fallback.to_string());
        match series.iter_mut().find(|(l, _)| *l == label) {
            Some((_, points)) => points.push((year, value)),
            None => series.push((label, vec![(year, value)])),
        }
    }
    series
}

/// Pearson correlation; `None` below three pairs or without variance
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 3 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

pub fn strength_label(r: f64) -> String {
    let strength = match r.abs() {
        a if a >= 0.7 => "strong",
        a if a >= 0.4 => "moderate",
        a if a >= 0.2 => "weak",
        _ => return "negligible".to_string(),
    };
    let sign = if r > 0.0 { "positive" } else { "negative" };
    format!("{strength} {sign}")
}

/// Two decimals at most, thousands grouped: 16200 -> "16,200", 1234.567 -> "1,234.57"
pub fn format_number(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let frac = frac_part.trim_end_matches('0');
    let sign = if value < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
