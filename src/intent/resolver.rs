//! Resolution of model-supplied values against the dataset's value domains
//!
//! Entity and category names are fuzzy-matched (normalized Levenshtein
//! similarity) to their canonical spelling; metric names are matched to
//! metric columns through a small alias table; time phrases are turned into
//! absolute year windows. Anything that cannot be resolved fails closed.

use crate::error::IntentExtractionError;
use crate::intent::TemporalScope;
use crate::schema::MetricColumn;
use regex::Regex;
use std::sync::OnceLock;

/// Outcome of matching one raw value against a value domain
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Exact(String),
    Fuzzy { value: String, similarity: f64 },
    Unresolved { closest: Option<String> },
}

/// Fuzzy matcher with a fixed acceptance threshold
#[derive(Clone, Debug)]
pub struct EntityResolver {
    threshold: f64,
}

/// Below this a candidate is not even worth suggesting
const HINT_SIMILARITY: f64 = 0.5;

impl EntityResolver {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Match `raw` to a candidate; ties go to the earlier candidate
    pub fn resolve(&self, raw: &str, candidates: &[String]) -> Resolution {
        let needle = normalize(raw);
        if needle.is_empty() {
            return Resolution::Unresolved { closest: None };
        }

        if let Some(exact) = candidates.iter().find(|c| normalize(c) == needle) {
            return Resolution::Exact(exact.clone());
        }

        let mut best: Option<(&String, f64)> = None;
        for candidate in candidates {
            let score = similarity(&needle, &normalize(candidate));
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((value, similarity)) if similarity >= self.threshold => Resolution::Fuzzy {
                value: value.clone(),
                similarity,
            },
            Some((value, similarity)) if similarity >= HINT_SIMILARITY => Resolution::Unresolved {
                closest: Some(value.clone()),
            },
            _ => Resolution::Unresolved { closest: None },
        }
    }

    /// Exact (normalized) membership, no fuzziness
    pub fn exact<'a>(&self, raw: &str, candidates: &'a [String]) -> Option<&'a String> {
        let needle = normalize(raw);
        candidates.iter().find(|c| normalize(c) == needle)
    }
}

/// Lowercase, trim and collapse inner whitespace
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 1 - distance / longer length, in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Words people use for the measures, mapped to a fragment of the column name
const METRIC_ALIASES: [(&str, &str); 9] = [
    ("output", "production"),
    ("produce", "production"),
    ("rain", "rainfall"),
    ("precipitation", "rainfall"),
    ("acreage", "area"),
    ("cultivated area", "area"),
    ("productivity", "yield"),
    ("fertiliser", "fertilizer"),
    ("pesticides", "pesticide"),
];

/// Ground a metric name to a metric column, or `None`
pub fn resolve_metric(raw: &str, metrics: &[MetricColumn], resolver: &EntityResolver) -> Option<String> {
    let key = squash(raw);
    if key.is_empty() {
        return None;
    }
    let key = METRIC_ALIASES
        .iter()
        .find(|(alias, _)| squash(alias) == key)
        .map(|(_, target)| squash(target))
        .unwrap_or(key);

    // Exact column name, then containment ("rainfall" -> Annual_Rainfall), then fuzzy
    if let Some(m) = metrics.iter().find(|m| squash(&m.name) == key) {
        return Some(m.name.clone());
    }
    if key.len() >= 4 {
        if let Some(m) = metrics.iter().find(|m| squash(&m.name).contains(&key)) {
            return Some(m.name.clone());
        }
    }
    let names: Vec<String> = metrics.iter().map(|m| m.name.clone()).collect();
    match resolver.resolve(raw, &names) {
        Resolution::Exact(name) | Resolution::Fuzzy { value: name, .. } => Some(name),
        Resolution::Unresolved { .. } => None,
    }
}

/// Lowercase alphanumerics only
fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn relative_window_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:last|past|previous|recent|preceding)\s+(?:(\d+|one|two|three|four|five|six|seven|eight|nine|ten|a)\s+)?(years?|decades?)\b",
        )
        .expect("static regex")
    })
}

/// Plausible bounds for any year a question can ask about
pub const EARLIEST_YEAR: i64 = 1800;
pub const LATEST_YEAR: i64 = 2999;

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(1[89]\d{2}|2\d{3})\b").expect("static regex"))
}

fn count_word(word: &str) -> Option<i64> {
    let n = match word.to_lowercase().as_str() {
        "a" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse().ok()?,
    };
    Some(n)
}

/// Resolve "last N years" / "past decade" style phrases against `max_year`
///
/// Returns `Ok(None)` when the phrase is not a relative window. The window
/// ends at `max_year` and covers N years including it.
pub fn resolve_relative_window(
    phrase: &str,
    max_year: Option<i64>,
) -> Result<Option<TemporalScope>, IntentExtractionError> {
    let Some(caps) = relative_window_regex().captures(phrase) else {
        return Ok(None);
    };

    let count = match caps.get(1) {
        Some(m) => count_word(m.as_str())
            .ok_or_else(|| IntentExtractionError::temporal(phrase, "unreadable window length"))?,
        None => 1,
    };
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let years = if unit.starts_with("decade") { count.checked_mul(10) } else { Some(count) }
        .ok_or_else(|| IntentExtractionError::temporal(phrase, "window is too long"))?;

    if years <= 0 {
        return Err(IntentExtractionError::temporal(phrase, "window must cover at least one year"));
    }
    let Some(max_year) = max_year else {
        return Err(IntentExtractionError::temporal(phrase, "dataset has no year column"));
    };

    let start_year = max_year
        .checked_sub(years - 1)
        .filter(|start| *start >= EARLIEST_YEAR)
        .ok_or_else(|| {
            IntentExtractionError::temporal(phrase, format!("window reaches before {EARLIEST_YEAR}"))
        })?;

    Ok(Some(TemporalScope {
        start_year,
        end_year: max_year,
        relative_window: Some(phrase.trim().to_string()),
    }))
}

/// Reject windows outside [`EARLIEST_YEAR`, `LATEST_YEAR`]
pub fn check_year_bounds(
    scope: TemporalScope,
    phrase: &str,
) -> Result<TemporalScope, IntentExtractionError> {
    let in_range = |year: i64| (EARLIEST_YEAR..=LATEST_YEAR).contains(&year);
    if in_range(scope.start_year) && in_range(scope.end_year) {
        Ok(scope)
    } else {
        Err(IntentExtractionError::temporal(
            phrase,
            format!("years must lie between {EARLIEST_YEAR} and {LATEST_YEAR}"),
        ))
    }
}

/// Resolve any time phrase: relative windows, "2014", "2010-2015",
/// "since 2012", "before 2005"
pub fn resolve_time_phrase(
    phrase: &str,
    min_year: Option<i64>,
    max_year: Option<i64>,
) -> Result<TemporalScope, IntentExtractionError> {
    if let Some(scope) = resolve_relative_window(phrase, max_year)? {
        return Ok(scope);
    }

    let years: Vec<i64> = year_regex()
        .find_iter(phrase)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    let lower = phrase.to_lowercase();

    match years.as_slice() {
        [] => Err(IntentExtractionError::temporal(phrase, "no year or relative window found")),
        [year] if lower.contains("since") || lower.contains("after") || lower.contains("onward") => {
            let end = max_year
                .ok_or_else(|| IntentExtractionError::temporal(phrase, "dataset has no year column"))?;
            Ok(TemporalScope::years(*year, end.max(*year)))
        }
        [year] if lower.contains("before") || lower.contains("until") || lower.contains("till") => {
            let start = min_year
                .ok_or_else(|| IntentExtractionError::temporal(phrase, "dataset has no year column"))?;
            Ok(TemporalScope::years(start.min(*year), *year))
        }
        [year] => Ok(TemporalScope::years(*year, *year)),
        [first, second, ..] => Ok(TemporalScope::years(*first, *second)),
    }
}
