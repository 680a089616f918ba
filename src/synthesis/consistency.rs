//! Numeric consistency between generated prose and computed figures

use regex::Regex;
use std::sync::OnceLock;

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Grouped thousands first so "16,200" is one number, not two
    RE.get_or_init(|| {
        Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("static regex")
    })
}

/// Every number written in `text`, as (matched text, value)
///
/// Signs are dropped: "2014-2018" is two years, and a decline written as
/// "-400" is checked as 400.
pub fn extract_numbers(text: &str) -> Vec<(String, f64)> {
    number_regex()
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str();
            raw.replace(',', "")
                .parse::<f64>()
                .ok()
                .map(|v| (raw.to_string(), v))
        })
        .collect()
}

/// Whether `value` matches any allowed figure within tolerance
pub fn is_traceable(value: f64, allowed: &[f64], relative_tolerance: f64, absolute_tolerance: f64) -> bool {
    allowed.iter().any(|a| {
        let a = a.abs();
        let diff = (value - a).abs();
        diff <= absolute_tolerance || diff <= relative_tolerance * a
    })
}

/// First number in `text` that matches no allowed figure
pub fn untraceable_number(
    text: &str,
    allowed: &[f64],
    relative_tolerance: f64,
    absolute_tolerance: f64,
) -> Option<String> {
    extract_numbers(text)
        .into_iter()
        .find(|(_, v)| !is_traceable(*v, allowed, relative_tolerance, absolute_tolerance))
        .map(|(raw, _)| raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_grouped_and_decimal_numbers() {
        let found: Vec<f64> = extract_numbers("Punjab produced 16,200 tonnes (up 9.09%) in 2014-2018")
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(found, vec![16200.0, 9.09, 2014.0, 2018.0]);
    }

    #[test]
    fn test_tolerances() {
        let allowed = [16200.0, 0.8734];
        assert!(is_traceable(16250.0, &allowed, 0.005, 0.01));
        assert!(!is_traceable(16300.0, &allowed, 0.005, 0.01));
        assert!(is_traceable(0.87, &allowed, 0.005, 0.01));
        assert!(!is_traceable(0.9, &allowed, 0.005, 0.01));
    }

    #[test]
    fn test_reports_first_untraceable_number() {
        let allowed = [2014.0, 16200.0];
        assert_eq!(untraceable_number("In 2014 Punjab led with 16,200 tonnes.", &allowed, 0.005, 0.01), None);
        assert_eq!(
            untraceable_number("In 2014 Punjab led with 17,000 tonnes.", &allowed, 0.005, 0.01).as_deref(),
            Some("17,000")
        );
        assert_eq!(untraceable_number("No figures here.", &[], 0.005, 0.01), None);
    }
}
