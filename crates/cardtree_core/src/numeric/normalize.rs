//! Precision-aware canonicalization of numeric property text.
//!
//! # Invariants
//! - Normalization never invents precision: text with fewer fractional digits
//!   than the target precision is returned unchanged (after trimming).
//! - Rounding is half away from zero.
//! - `merge_plan`/`make_uniq` keep the first representative of each class.

use super::number::Number;
use super::{NumericError, NumericResult};
use std::collections::HashMap;

/// Counts digits after the decimal point in raw text (`"2.000" -> 3`).
pub fn fractional_digits(text: &str) -> usize {
    text.trim()
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len())
}

/// Parses numeric property text, rejecting non-numeric input.
pub fn parse_numeric(text: &str) -> NumericResult<Number> {
    Number::parse(text).ok_or_else(|| NumericError::NotANumber(text.trim().to_string()))
}

/// Reformats `text` to at most `precision` fractional digits.
///
/// Returns `None` when `text` is not numeric.
pub fn normalize(text: &str, precision: u32) -> Option<String> {
    let trimmed = text.trim();
    let number = Number::parse(trimmed)?;
    if fractional_digits(trimmed) > precision as usize {
        return number.to_fixed(precision);
    }
    Some(trimmed.to_string())
}

/// Returns whether two numeric texts denote the same value at `precision`.
pub fn equivalent(left: &str, right: &str, precision: u32) -> bool {
    match (equivalence_key(left, precision), equivalence_key(right, precision)) {
        (Some(EquivalenceKey::Numeric(l)), Some(EquivalenceKey::Numeric(r))) => l == r,
        _ => false,
    }
}

/// Formats a computed number for display: rounded to `precision`, with
/// redundant trailing fractional zeros removed (`16.00 -> 16`, `16.50 -> 16.5`).
pub fn display_number(number: Number, precision: u32) -> Option<String> {
    let fixed = number.to_fixed(precision)?;
    Some(trim_trailing_zeros(&fixed))
}

/// Removes redundant trailing zeros from decimal text (`"3.10" -> "3.1"`).
pub fn trim_trailing_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        return "0".to_string();
    }
    trimmed.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EquivalenceKey {
    Numeric(Number),
    Text(String),
}

fn equivalence_key(text: &str, precision: u32) -> Option<EquivalenceKey> {
    let trimmed = text.trim();
    match Number::parse(trimmed) {
        Some(number) => Some(EquivalenceKey::Numeric(number.round_to_places(precision)?)),
        None => Some(EquivalenceKey::Text(trimmed.to_lowercase())),
    }
}

/// For each input index, returns the index of the canonical survivor of its
/// equivalence class at `precision`. Survivors map to themselves.
///
/// Non-numeric entries only merge with case-insensitively identical text.
pub fn merge_plan(values: &[&str], precision: u32) -> Vec<usize> {
    let mut first_seen: HashMap<EquivalenceKey, usize> = HashMap::new();
    let mut plan = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let key = equivalence_key(value, precision)
            .unwrap_or_else(|| EquivalenceKey::Text(value.to_string()));
        let survivor = *first_seen.entry(key).or_insert(index);
        plan.push(survivor);
    }
    plan
}

/// Deduplicates values by equivalence at `precision`, keeping the first
/// representative's original text in original relative order.
pub fn make_uniq(values: &[&str], precision: u32) -> Vec<String> {
    merge_plan(values, precision)
        .into_iter()
        .enumerate()
        .filter(|(index, survivor)| index == survivor)
        .map(|(index, _)| values[index].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        display_number, equivalent, fractional_digits, make_uniq, merge_plan, normalize,
        parse_numeric,
    };
    use crate::numeric::Number;

    #[test]
    fn normalize_rounds_only_when_too_precise() {
        assert_eq!(normalize("1.01", 1).as_deref(), Some("1.0"));
        assert_eq!(normalize("0.99", 1).as_deref(), Some("1.0"));
        assert_eq!(normalize("2.000", 1).as_deref(), Some("2.0"));
        assert_eq!(normalize("3", 1).as_deref(), Some("3"));
        assert_eq!(normalize(" 4.5 ", 2).as_deref(), Some("4.5"));
        assert_eq!(normalize("abc", 2), None);
    }

    #[test]
    fn equivalence_uses_rounded_values() {
        assert!(equivalent("1.00", "1", 2));
        assert!(equivalent("1.01", "0.99", 1));
        assert!(!equivalent("1.01", "0.99", 2));
        assert!(!equivalent("high", "high", 2));
    }

    #[test]
    fn make_uniq_keeps_first_representative_and_order() {
        let values = ["1.00", "1.01", "0.99", "2.000", "3"];
        assert_eq!(make_uniq(&values, 1), vec!["1.00", "2.000", "3"]);
        assert_eq!(merge_plan(&values, 1), vec![0, 0, 0, 3, 4]);
        assert_eq!(make_uniq(&values, 2).len(), 4);
    }

    #[test]
    fn display_trims_redundant_zeros() {
        assert_eq!(display_number(Number::parse("16").unwrap(), 2).unwrap(), "16");
        assert_eq!(display_number(Number::parse("16.01").unwrap(), 2).unwrap(), "16.01");
        assert_eq!(display_number(Number::parse("16.5").unwrap(), 2).unwrap(), "16.5");
        assert_eq!(display_number(Number::parse("-0.001").unwrap(), 2).unwrap(), "0");
    }

    #[test]
    fn counts_fraction_digits_and_rejects_text() {
        assert_eq!(fractional_digits("2.000"), 3);
        assert_eq!(fractional_digits("7"), 0);
        assert!(parse_numeric("seven").is_err());
    }
}
