//! Ordered, filterable values extracted from a cell property.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};

/// A property value. Values of the same variant are totally ordered;
/// values of different variants are incomparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparableValue {
    /// Case-preserving string; filter is a case-sensitive substring test.
    Str(String),
    /// Instant; filter tests the RFC 3339 rendering for a substring.
    Time(DateTime<Utc>),
    Int(i64),
    /// Character count of a string.
    RuneCount(usize),
}

impl ComparableValue {
    pub fn rune_count(s: &str) -> Self { ComparableValue::RuneCount(s.chars().count()) }

    /// Three-way compare; `None` when the variants differ.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (ComparableValue::Str(a), ComparableValue::Str(b)) => Some(a.cmp(b)),
            (ComparableValue::Time(a), ComparableValue::Time(b)) => Some(a.cmp(b)),
            (ComparableValue::Int(a), ComparableValue::Int(b)) => Some(a.cmp(b)),
            (ComparableValue::RuneCount(a), ComparableValue::RuneCount(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Filter predicate against a raw query string.
    pub fn contains(&self, query: &str) -> bool {
        match self {
            ComparableValue::Str(s) => s.contains(query),
            ComparableValue::Time(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true).contains(query),
            ComparableValue::Int(v) => query.trim().parse::<i64>().map(|q| q == *v).unwrap_or(false),
            ComparableValue::RuneCount(n) => query.trim().parse::<usize>().map(|q| q == *n).unwrap_or(false),
        }
    }
}

impl PartialOrd for ComparableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { self.compare(other) }
}

impl From<&str> for ComparableValue {
    fn from(v: &str) -> Self { ComparableValue::Str(v.to_string()) }
}

impl From<String> for ComparableValue {
    fn from(v: String) -> Self { ComparableValue::Str(v) }
}

impl From<DateTime<Utc>> for ComparableValue {
    fn from(v: DateTime<Utc>) -> Self { ComparableValue::Time(v) }
}

impl From<i64> for ComparableValue {
    fn from(v: i64) -> Self { ComparableValue::Int(v) }
}

impl From<i32> for ComparableValue {
    fn from(v: i32) -> Self { ComparableValue::Int(v as i64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn samples() -> Vec<ComparableValue> {
        vec![
            "alpha".into(),
            "Beta".into(),
            "beta".into(),
            ComparableValue::Int(-3),
            ComparableValue::Int(7),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap().into(),
            Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap().into(),
            ComparableValue::rune_count("héllo"),
            ComparableValue::rune_count("hi"),
        ]
    }

    #[test]
    fn compare_is_reflexive_and_antisymmetric() {
        let vals = samples();
        for a in vals.iter() {
            assert_eq!(a.compare(a), Some(Ordering::Equal));
            for b in vals.iter() {
                match (a.compare(b), b.compare(a)) {
                    (Some(x), Some(y)) => {
                        assert_eq!(x, y.reverse());
                        assert_eq!(x == Ordering::Equal, a == b);
                    }
                    (None, None) => {}
                    other => panic!("asymmetric comparability: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn compare_is_transitive_within_variant() {
        let vals = samples();
        for a in vals.iter() {
            for b in vals.iter() {
                for c in vals.iter() {
                    if a.compare(b) == Some(Ordering::Less) && b.compare(c) == Some(Ordering::Less) {
                        assert_eq!(a.compare(c), Some(Ordering::Less));
                    }
                }
            }
        }
    }

    #[test]
    fn string_order_is_case_preserving() {
        let upper: ComparableValue = "Beta".into();
        let lower: ComparableValue = "beta".into();
        assert_eq!(upper.compare(&lower), Some(Ordering::Less));
        assert!(lower.contains("et"));
        assert!(!lower.contains("ET"));
    }

    #[test]
    fn time_filters_on_rfc3339_text() {
        let t: ComparableValue = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap().into();
        assert!(t.contains("2021-06-01"));
        assert!(t.contains("T12:00:00Z"));
        assert!(!t.contains("2020"));
    }

    #[test]
    fn numeric_filters_require_exact_match() {
        assert!(ComparableValue::Int(7).contains("7"));
        assert!(!ComparableValue::Int(7).contains("70"));
        assert!(!ComparableValue::Int(7).contains("seven"));
        assert!(ComparableValue::rune_count("héllo").contains("5"));
    }

    #[test]
    fn mixed_variants_are_incomparable() {
        let s: ComparableValue = "1".into();
        assert_eq!(s.partial_cmp(&ComparableValue::Int(1)), None);
    }
}
