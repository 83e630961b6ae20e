//! Value comparison and three-valued predicate logic.
//!
//! A predicate evaluates to `Some(true)`, `Some(false)`, or `None` for
//! unknown. Any comparison involving null is unknown; rows are kept only when
//! their predicate is `Some(true)`.

use std::cmp::Ordering;

use qdsl_proto::{CompareOp, Value};

/// Evaluates comparisons and connectives over values.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Compare two values with `op`. Unknown when either side is null or the
    /// values are incomparable.
    pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Option<bool> {
        if left.is_null() || right.is_null() {
            return None;
        }
        let ord = Self::compare_values(left, right)?;
        Some(match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        })
    }

    /// Inclusive range check.
    pub fn between(value: &Value, low: &Value, high: &Value) -> Option<bool> {
        Self::and([
            Self::compare(CompareOp::Ge, value, low),
            Self::compare(CompareOp::Le, value, high),
        ])
    }

    /// Set membership. A miss against a set holding null is unknown.
    pub fn in_set<'v>(value: &Value, set: impl IntoIterator<Item = &'v Value>) -> Option<bool> {
        if value.is_null() {
            return None;
        }
        let mut saw_null = false;
        for candidate in set {
            if candidate.is_null() {
                saw_null = true;
            } else if Self::values_equal(value, candidate) {
                return Some(true);
            }
        }
        if saw_null {
            None
        } else {
            Some(false)
        }
    }

    /// LIKE check; unknown for null.
    pub fn like(value: &Value, pattern: &str) -> Option<bool> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::like_match(s, pattern)),
            _ => Some(false),
        }
    }

    /// Three-valued conjunction: false wins over unknown.
    pub fn and(parts: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
        let mut result = Some(true);
        for part in parts {
            match part {
                Some(false) => return Some(false),
                None => result = None,
                Some(true) => {}
            }
        }
        result
    }

    /// Three-valued disjunction: true wins over unknown.
    pub fn or(parts: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
        let mut result = Some(false);
        for part in parts {
            match part {
                Some(true) => return Some(true),
                None => result = None,
                Some(false) => {}
            }
        }
        result
    }

    /// Three-valued negation.
    pub fn not(value: Option<bool>) -> Option<bool> {
        value.map(|b| !b)
    }

    /// Equality across numeric widths.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        Self::compare_values(a, b) == Some(Ordering::Equal)
    }

    /// Order two non-null values. Integers and floats compare numerically;
    /// mismatched kinds are incomparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int64(b)) => Some((*a as i64).cmp(b)),
            (Value::Int64(a), Value::Int32(b)) => Some(a.cmp(&(*b as i64))),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Float64(a), Value::Int32(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Int32(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\%` and `\_` match the literal character
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let mut chars = value.chars().peekable();
        let mut pattern_chars = pattern.chars().peekable();

        Self::like_match_recursive(&mut chars, &mut pattern_chars)
    }

    fn like_match_recursive(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        pattern: &mut std::iter::Peekable<std::str::Chars>,
    ) -> bool {
        loop {
            match (pattern.peek().copied(), chars.peek().copied()) {
                (None, None) => return true,
                (None, Some(_)) => return false,
                (Some('%'), _) => {
                    pattern.next();
                    if pattern.peek().is_none() {
                        return true;
                    }

                    // Let % absorb 0, 1, 2, ... characters.
                    loop {
                        let mut pattern_clone = pattern.clone();
                        let mut chars_clone = chars.clone();
                        if Self::like_match_recursive(&mut chars_clone, &mut pattern_clone) {
                            return true;
                        }
                        if chars.next().is_none() {
                            return false;
                        }
                    }
                }
                (Some('_'), Some(_)) => {
                    pattern.next();
                    chars.next();
                }
                (Some('_'), None) => return false,
                (Some('\\'), _) => {
                    pattern.next();
                    match (pattern.next(), chars.next()) {
                        (Some(p), Some(c)) if p == c => {}
                        _ => return false,
                    }
                }
                (Some(p), Some(c)) => {
                    if p != c {
                        return false;
                    }
                    pattern.next();
                    chars.next();
                }
                (Some(_), None) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_comparison_is_unknown() {
        assert_eq!(
            FilterEvaluator::compare(CompareOp::Eq, &Value::Null, &Value::Null),
            None
        );
        assert_eq!(
            FilterEvaluator::compare(CompareOp::Ne, &Value::Int32(1), &Value::Null),
            None
        );
    }

    #[test]
    fn test_numeric_widths_compare() {
        assert_eq!(
            FilterEvaluator::compare(CompareOp::Ge, &Value::Int32(30), &Value::Float64(25.0)),
            Some(true)
        );
        assert!(FilterEvaluator::values_equal(
            &Value::Int64(3),
            &Value::Int32(3)
        ));
    }

    #[test]
    fn test_between_inclusive() {
        let v = Value::Int32(20);
        assert_eq!(
            FilterEvaluator::between(&v, &Value::Int32(10), &Value::Int32(20)),
            Some(true)
        );
        assert_eq!(
            FilterEvaluator::between(&v, &Value::Int32(21), &Value::Int32(30)),
            Some(false)
        );
    }

    #[test]
    fn test_in_with_null_member() {
        let set = [Value::Int32(1), Value::Null];
        assert_eq!(FilterEvaluator::in_set(&Value::Int32(1), &set), Some(true));
        assert_eq!(FilterEvaluator::in_set(&Value::Int32(2), &set), None);
        assert_eq!(
            FilterEvaluator::in_set(&Value::Int32(2), &[Value::Int32(1)]),
            Some(false)
        );
    }

    #[test]
    fn test_three_valued_connectives() {
        assert_eq!(FilterEvaluator::and([Some(true), None]), None);
        assert_eq!(FilterEvaluator::and([None, Some(false)]), Some(false));
        assert_eq!(FilterEvaluator::or([None, Some(true)]), Some(true));
        assert_eq!(FilterEvaluator::or([None, Some(false)]), None);
        assert_eq!(FilterEvaluator::not(None), None);
        assert_eq!(FilterEvaluator::and([]), Some(true));
    }

    #[test]
    fn test_like_match() {
        assert!(FilterEvaluator::like_match("member1", "member%"));
        assert!(FilterEvaluator::like_match("member1", "%1"));
        assert!(FilterEvaluator::like_match("member1", "m_mber_"));
        assert!(!FilterEvaluator::like_match("member1", "member"));
        assert!(FilterEvaluator::like_match("50%", "50\\%"));
        assert!(!FilterEvaluator::like_match("50x", "50\\%"));
    }
}
