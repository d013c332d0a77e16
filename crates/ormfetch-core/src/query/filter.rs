//! Predicate evaluation.
//!
//! This module provides the `FilterEvaluator` that evaluates predicate trees
//! against record field values. Both the in-memory context and the live
//! result controller use it to decide membership.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::ContextError;
use ormfetch_proto::{Predicate, Value};

/// Extract all field names referenced in a predicate.
pub fn extract_filter_fields(predicate: &Predicate) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    extract_filter_fields_inner(predicate, &mut fields);
    fields
}

fn extract_filter_fields_inner(predicate: &Predicate, fields: &mut BTreeSet<String>) {
    match predicate {
        Predicate::True | Predicate::False => {}
        Predicate::Eq { field, .. }
        | Predicate::Ne { field, .. }
        | Predicate::Lt { field, .. }
        | Predicate::Le { field, .. }
        | Predicate::Gt { field, .. }
        | Predicate::Ge { field, .. }
        | Predicate::In { field, .. }
        | Predicate::NotIn { field, .. }
        | Predicate::IsNull { field }
        | Predicate::IsNotNull { field }
        | Predicate::Like { field, .. }
        | Predicate::NotLike { field, .. } => {
            fields.insert(field.clone());
        }
        Predicate::And(list) | Predicate::Or(list) => {
            for p in list {
                extract_filter_fields_inner(p, fields);
            }
        }
        Predicate::Not(inner) => extract_filter_fields_inner(inner, fields),
    }
}

/// Evaluates predicates against record data.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a predicate against a row of field values.
    ///
    /// Missing fields behave as null: comparisons against them are false.
    /// Ordering comparisons between incompatible non-null types and LIKE on
    /// non-string values are malformed and fail.
    pub fn evaluate(predicate: &Predicate, row: &[(String, Value)]) -> Result<bool, ContextError> {
        match predicate {
            Predicate::True => Ok(true),
            Predicate::False => Ok(false),
            Predicate::Eq { field, value } => {
                Ok(Self::non_null(row, field).is_some_and(|fv| Self::values_equal(fv, value)))
            }
            Predicate::Ne { field, value } => {
                Ok(Self::non_null(row, field).is_some_and(|fv| !Self::values_equal(fv, value)))
            }
            Predicate::Lt { field, value } => Self::compare_field(row, field, value, Ordering::is_lt),
            Predicate::Le { field, value } => Self::compare_field(row, field, value, Ordering::is_le),
            Predicate::Gt { field, value } => Self::compare_field(row, field, value, Ordering::is_gt),
            Predicate::Ge { field, value } => Self::compare_field(row, field, value, Ordering::is_ge),
            Predicate::In { field, values } => Ok(Self::non_null(row, field)
                .is_some_and(|fv| values.iter().any(|v| Self::values_equal(fv, v)))),
            Predicate::NotIn { field, values } => match Self::non_null(row, field) {
                Some(fv) => Ok(!values.iter().any(|v| Self::values_equal(fv, v))),
                None => Ok(true), // NULL is not in any set
            },
            Predicate::IsNull { field } => Ok(Self::non_null(row, field).is_none()),
            Predicate::IsNotNull { field } => Ok(Self::non_null(row, field).is_some()),
            Predicate::Like { field, pattern } => {
                Self::like_field(row, field, pattern).map(|m| m.unwrap_or(false))
            }
            Predicate::NotLike { field, pattern } => {
                Self::like_field(row, field, pattern).map(|m| m.map(|b| !b).unwrap_or(true))
            }
            Predicate::And(list) => {
                for p in list {
                    if !Self::evaluate(p, row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(list) => {
                for p in list {
                    if Self::evaluate(p, row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Self::evaluate(inner, row).map(|b| !b),
        }
    }

    /// Get a field value from a row by name.
    pub fn get_field_value<'a>(row: &'a [(String, Value)], field: &str) -> Option<&'a Value> {
        row.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }

    fn non_null<'a>(row: &'a [(String, Value)], field: &str) -> Option<&'a Value> {
        Self::get_field_value(row, field).filter(|v| !v.is_null())
    }

    /// Compare a field value with an ordering test.
    fn compare_field<F>(
        row: &[(String, Value)],
        field: &str,
        value: &Value,
        test: F,
    ) -> Result<bool, ContextError>
    where
        F: FnOnce(Ordering) -> bool,
    {
        let Some(fv) = Self::non_null(row, field) else {
            return Ok(false); // Missing field doesn't match
        };
        if value.is_null() {
            return Ok(false);
        }
        match Self::compare_values(fv, value) {
            Some(ord) => Ok(test(ord)),
            None => Err(ContextError::InvalidPredicate(format!(
                "cannot compare {field} ({}) with {}",
                fv.type_name(),
                value.type_name()
            ))),
        }
    }

    fn like_field(
        row: &[(String, Value)],
        field: &str,
        pattern: &str,
    ) -> Result<Option<bool>, ContextError> {
        match Self::non_null(row, field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(Self::like_match(s, pattern))),
            Some(other) => Err(ContextError::InvalidPredicate(format!(
                "LIKE on {field} requires a string, found {}",
                other.type_name()
            ))),
        }
    }

    /// Check if two values are equal.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Self::compare_values(a, b) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int64(b)) => Some((*a as i64).cmp(b)),
            (Value::Int64(a), Value::Int32(b)) => Some(a.cmp(&(*b as i64))),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            _ => None, // Incompatible types
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\\%` matches literal `%`
    /// - `\\_` matches literal `_`
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        Self::like_match_from(&value, &pattern)
    }

    fn like_match_from(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => {
                if rest.is_empty() {
                    return true;
                }
                (0..=value.len()).any(|skip| Self::like_match_from(&value[skip..], rest))
            }
            Some(('_', rest)) => !value.is_empty() && Self::like_match_from(&value[1..], rest),
            Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
                (Some((p, rest)), Some((c, tail))) if p == c => Self::like_match_from(tail, rest),
                _ => false,
            },
            Some((p, rest)) => match value.split_first() {
                Some((c, tail)) if c == p => Self::like_match_from(tail, rest),
                _ => false,
            },
        }
    }
}
