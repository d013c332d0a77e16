//! Sort comparison for records and cached sort keys.

use std::cmp::Ordering;

use super::filter::FilterEvaluator;
use ormfetch_proto::{OrderSpec, Record, Value};

/// Compare two optional values for sorting. NULLs and missing values sort first.
///
/// This is a total order: NaN sorts after every other number, and values of
/// incompatible types are ordered by type.
pub fn compare_values_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_present(a, b),
    }
}

/// Whether two values occupy the same place in the sort order.
pub fn sorts_equal(a: &Value, b: &Value) -> bool {
    compare_values_opt(Some(a), Some(b)) == Ordering::Equal
}

fn compare_present(a: &Value, b: &Value) -> Ordering {
    if let Some(ordering) = FilterEvaluator::compare_values(a, b) {
        return ordering;
    }
    if a.is_numeric() && b.is_numeric() {
        return is_nan(a).cmp(&is_nan(b));
    }
    type_rank(a).cmp(&type_rank(b))
}

fn is_nan(value: &Value) -> bool {
    value.as_f64().is_some_and(f64::is_nan)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Timestamp(_) => 5,
        Value::Uuid(_) => 6,
    }
}

/// Extract the sort key values of a record, one per spec.
pub fn sort_key(record: &Record, sort: &[OrderSpec]) -> Vec<Value> {
    sort.iter()
        .map(|spec| record.get(&spec.field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Compare two extracted sort keys under `sort`.
pub fn compare_keys(sort: &[OrderSpec], a: &[Value], b: &[Value]) -> Ordering {
    for (i, spec) in sort.iter().enumerate() {
        let cmp = spec
            .direction
            .apply(compare_values_opt(a.get(i), b.get(i)));
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

/// Compare two records under `sort`, breaking ties by identifier.
pub fn compare_records(sort: &[OrderSpec], a: &Record, b: &Record) -> Ordering {
    for spec in sort {
        let cmp = spec
            .direction
            .apply(compare_values_opt(a.get(&spec.field), b.get(&spec.field)));
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.id.cmp(&b.id)
}

/// Sort records in place.
pub fn sort_records(records: &mut [Record], sort: &[OrderSpec]) {
    records.sort_by(|a, b| compare_records(sort, a, b));
}
