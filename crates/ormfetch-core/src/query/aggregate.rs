//! Projection and aggregate evaluation.
//!
//! Turns filtered, sorted records into attribute rows according to a
//! projection and optional group keys:
//!
//! - no group keys, no aggregates: one row per record
//! - no group keys, aggregates: a single row over every record
//! - group keys: one row per distinct key, in first-appearance order

use std::cmp::Ordering;

use super::filter::FilterEvaluator;
use crate::error::ContextError;
use ormfetch_proto::{AggregateFunction, AttributeMap, Projection, Record, SelectTerm, Value};

/// Evaluates projections over materialized records.
pub struct ProjectionEvaluator;

impl ProjectionEvaluator {
    /// Evaluate `projection` over `records`, which must already be filtered
    /// and sorted.
    pub fn evaluate(
        projection: &Projection,
        group_by: &[String],
        records: &[Record],
    ) -> Result<Vec<AttributeMap>, ContextError> {
        if !group_by.is_empty() {
            return Self::evaluate_grouped(projection, group_by, records);
        }

        if projection.has_aggregates() {
            let refs: Vec<&Record> = records.iter().collect();
            return Ok(vec![Self::project_group(&projection.terms, &refs)?]);
        }

        records
            .iter()
            .map(|record| Self::project_group(&projection.terms, &[record]))
            .collect()
    }

    fn evaluate_grouped(
        projection: &Projection,
        group_by: &[String],
        records: &[Record],
    ) -> Result<Vec<AttributeMap>, ContextError> {
        let mut groups: Vec<(Vec<Value>, Vec<&Record>)> = Vec::new();

        for record in records {
            let key: Vec<Value> = group_by
                .iter()
                .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
                .collect();

            let existing = groups.iter_mut().find(|(k, _)| {
                k.iter()
                    .zip(key.iter())
                    .all(|(a, b)| FilterEvaluator::values_equal(a, b))
            });
            match existing {
                Some((_, members)) => members.push(record),
                None => groups.push((key, vec![record])),
            }
        }

        groups
            .iter()
            .map(|(_, members)| Self::project_group(&projection.terms, members))
            .collect()
    }

    /// Project one group of records. Attribute terms read the first record.
    fn project_group(terms: &[SelectTerm], members: &[&Record]) -> Result<AttributeMap, ContextError> {
        let mut row = AttributeMap::new();
        let first = members.first();

        for term in terms {
            let value = match term {
                SelectTerm::Attribute { key_path, .. } => first
                    .and_then(|r| r.get(key_path))
                    .cloned()
                    .unwrap_or(Value::Null),
                SelectTerm::ObjectId { .. } => first
                    .map(|r| Value::String(r.id.to_string()))
                    .unwrap_or(Value::Null),
                SelectTerm::Aggregate {
                    function, key_path, ..
                } => Self::aggregate(*function, key_path.as_deref(), members)?,
            };
            row.insert(term.output_key(), value);
        }

        Ok(row)
    }

    fn aggregate(
        function: AggregateFunction,
        key_path: Option<&str>,
        members: &[&Record],
    ) -> Result<Value, ContextError> {
        let Some(field) = key_path else {
            return match function {
                AggregateFunction::Count => Ok(Value::Int64(members.len() as i64)),
                other => Err(ContextError::InvalidProjection(format!(
                    "{} requires a field",
                    other.name()
                ))),
            };
        };

        let values: Vec<&Value> = members
            .iter()
            .filter_map(|r| r.get(field))
            .filter(|v| !v.is_null())
            .collect();

        match function {
            AggregateFunction::Count => Ok(Value::Int64(values.len() as i64)),
            AggregateFunction::Sum => Self::sum(field, &values),
            AggregateFunction::Average => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let total = Self::sum(field, &values)?.as_f64().unwrap_or(0.0);
                Ok(Value::Float64(total / values.len() as f64))
            }
            AggregateFunction::Minimum => Self::extreme(field, &values, Ordering::Less),
            AggregateFunction::Maximum => Self::extreme(field, &values, Ordering::Greater),
        }
    }

    /// Integer sums stay integral; any float widens the sum to `Float64`.
    fn sum(field: &str, values: &[&Value]) -> Result<Value, ContextError> {
        let mut int_total: i64 = 0;
        let mut float_total: f64 = 0.0;
        let mut is_float = false;

        for value in values {
            match value {
                Value::Int32(i) => int_total = int_total.saturating_add(*i as i64),
                Value::Int64(i) => int_total = int_total.saturating_add(*i),
                Value::Float32(f) => {
                    is_float = true;
                    float_total += *f as f64;
                }
                Value::Float64(f) => {
                    is_float = true;
                    float_total += *f;
                }
                other => {
                    return Err(ContextError::InvalidProjection(format!(
                        "cannot sum {field} of type {}",
                        other.type_name()
                    )))
                }
            }
        }

        if is_float {
            Ok(Value::Float64(float_total + int_total as f64))
        } else {
            Ok(Value::Int64(int_total))
        }
    }

    fn extreme(field: &str, values: &[&Value], keep: Ordering) -> Result<Value, ContextError> {
        let mut best: Option<&Value> = None;
        for &value in values {
            best = match best {
                None => Some(value),
                Some(current) => match FilterEvaluator::compare_values(value, current) {
                    Some(ord) if ord == keep => Some(value),
                    Some(_) => Some(current),
                    None => {
                        return Err(ContextError::InvalidProjection(format!(
                            "{field} mixes {} and {}",
                            value.type_name(),
                            current.type_name()
                        )))
                    }
                },
            };
        }
        Ok(best.cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormfetch_proto::{ObjectId, ResultShape, StoreId};

    fn person(seq: u64, name: &str, city: &str, age: i32) -> Record {
        Record::new(
            ObjectId::from_sequence("Person", seq),
            StoreId::from("main"),
            vec![
                ("name".into(), Value::from(name)),
                ("city".into(), Value::from(city)),
                ("age".into(), Value::Int32(age)),
            ],
        )
    }

    fn people() -> Vec<Record> {
        vec![
            person(1, "Amy", "Oslo", 20),
            person(2, "Bob", "Rome", 17),
            person(3, "Cat", "Oslo", 40),
        ]
    }

    #[test]
    fn test_plain_rows() {
        let projection = Projection::of(
            ResultShape::AttributeMap,
            vec![SelectTerm::attribute("name"), SelectTerm::attribute("age")],
        );
        let rows = ProjectionEvaluator::evaluate(&projection, &[], &people()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("name"), Some(&Value::from("Bob")));
        assert_eq!(rows[1].keys().collect::<Vec<_>>(), vec!["name", "age"]);
    }

    #[test]
    fn test_aggregates_over_all_rows() {
        let projection = Projection::of(
            ResultShape::AttributeMap,
            vec![
                SelectTerm::count_all(),
                SelectTerm::sum("age"),
                SelectTerm::average("age"),
                SelectTerm::minimum("name"),
                SelectTerm::maximum("age"),
            ],
        );
        let rows = ProjectionEvaluator::evaluate(&projection, &[], &people()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("count(*)"), Some(&Value::Int64(3)));
        assert_eq!(row.get("sum(age)"), Some(&Value::Int64(77)));
        assert_eq!(row.get("average(age)"), Some(&Value::Float64(77.0 / 3.0)));
        assert_eq!(row.get("min(name)"), Some(&Value::from("Amy")));
        assert_eq!(row.get("max(age)"), Some(&Value::Int32(40)));
    }

    #[test]
    fn test_aggregates_over_nothing() {
        let projection = Projection::of(
            ResultShape::Scalar,
            vec![SelectTerm::count_all(), SelectTerm::maximum("age"), SelectTerm::average("age")],
        );
        let rows = ProjectionEvaluator::evaluate(&projection, &[], &[]).unwrap();
        assert_eq!(rows[0].get("count(*)"), Some(&Value::Int64(0)));
        assert_eq!(rows[0].get("max(age)"), Some(&Value::Null));
        assert_eq!(rows[0].get("average(age)"), Some(&Value::Null));
    }

    #[test]
    fn test_grouped() {
        let projection = Projection::of(
            ResultShape::AttributeMap,
            vec![
                SelectTerm::attribute("city"),
                SelectTerm::count_all().with_alias("people"),
            ],
        );
        let rows =
            ProjectionEvaluator::evaluate(&projection, &["city".to_string()], &people()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("city"), Some(&Value::from("Oslo")));
        assert_eq!(rows[0].get("people"), Some(&Value::Int64(2)));
        assert_eq!(rows[1].get("city"), Some(&Value::from("Rome")));
        assert_eq!(rows[1].get("people"), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_invalid_aggregates() {
        let projection = Projection::of(ResultShape::Scalar, vec![SelectTerm::sum("name")]);
        assert!(matches!(
            ProjectionEvaluator::evaluate(&projection, &[], &people()),
            Err(ContextError::InvalidProjection(_))
        ));

        let projection = Projection::of(
            ResultShape::Scalar,
            vec![SelectTerm::Aggregate {
                function: AggregateFunction::Sum,
                key_path: None,
                alias: None,
            }],
        );
        assert!(matches!(
            ProjectionEvaluator::evaluate(&projection, &[], &people()),
            Err(ContextError::InvalidProjection(_))
        ));
    }
}
