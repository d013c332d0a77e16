//! Predicate trees over record attributes.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A boolean condition over the attributes of one record.
///
/// Unlike a flat filter list, predicates nest freely: `And`/`Or` hold any
/// number of sub-predicates and `Not` negates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Always true.
    True,
    /// Always false.
    False,
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field is null or absent.
    IsNull { field: String },
    /// Field is present and not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// Field does not match a LIKE pattern.
    NotLike { field: String, pattern: String },
    /// All sub-predicates hold. An empty list is true.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds. An empty list is false.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Create an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal predicate.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than predicate.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal predicate.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than predicate.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal predicate.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN predicate.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            field: field.into(),
            values,
        }
    }

    /// Create a NOT IN predicate.
    pub fn not_in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::NotIn {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NULL predicate.
    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL predicate.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Predicate::IsNotNull {
            field: field.into(),
        }
    }

    /// Create a LIKE predicate.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Create a NOT LIKE predicate.
    pub fn not_like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::NotLike {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Conjunction of `self` and `other`, appending to an existing `And`.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut list) => {
                list.push(other);
                Predicate::And(list)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`, appending to an existing `Or`.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut list) => {
                list.push(other);
                Predicate::Or(list)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Negation of `self`.
    pub fn negate(self) -> Self {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Combine a sequence of predicates with AND, preserving order.
    ///
    /// Returns `None` for an empty sequence and the predicate itself for a
    /// single element.
    pub fn conjunction(mut predicates: Vec<Predicate>) -> Option<Self> {
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(Predicate::And(predicates)),
        }
    }
}

impl std::ops::BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        self.negate()
    }
}
