//! Projection terms for value and attribute queries.

use serde::{Deserialize, Serialize};

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Count of rows or non-null values.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Average,
    /// Minimum value.
    Minimum,
    /// Maximum value.
    Maximum,
}

impl AggregateFunction {
    /// Lowercase function name used in default output keys.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
            AggregateFunction::Minimum => "min",
            AggregateFunction::Maximum => "max",
        }
    }
}

/// One column of a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectTerm {
    /// Raw attribute value.
    Attribute {
        key_path: String,
        alias: Option<String>,
    },
    /// Aggregate over the matching rows (or over each group).
    Aggregate {
        function: AggregateFunction,
        /// Attribute to aggregate; `None` means every row (`count(*)`).
        key_path: Option<String>,
        alias: Option<String>,
    },
    /// The record identifier.
    ObjectId { alias: Option<String> },
}

impl SelectTerm {
    /// Select a raw attribute.
    pub fn attribute(key_path: impl Into<String>) -> Self {
        SelectTerm::Attribute {
            key_path: key_path.into(),
            alias: None,
        }
    }

    /// Count rows.
    pub fn count_all() -> Self {
        Self::aggregate(AggregateFunction::Count, None)
    }

    /// Count non-null values of an attribute.
    pub fn count(key_path: impl Into<String>) -> Self {
        Self::aggregate(AggregateFunction::Count, Some(key_path.into()))
    }

    /// Sum an attribute.
    pub fn sum(key_path: impl Into<String>) -> Self {
        Self::aggregate(AggregateFunction::Sum, Some(key_path.into()))
    }

    /// Average an attribute.
    pub fn average(key_path: impl Into<String>) -> Self {
        Self::aggregate(AggregateFunction::Average, Some(key_path.into()))
    }

    /// Minimum of an attribute.
    pub fn minimum(key_path: impl Into<String>) -> Self {
        Self::aggregate(AggregateFunction::Minimum, Some(key_path.into()))
    }

    /// Maximum of an attribute.
    pub fn maximum(key_path: impl Into<String>) -> Self {
        Self::aggregate(AggregateFunction::Maximum, Some(key_path.into()))
    }

    /// Select the record identifier.
    pub fn object_id() -> Self {
        SelectTerm::ObjectId { alias: None }
    }

    fn aggregate(function: AggregateFunction, key_path: Option<String>) -> Self {
        SelectTerm::Aggregate {
            function,
            key_path,
            alias: None,
        }
    }

    /// Rename the output key of this term.
    pub fn with_alias(self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match self {
            SelectTerm::Attribute { key_path, .. } => SelectTerm::Attribute {
                key_path,
                alias: name,
            },
            SelectTerm::Aggregate {
                function, key_path, ..
            } => SelectTerm::Aggregate {
                function,
                key_path,
                alias: name,
            },
            SelectTerm::ObjectId { .. } => SelectTerm::ObjectId { alias: name },
        }
    }

    /// Whether this term aggregates rows.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, SelectTerm::Aggregate { .. })
    }

    /// Key under which this term's value is reported.
    pub fn output_key(&self) -> String {
        match self {
            SelectTerm::Attribute { alias: Some(a), .. }
            | SelectTerm::Aggregate { alias: Some(a), .. }
            | SelectTerm::ObjectId { alias: Some(a) } => a.clone(),
            SelectTerm::Attribute { key_path, .. } => key_path.clone(),
            SelectTerm::Aggregate {
                function, key_path, ..
            } => format!("{}({})", function.name(), key_path.as_deref().unwrap_or("*")),
            SelectTerm::ObjectId { alias: None } => "objectID".to_string(),
        }
    }
}

/// Shape of the values a request returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultShape {
    /// Full records.
    Record,
    /// Object identifiers only.
    Identifier,
    /// A single scalar from the first row.
    Scalar,
    /// One attribute map per row.
    AttributeMap,
}

/// Declared projection of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Selected terms, in output order.
    pub terms: Vec<SelectTerm>,
    /// Shape of the returned values.
    pub shape: ResultShape,
}

impl Projection {
    /// Full-record projection used by fetches and deletes.
    pub fn records() -> Self {
        Self {
            terms: vec![],
            shape: ResultShape::Record,
        }
    }

    /// Identifier projection.
    pub fn identifiers() -> Self {
        Self {
            terms: vec![],
            shape: ResultShape::Identifier,
        }
    }

    /// Projection of explicit terms with the given shape.
    pub fn of(shape: ResultShape, terms: Vec<SelectTerm>) -> Self {
        Self { terms, shape }
    }

    /// Whether any term aggregates rows.
    pub fn has_aggregates(&self) -> bool {
        self.terms.iter().any(SelectTerm::is_aggregate)
    }

    /// Output keys, in declaration order.
    pub fn output_keys(&self) -> Vec<String> {
        self.terms.iter().map(SelectTerm::output_key).collect()
    }
}
