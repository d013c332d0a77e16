//! Sort specifications.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Order specification for one sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct OrderSpec {
    /// Attribute key path to order by.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Whether this spec sorts ascending.
    pub fn is_ascending(&self) -> bool {
        self.direction == Direction::Asc
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Direction {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl Direction {
    /// Apply this direction to an ascending comparison.
    pub fn apply(self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_direction_apply() {
        assert_eq!(Direction::Asc.apply(Ordering::Less), Ordering::Less);
        assert_eq!(Direction::Desc.apply(Ordering::Less), Ordering::Greater);
        assert!(OrderSpec::asc("name").is_ascending());
        assert!(!OrderSpec::desc("name").is_ascending());
    }
}
