//! Query evaluation shared by contexts and live result controllers.
//!
//! - [`filter`] evaluates predicates against record fields
//! - [`ordering`] compares records under a sort sequence
//! - [`aggregate`] evaluates projections, grouping, and aggregates

pub mod aggregate;
pub mod filter;
pub mod ordering;

pub use aggregate::ProjectionEvaluator;
pub use filter::{extract_filter_fields, FilterEvaluator};
pub use ordering::{compare_keys, compare_records, compare_values_opt, sort_key, sort_records, sorts_equal};
