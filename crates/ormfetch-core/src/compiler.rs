//! Clause sequence compiler.
//!
//! Merges an ordered clause sequence into one [`FetchDescriptor`]:
//!
//! - `From` and `Select` override: the last one wins.
//! - `Where` accumulates: predicates AND together in sequence order.
//! - `OrderBy` and `GroupBy` accumulate: keys concatenate in sequence order,
//!   never reordered or deduplicated.
//! - `Tweak` clauses are buffered and replayed in order after everything
//!   else, so they can override any structurally derived field.

use crate::clause::{Clause, ClauseCategory, ClauseKind, EntitySelector, Tweak};
use crate::descriptor::FetchDescriptor;
use crate::error::CompileError;
use ormfetch_proto::{OrderSpec, Predicate, Projection};

/// Compile with default settings.
pub fn compile<I>(category: ClauseCategory, clauses: I) -> Result<FetchDescriptor, CompileError>
where
    I: IntoIterator<Item = Clause>,
{
    ClauseCompiler::new().compile(category, clauses)
}

/// Compiler for clause sequences.
#[derive(Debug, Clone, Default)]
pub struct ClauseCompiler {
    default_batch_size: Option<usize>,
}

impl ClauseCompiler {
    /// Create a compiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp this batch size on descriptors before tweaks run.
    pub fn with_default_batch_size(mut self, size: Option<usize>) -> Self {
        self.default_batch_size = size;
        self
    }

    /// Compile `clauses` into a descriptor for `category`.
    pub fn compile<I>(
        &self,
        category: ClauseCategory,
        clauses: I,
    ) -> Result<FetchDescriptor, CompileError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let mut selector: Option<EntitySelector> = None;
        let mut predicates: Vec<Predicate> = Vec::new();
        let mut sort: Vec<OrderSpec> = Vec::new();
        let mut group_by: Vec<String> = Vec::new();
        let mut projection: Option<Projection> = None;
        let mut tweaks: Vec<Tweak> = Vec::new();

        for clause in clauses {
            let kind = clause.kind();
            if !category.permits(kind) {
                return Err(CompileError::ClauseNotPermitted {
                    category,
                    clause: kind,
                });
            }

            match clause {
                Clause::From(s) => selector = Some(s),
                Clause::Where(p) => predicates.push(p),
                Clause::OrderBy(specs) => sort.extend(specs),
                Clause::GroupBy(fields) => group_by.extend(fields),
                Clause::Select(p) => projection = Some(p),
                Clause::Tweak(t) => tweaks.push(t),
            }
        }

        let selector = selector.ok_or(CompileError::MissingRequiredClause {
            category,
            clause: ClauseKind::From,
        })?;

        let projection = match (category, projection) {
            (ClauseCategory::Query, Some(p)) => p,
            (ClauseCategory::Query, None) => {
                return Err(CompileError::MissingRequiredClause {
                    category,
                    clause: ClauseKind::Select,
                })
            }
            (_, _) => Projection::records(),
        };

        let mut descriptor = FetchDescriptor::new(category, selector.entity);
        descriptor.configurations = selector.configurations;
        descriptor.predicate = Predicate::conjunction(predicates);
        descriptor.sort = sort;
        descriptor.group_by = group_by;
        descriptor.projection = projection;
        descriptor.batch_size = self.default_batch_size;

        for tweak in &tweaks {
            tweak.apply(&mut descriptor);
        }

        tracing::trace!(
            category = %category,
            entity = %descriptor.entity,
            sort_keys = descriptor.sort.len(),
            tweaks = tweaks.len(),
            "compiled clause sequence"
        );

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormfetch_proto::{ResultShape, SelectTerm, StoreId};
    use pretty_assertions::assert_eq;

    fn from_person() -> Clause {
        Clause::From(EntitySelector::new("Person"))
    }

    #[test]
    fn test_fetch_defaults() {
        let descriptor = compile(ClauseCategory::Fetch, vec![from_person()]).unwrap();
        assert_eq!(descriptor, FetchDescriptor::new(ClauseCategory::Fetch, "Person"));
        assert_eq!(descriptor.projection.shape, ResultShape::Record);
        assert_eq!(descriptor.predicate, None);
    }

    #[test]
    fn test_predicates_and_in_order() {
        let a = Predicate::ge("age", 18);
        let b = Predicate::like("name", "A%");
        let c = Predicate::is_not_null("email");

        let two = compile(
            ClauseCategory::Fetch,
            vec![from_person(), a.clone().into(), b.clone().into()],
        )
        .unwrap();
        assert_eq!(two.predicate, Some(Predicate::And(vec![a.clone(), b.clone()])));

        let three = compile(
            ClauseCategory::Fetch,
            vec![from_person(), a.clone().into(), b.clone().into(), c.clone().into()],
        )
        .unwrap();
        assert_eq!(three.predicate, Some(Predicate::And(vec![a, b, c])));
    }

    #[test]
    fn test_sort_concatenates_without_dedup() {
        let descriptor = compile(
            ClauseCategory::Fetch,
            vec![
                from_person(),
                Clause::asc("name"),
                Clause::order_by(vec![OrderSpec::desc("age"), OrderSpec::asc("name")]),
                Clause::asc("name"),
            ],
        )
        .unwrap();

        assert_eq!(
            descriptor.sort,
            vec![
                OrderSpec::asc("name"),
                OrderSpec::desc("age"),
                OrderSpec::asc("name"),
                OrderSpec::asc("name"),
            ]
        );
    }

    #[test]
    fn test_last_selector_wins() {
        let x = Clause::From(EntitySelector::new("Person").in_stores(["main"]));
        let y = Clause::From(EntitySelector::new("Pet"));

        let both = compile(ClauseCategory::Fetch, vec![x, y.clone()]).unwrap();
        let last = compile(ClauseCategory::Fetch, vec![y]).unwrap();
        assert_eq!(both, last);
        assert_eq!(both.entity, "Pet");
        assert_eq!(both.configurations, None);
    }

    #[test]
    fn test_last_projection_wins() {
        let x = Clause::Select(Projection::of(
            ResultShape::Scalar,
            vec![SelectTerm::count_all()],
        ));
        let y = Clause::Select(Projection::of(
            ResultShape::AttributeMap,
            vec![SelectTerm::attribute("name")],
        ));

        let both = compile(ClauseCategory::Query, vec![from_person(), x, y.clone()]).unwrap();
        let last = compile(ClauseCategory::Query, vec![from_person(), y]).unwrap();
        assert_eq!(both, last);
    }

    #[test]
    fn test_query_requires_select() {
        let err = compile(ClauseCategory::Query, vec![from_person()]).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingRequiredClause {
                category: ClauseCategory::Query,
                clause: ClauseKind::Select,
            }
        );
    }

    #[test]
    fn test_from_is_required() {
        let err = compile(ClauseCategory::Delete, vec![Predicate::True.into()]).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingRequiredClause {
                category: ClauseCategory::Delete,
                clause: ClauseKind::From,
            }
        );
    }

    #[test]
    fn test_group_by_rejected_outside_query() {
        let err = compile(
            ClauseCategory::Fetch,
            vec![from_person(), Clause::group_by(["city"])],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::ClauseNotPermitted {
                category: ClauseCategory::Fetch,
                clause: ClauseKind::GroupBy,
            }
        );
    }

    #[test]
    fn test_tweak_clears_predicate() {
        let descriptor = compile(
            ClauseCategory::Fetch,
            vec![
                from_person(),
                Predicate::ge("age", 18).into(),
                Clause::tweak(|d| d.predicate = None),
            ],
        )
        .unwrap();
        assert_eq!(descriptor.predicate, None);
    }

    #[test]
    fn test_tweaks_run_after_structural_clauses_in_order() {
        // The tweak precedes the OrderBy and the second From, yet sees both.
        let descriptor = compile(
            ClauseCategory::Fetch,
            vec![
                from_person(),
                Clause::tweak(|d| {
                    d.sort.reverse();
                    d.fetch_limit = Some(10);
                }),
                Clause::tweak(|d| d.fetch_limit = d.fetch_limit.map(|l| l * 2)),
                Clause::asc("name"),
                Clause::desc("age"),
                Clause::From(EntitySelector::new("Person").in_stores(["main"])),
            ],
        )
        .unwrap();

        assert_eq!(descriptor.sort, vec![OrderSpec::desc("age"), OrderSpec::asc("name")]);
        assert_eq!(descriptor.fetch_limit, Some(20));
        assert_eq!(descriptor.configurations, Some(vec![StoreId::from("main")]));
    }

    #[test]
    fn test_default_batch_size_overridable_by_tweak() {
        let compiler = ClauseCompiler::new().with_default_batch_size(Some(25));
        let plain = compiler
            .compile(ClauseCategory::Fetch, vec![from_person()])
            .unwrap();
        assert_eq!(plain.batch_size, Some(25));

        let tweaked = compiler
            .compile(
                ClauseCategory::Fetch,
                vec![from_person(), Clause::tweak(|d| d.batch_size = None)],
            )
            .unwrap();
        assert_eq!(tweaked.batch_size, None);
    }
}
