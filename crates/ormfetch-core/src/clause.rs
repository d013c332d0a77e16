//! Composable query clauses.
//!
//! A request is described by an ordered sequence of [`Clause`]s. The typed
//! front-ends ([`FromEntity`], [`Select`]) carry the entity and result types
//! statically and convert into untyped clauses for compilation.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::descriptor::FetchDescriptor;
use crate::entity::{Entity, SelectValue};
use ormfetch_proto::{AttributeMap, OrderSpec, Predicate, Projection, ResultShape, SelectTerm, StoreId};

/// Category of request a clause sequence compiles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseCategory {
    /// Fetch records, identifiers, or counts.
    Fetch,
    /// Delete matching records.
    Delete,
    /// Query projected values.
    Query,
}

impl ClauseCategory {
    /// Whether this category accepts clauses of `kind`.
    pub fn permits(self, kind: ClauseKind) -> bool {
        match kind {
            ClauseKind::From | ClauseKind::Where | ClauseKind::OrderBy | ClauseKind::Tweak => true,
            ClauseKind::GroupBy | ClauseKind::Select => self == ClauseCategory::Query,
        }
    }
}

impl fmt::Display for ClauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClauseCategory::Fetch => "fetch",
            ClauseCategory::Delete => "delete",
            ClauseCategory::Query => "query",
        })
    }
}

/// Kind of a clause, used in compile errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    From,
    Where,
    OrderBy,
    GroupBy,
    Select,
    Tweak,
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClauseKind::From => "From",
            ClauseKind::Where => "Where",
            ClauseKind::OrderBy => "OrderBy",
            ClauseKind::GroupBy => "GroupBy",
            ClauseKind::Select => "Select",
            ClauseKind::Tweak => "Tweak",
        })
    }
}

/// Target entity and the physical stores it may be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySelector {
    /// Entity name.
    pub entity: String,
    /// Store subset; `None` allows every store that declares the entity.
    pub configurations: Option<Vec<StoreId>>,
}

impl EntitySelector {
    /// Select an entity from any store.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            configurations: None,
        }
    }

    /// Restrict to the given stores.
    pub fn in_stores<I, S>(mut self, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoreId>,
    {
        self.configurations = Some(stores.into_iter().map(Into::into).collect());
        self
    }

    /// Affected stores: `attached ∩ declared ∩ configurations`, in attached order.
    pub fn affected_stores(&self, attached: &[StoreId], declared: &[StoreId]) -> Vec<StoreId> {
        attached
            .iter()
            .filter(|store| declared.contains(store))
            .filter(|store| match &self.configurations {
                Some(allowed) => allowed.contains(store),
                None => true,
            })
            .cloned()
            .collect()
    }
}

/// Escape hatch mutating the compiled descriptor.
#[derive(Clone)]
pub struct Tweak(Arc<dyn Fn(&mut FetchDescriptor) + Send + Sync>);

impl Tweak {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&mut FetchDescriptor) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Apply to a descriptor.
    pub fn apply(&self, descriptor: &mut FetchDescriptor) {
        (self.0)(descriptor)
    }
}

impl fmt::Debug for Tweak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tweak(..)")
    }
}

/// One fragment of a request.
#[derive(Debug, Clone)]
pub enum Clause {
    /// Target entity. Last one wins.
    From(EntitySelector),
    /// Filter. Accumulates with AND.
    Where(Predicate),
    /// Sort keys. Accumulates by concatenation.
    OrderBy(Vec<OrderSpec>),
    /// Group keys. Accumulates by concatenation.
    GroupBy(Vec<String>),
    /// Projection. Last one wins.
    Select(Projection),
    /// Descriptor mutation applied after every structural clause.
    Tweak(Tweak),
}

impl Clause {
    /// Kind of this clause.
    pub fn kind(&self) -> ClauseKind {
        match self {
            Clause::From(_) => ClauseKind::From,
            Clause::Where(_) => ClauseKind::Where,
            Clause::OrderBy(_) => ClauseKind::OrderBy,
            Clause::GroupBy(_) => ClauseKind::GroupBy,
            Clause::Select(_) => ClauseKind::Select,
            Clause::Tweak(_) => ClauseKind::Tweak,
        }
    }

    /// Filter clause.
    pub fn filter(predicate: Predicate) -> Self {
        Clause::Where(predicate)
    }

    /// Sort clause from several keys.
    pub fn order_by(specs: Vec<OrderSpec>) -> Self {
        Clause::OrderBy(specs)
    }

    /// Ascending sort on one key.
    pub fn asc(field: impl Into<String>) -> Self {
        Clause::OrderBy(vec![OrderSpec::asc(field)])
    }

    /// Descending sort on one key.
    pub fn desc(field: impl Into<String>) -> Self {
        Clause::OrderBy(vec![OrderSpec::desc(field)])
    }

    /// Group clause.
    pub fn group_by<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Clause::GroupBy(fields.into_iter().map(Into::into).collect())
    }

    /// Escape hatch clause.
    pub fn tweak(f: impl Fn(&mut FetchDescriptor) + Send + Sync + 'static) -> Self {
        Clause::Tweak(Tweak::new(f))
    }
}

impl From<Predicate> for Clause {
    fn from(predicate: Predicate) -> Self {
        Clause::Where(predicate)
    }
}

impl From<OrderSpec> for Clause {
    fn from(spec: OrderSpec) -> Self {
        Clause::OrderBy(vec![spec])
    }
}

impl From<EntitySelector> for Clause {
    fn from(selector: EntitySelector) -> Self {
        Clause::From(selector)
    }
}

impl From<Tweak> for Clause {
    fn from(tweak: Tweak) -> Self {
        Clause::Tweak(tweak)
    }
}

/// Typed entity selector.
pub struct FromEntity<T> {
    selector: EntitySelector,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> FromEntity<T> {
    /// Select `T` from any store.
    pub fn new() -> Self {
        Self {
            selector: EntitySelector::new(T::entity_name()),
            _entity: PhantomData,
        }
    }

    /// Restrict to the given stores.
    pub fn in_stores<I, S>(self, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoreId>,
    {
        Self {
            selector: self.selector.in_stores(stores),
            _entity: PhantomData,
        }
    }

    /// The untyped selector.
    pub fn selector(&self) -> &EntitySelector {
        &self.selector
    }
}

impl<T: Entity> Default for FromEntity<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FromEntity<T> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FromEntity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FromEntity").field(&self.selector).finish()
    }
}

impl<T> From<FromEntity<T>> for Clause {
    fn from(from: FromEntity<T>) -> Self {
        Clause::From(from.selector)
    }
}

/// Typed projection; `R` is the type each result converts to.
pub struct Select<R> {
    projection: Projection,
    _result: PhantomData<fn() -> R>,
}

impl<R: SelectValue> Select<R> {
    /// Select one scalar term.
    pub fn value(term: SelectTerm) -> Self {
        Self {
            projection: Projection::of(ResultShape::Scalar, vec![term]),
            _result: PhantomData,
        }
    }
}

impl Select<AttributeMap> {
    /// Select a set of terms, one map per row.
    pub fn attributes(terms: Vec<SelectTerm>) -> Self {
        Self {
            projection: Projection::of(ResultShape::AttributeMap, terms),
            _result: PhantomData,
        }
    }
}

impl<R> Select<R> {
    /// The untyped projection.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

impl<R> Clone for Select<R> {
    fn clone(&self) -> Self {
        Self {
            projection: self.projection.clone(),
            _result: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Select<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Select").field(&self.projection).finish()
    }
}

impl<R> From<Select<R>> for Clause {
    fn from(select: Select<R>) -> Self {
        Clause::Select(select.projection)
    }
}
