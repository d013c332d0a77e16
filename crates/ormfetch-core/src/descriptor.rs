//! Compiled request descriptors.

use std::collections::BTreeSet;

use crate::clause::ClauseCategory;
use crate::query::filter::extract_filter_fields;
use ormfetch_proto::{OrderSpec, Predicate, Projection, StoreId};

/// The compiled plan for one fetch, delete, or query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDescriptor {
    /// Category the descriptor was compiled for.
    pub category: ClauseCategory,
    /// Target entity.
    pub entity: String,
    /// Store subset declared by the entity selector.
    pub configurations: Option<Vec<StoreId>>,
    /// Resolved physical-store scope; `None` until resolved.
    pub affected_stores: Option<Vec<StoreId>>,
    /// Combined predicate; `None` matches every record.
    pub predicate: Option<Predicate>,
    /// Combined sort keys, in tie-break order.
    pub sort: Vec<OrderSpec>,
    /// Combined group keys.
    pub group_by: Vec<String>,
    /// Projection and result shape.
    pub projection: Projection,
    /// Maximum rows returned; `None` is unbounded.
    pub fetch_limit: Option<usize>,
    /// Rows skipped before the first returned row.
    pub fetch_offset: usize,
    /// Hint for how many rows the store materializes at a time.
    pub batch_size: Option<usize>,
}

impl FetchDescriptor {
    /// An unfiltered, unsorted, full-record descriptor.
    pub fn new(category: ClauseCategory, entity: impl Into<String>) -> Self {
        Self {
            category,
            entity: entity.into(),
            configurations: None,
            affected_stores: None,
            predicate: None,
            sort: vec![],
            group_by: vec![],
            projection: Projection::records(),
            fetch_limit: None,
            fetch_offset: 0,
            batch_size: None,
        }
    }

    /// Copy with a resolved store scope.
    pub fn with_affected_stores(mut self, stores: Vec<StoreId>) -> Self {
        self.affected_stores = Some(stores);
        self
    }

    /// Whether a limit or offset restricts the result window.
    pub fn is_windowed(&self) -> bool {
        self.fetch_limit.is_some() || self.fetch_offset > 0
    }

    /// Whether the record's store is inside the resolved scope.
    pub fn includes_store(&self, store: &StoreId) -> bool {
        match &self.affected_stores {
            Some(stores) => stores.contains(store),
            None => true,
        }
    }

    /// Attributes referenced by the predicate.
    pub fn predicate_fields(&self) -> BTreeSet<String> {
        self.predicate
            .as_ref()
            .map(extract_filter_fields)
            .unwrap_or_default()
    }

    /// Attributes referenced by the sort keys.
    pub fn sort_fields(&self) -> BTreeSet<String> {
        self.sort.iter().map(|spec| spec.field.clone()).collect()
    }
}
