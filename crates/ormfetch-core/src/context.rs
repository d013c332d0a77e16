//! The queryable context capability.
//!
//! A context is the persistence collaborator the engine executes compiled
//! descriptors against. It owns the records, knows the entity model and the
//! attached physical stores, and fans out change notifications. The engine
//! only depends on this trait.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::clause::EntitySelector;
use crate::confinement::Confinement;
use crate::descriptor::FetchDescriptor;
use crate::error::{ContextError, ExecutionError};
use ormfetch_proto::{AttributeMap, ChangeNotification, ObjectId, Record, StoreId, Value};

/// Identifier of a change subscription.
pub type SubscriptionId = u64;

/// Receiving end of a change subscription.
pub type ChangeReceiver = UnboundedReceiver<ChangeNotification>;

/// A registered change subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Id to pass to [`QueryableContext::unsubscribe`].
    pub id: SubscriptionId,
    /// Notifications for the subscribed entities, plus store topology changes.
    pub receiver: ChangeReceiver,
}

/// Model information about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityModel {
    /// Entity name.
    pub name: String,
    /// Abstract entities have no records of their own.
    pub is_abstract: bool,
    /// Stores that may hold records of this entity.
    pub stores: Vec<StoreId>,
}

impl EntityModel {
    /// A concrete entity stored in `stores`.
    pub fn new<I, S>(name: impl Into<String>, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoreId>,
    {
        Self {
            name: name.into(),
            is_abstract: false,
            stores: stores.into_iter().map(Into::into).collect(),
        }
    }

    /// Mark as abstract.
    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

/// Persistence context able to execute compiled descriptors.
///
/// Every method is called on the context's confinement. Failures carry their
/// cause; the engine decides how to surface them.
pub trait QueryableContext: Send + Sync {
    /// Thread this context is bound to.
    fn confinement(&self) -> &Confinement;

    /// Currently attached physical stores.
    fn persistent_stores(&self) -> Vec<StoreId>;

    /// Model of an entity, if known.
    fn entity_model(&self, entity: &str) -> Option<EntityModel>;

    /// All records matching the descriptor, in its sort order.
    fn fetch_all(&self, descriptor: &FetchDescriptor) -> Result<Vec<Record>, ContextError>;

    /// Number of records matching the descriptor.
    fn fetch_count(&self, descriptor: &FetchDescriptor) -> Result<usize, ContextError>;

    /// Identifiers of all matching records, without materializing them.
    fn fetch_object_ids(&self, descriptor: &FetchDescriptor) -> Result<Vec<ObjectId>, ContextError>;

    /// Delete all matching records, returning how many were deleted.
    fn delete_all(&self, descriptor: &FetchDescriptor) -> Result<usize, ContextError>;

    /// One attribute map per result row of the descriptor's projection.
    fn query_attributes(&self, descriptor: &FetchDescriptor) -> Result<Vec<AttributeMap>, ContextError>;

    /// A record by identifier.
    fn existing_record(&self, id: &ObjectId) -> Result<Option<Record>, ContextError>;

    /// Register for change notifications on the given entities.
    fn subscribe(&self, entities: &[String]) -> Subscription;

    /// Cancel a subscription. Returns whether it existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// First matching record.
    fn fetch_one(&self, descriptor: &FetchDescriptor) -> Result<Option<Record>, ContextError> {
        let mut first = descriptor.clone();
        first.fetch_limit = Some(1);
        Ok(self.fetch_all(&first)?.into_iter().next())
    }

    /// Identifier of the first matching record.
    fn fetch_object_id(&self, descriptor: &FetchDescriptor) -> Result<Option<ObjectId>, ContextError> {
        let mut first = descriptor.clone();
        first.fetch_limit = Some(1);
        Ok(self.fetch_object_ids(&first)?.into_iter().next())
    }

    /// The first value of the first result row.
    fn query_value(&self, descriptor: &FetchDescriptor) -> Result<Option<Value>, ContextError> {
        Ok(self
            .query_attributes(descriptor)?
            .into_iter()
            .next()
            .and_then(|row| row.first_value().cloned()))
    }

    /// Records for the identifiers that exist, in input order.
    ///
    /// Missing identifiers are skipped; the first lookup error is returned.
    fn existing_records(&self, ids: &[ObjectId]) -> Result<Vec<Record>, ContextError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.existing_record(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Resolve the physical stores a descriptor may read from.
///
/// The scope is the attached stores, intersected with the entity's declared
/// stores and the selector's configurations.
pub fn resolve_affected_stores<C>(
    context: &C,
    descriptor: &FetchDescriptor,
) -> Result<Vec<StoreId>, ExecutionError>
where
    C: QueryableContext + ?Sized,
{
    let model = context
        .entity_model(&descriptor.entity)
        .ok_or_else(|| ExecutionError::UnknownEntity(descriptor.entity.clone()))?;

    let selector = EntitySelector {
        entity: descriptor.entity.clone(),
        configurations: descriptor.configurations.clone(),
    };
    Ok(selector.affected_stores(&context.persistent_stores(), &model.stores))
}
