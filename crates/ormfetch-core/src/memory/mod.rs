//! In-process queryable context.
//!
//! `MemoryContext` keeps records for any number of named physical stores in
//! memory, evaluates descriptors with the engine's own filter, sort, and
//! projection evaluators, and fans change notifications out to subscribers.
//!
//! Mutations are buffered until [`MemoryContext::flush_changes`], which
//! publishes them as a single batch.

mod publisher;

pub use publisher::ChangePublisher;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::confinement::Confinement;
use crate::context::{EntityModel, QueryableContext, Subscription, SubscriptionId};
use crate::descriptor::FetchDescriptor;
use crate::error::ContextError;
use crate::query::{sort_records, FilterEvaluator, ProjectionEvaluator};
use ormfetch_proto::{AttributeMap, ChangeEvent, ObjectId, Record, StoreId, Value};

/// A queryable context backed by in-memory tables.
pub struct MemoryContext {
    confinement: Confinement,
    models: RwLock<HashMap<String, EntityModel>>,
    stores: RwLock<Vec<StoreId>>,
    records: RwLock<BTreeMap<ObjectId, Record>>,
    next_key: AtomicU64,
    pending: Mutex<Vec<ChangeEvent>>,
    publisher: ChangePublisher,
    injected_failure: Mutex<Option<ContextError>>,
}

impl MemoryContext {
    /// Create a context confined to the calling thread.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_confinement(Confinement::current(label))
    }

    /// Create a context with an explicit confinement.
    pub fn with_confinement(confinement: Confinement) -> Self {
        Self {
            confinement,
            models: RwLock::new(HashMap::new()),
            stores: RwLock::new(Vec::new()),
            records: RwLock::new(BTreeMap::new()),
            next_key: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            publisher: ChangePublisher::new(),
            injected_failure: Mutex::new(None),
        }
    }

    /// Register an entity model, replacing any previous one of the same name.
    pub fn register_entity(&self, model: EntityModel) {
        tracing::debug!(entity = %model.name, stores = model.stores.len(), "registered entity");
        self.models.write().insert(model.name.clone(), model);
    }

    /// Attach a physical store. Subscribers are told about the new topology.
    pub fn attach_store(&self, store: impl Into<StoreId>) {
        let store = store.into();
        let topology = {
            let mut stores = self.stores.write();
            if stores.contains(&store) {
                return;
            }
            stores.push(store);
            stores.clone()
        };
        self.publisher.publish_topology(&topology);
    }

    /// Detach a physical store. Its records stay but become invisible.
    pub fn detach_store(&self, store: &StoreId) {
        let topology = {
            let mut stores = self.stores.write();
            let before = stores.len();
            stores.retain(|s| s != store);
            if stores.len() == before {
                return;
            }
            stores.clone()
        };
        self.publisher.publish_topology(&topology);
    }

    /// Insert a record of `entity` into `store`.
    pub fn insert(
        &self,
        entity: &str,
        store: impl Into<StoreId>,
        fields: Vec<(String, Value)>,
    ) -> Result<ObjectId, ContextError> {
        let store = store.into();
        let model = self
            .models
            .read()
            .get(entity)
            .cloned()
            .ok_or_else(|| ContextError::UnknownEntity(entity.to_string()))?;

        if model.is_abstract {
            return Err(ContextError::Store(format!(
                "cannot insert into abstract entity {entity}"
            )));
        }
        if !model.stores.contains(&store) {
            return Err(ContextError::Store(format!(
                "entity {entity} is not declared in store {store}"
            )));
        }

        let sequence = self.next_key.fetch_add(1, Ordering::SeqCst);
        let id = ObjectId::from_sequence(entity, sequence);
        self.records
            .write()
            .insert(id.clone(), Record::new(id.clone(), store, fields));
        self.pending.lock().push(ChangeEvent::insert(id.clone()));

        tracing::trace!(object_id = %id, "inserted record");
        Ok(id)
    }

    /// Set attributes on an existing record.
    pub fn update(&self, id: &ObjectId, fields: Vec<(String, Value)>) -> Result<(), ContextError> {
        let changed: Vec<String> = {
            let mut records = self.records.write();
            let record = records
                .get_mut(id)
                .ok_or_else(|| ContextError::NotFound(id.clone()))?;
            fields
                .into_iter()
                .map(|(name, value)| {
                    record.set(name.clone(), value);
                    name
                })
                .collect()
        };

        self.pending.lock().push(ChangeEvent::update(id.clone(), changed));
        tracing::trace!(object_id = %id, "updated record");
        Ok(())
    }

    /// Remove a record.
    pub fn delete(&self, id: &ObjectId) -> Result<(), ContextError> {
        self.records
            .write()
            .remove(id)
            .ok_or_else(|| ContextError::NotFound(id.clone()))?;
        self.pending.lock().push(ChangeEvent::delete(id.clone()));
        tracing::trace!(object_id = %id, "deleted record");
        Ok(())
    }

    /// Publish buffered changes as one batch. Returns the number of events.
    pub fn flush_changes(&self) -> usize {
        let events = std::mem::take(&mut *self.pending.lock());
        if events.is_empty() {
            return 0;
        }
        let subscribers = self.publisher.publish_batch(&events);
        tracing::debug!(events = events.len(), subscribers, "flushed changes");
        events.len()
    }

    /// Number of changes waiting for [`Self::flush_changes`].
    pub fn pending_changes(&self) -> usize {
        self.pending.lock().len()
    }

    /// Make the next descriptor evaluation or record lookup fail with `error`.
    pub fn fail_next(&self, error: ContextError) {
        *self.injected_failure.lock() = Some(error);
    }

    fn take_failure(&self) -> Result<(), ContextError> {
        match self.injected_failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The change publisher.
    pub fn publisher(&self) -> &ChangePublisher {
        &self.publisher
    }

    /// Records matching the descriptor, filtered, sorted, and windowed.
    fn evaluate(&self, descriptor: &FetchDescriptor) -> Result<Vec<Record>, ContextError> {
        self.take_failure()?;
        if !self.models.read().contains_key(&descriptor.entity) {
            return Err(ContextError::UnknownEntity(descriptor.entity.clone()));
        }

        let attached = self.stores.read().clone();
        let mut matched = Vec::new();
        for record in self.records.read().values() {
            if record.entity() != descriptor.entity
                || !attached.contains(&record.store)
                || !descriptor.includes_store(&record.store)
            {
                continue;
            }
            let keep = match &descriptor.predicate {
                Some(predicate) => FilterEvaluator::evaluate(predicate, &record.fields)?,
                None => true,
            };
            if keep {
                matched.push(record.clone());
            }
        }

        sort_records(&mut matched, &descriptor.sort);

        let windowed = matched
            .into_iter()
            .skip(descriptor.fetch_offset)
            .take(descriptor.fetch_limit.unwrap_or(usize::MAX))
            .collect();
        Ok(windowed)
    }
}

impl QueryableContext for MemoryContext {
    fn confinement(&self) -> &Confinement {
        &self.confinement
    }

    fn persistent_stores(&self) -> Vec<StoreId> {
        self.stores.read().clone()
    }

    fn entity_model(&self, entity: &str) -> Option<EntityModel> {
        self.models.read().get(entity).cloned()
    }

    fn fetch_all(&self, descriptor: &FetchDescriptor) -> Result<Vec<Record>, ContextError> {
        self.evaluate(descriptor)
    }

    fn fetch_count(&self, descriptor: &FetchDescriptor) -> Result<usize, ContextError> {
        Ok(self.evaluate(descriptor)?.len())
    }

    fn fetch_object_ids(&self, descriptor: &FetchDescriptor) -> Result<Vec<ObjectId>, ContextError> {
        Ok(self
            .evaluate(descriptor)?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    fn delete_all(&self, descriptor: &FetchDescriptor) -> Result<usize, ContextError> {
        let doomed = self.evaluate(descriptor)?;
        for record in &doomed {
            self.delete(&record.id)?;
        }
        tracing::debug!(entity = %descriptor.entity, deleted = doomed.len(), "deleted records");
        Ok(doomed.len())
    }

    fn query_attributes(&self, descriptor: &FetchDescriptor) -> Result<Vec<AttributeMap>, ContextError> {
        let records = self.evaluate(descriptor)?;
        ProjectionEvaluator::evaluate(&descriptor.projection, &descriptor.group_by, &records)
    }

    fn existing_record(&self, id: &ObjectId) -> Result<Option<Record>, ContextError> {
        self.take_failure()?;
        Ok(self.records.read().get(id).cloned())
    }

    fn subscribe(&self, entities: &[String]) -> Subscription {
        self.publisher.subscribe(entities)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.publisher.unsubscribe(id)
    }
}
