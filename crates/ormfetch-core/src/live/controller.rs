//! Live result controller.
//!
//! Keeps an ordered, optionally sectioned snapshot of the records matching a
//! fetch in sync with the context it observes.
//!
//! ```text
//! Uninitialized --perform_fetch--> Fetched --start_observing--> Observing
//!                                                   Observing <--> Reconciling
//! any --tear_down--> Invalidated
//! ```
//!
//! Change notifications queue on a channel and are applied by
//! [`LiveResultController::process_changes`] on the context's confinement,
//! one batch at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;

use super::changes::ChangeSet;
use super::section::{SectionBy, SectionInfo};
use super::snapshot::{IndexPath, Row, Snapshot, SnapshotReader};
use crate::clause::{Clause, ClauseCategory, EntitySelector};
use crate::compiler::ClauseCompiler;
use crate::config::EngineConfig;
use crate::context::{resolve_affected_stores, ChangeReceiver, QueryableContext, SubscriptionId};
use crate::descriptor::FetchDescriptor;
use crate::diagnostics::{default_diagnostics, DiagnosticLevel, Diagnostics};
use crate::entity::Entity;
use crate::error::ExecutionError;
use crate::query::FilterEvaluator;
use ormfetch_proto::{ChangeEvent, ChangeNotification, ChangeType, ObjectId, Record, StoreId};

/// State of a live result controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, nothing fetched yet.
    Uninitialized,
    /// Snapshot populated, not observing changes.
    Fetched,
    /// Registered for change notifications.
    Observing,
    /// Applying a notification batch.
    Reconciling,
    /// Torn down. Terminal.
    Invalidated,
}

/// State shared between the controller and the handle its observer gets.
#[derive(Debug)]
struct Lifecycle {
    state: Mutex<ControllerState>,
    subscription: Mutex<Option<SubscriptionId>>,
    refetch_requested: AtomicBool,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState::Uninitialized),
            subscription: Mutex::new(None),
            refetch_requested: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    /// Move to `next` unless already invalidated.
    fn transition(&self, next: ControllerState) {
        let mut state = self.state.lock();
        if *state != ControllerState::Invalidated {
            *state = next;
        }
    }

    fn is_invalidated(&self) -> bool {
        self.state() == ControllerState::Invalidated
    }

    /// Unsubscribe and invalidate. Returns false if already torn down.
    fn tear_down<C: QueryableContext + ?Sized>(&self, context: &C) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ControllerState::Invalidated {
                return false;
            }
            *state = ControllerState::Invalidated;
        }
        if let Some(id) = self.subscription.lock().take() {
            context.unsubscribe(id);
        }
        self.refetch_requested.store(false, Ordering::SeqCst);
        true
    }
}

/// Control surface handed to the change observer.
///
/// The observer runs inside [`LiveResultController::process_changes`], so it
/// cannot re-enter the controller. It can read the published snapshot,
/// request a refetch that runs after the current batch, or tear the
/// controller down.
pub struct ControllerHandle<'h, C: QueryableContext + ?Sized> {
    lifecycle: &'h Lifecycle,
    reader: &'h SnapshotReader,
    context: &'h C,
}

impl<'h, C: QueryableContext + ?Sized> ControllerHandle<'h, C> {
    /// The snapshot the change set describes.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.reader.current()
    }

    pub fn state(&self) -> ControllerState {
        self.lifecycle.state()
    }

    /// Refetch once the current batch is done.
    pub fn request_refetch(&self) {
        if !self.lifecycle.is_invalidated() {
            self.lifecycle.refetch_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Tear the controller down. Unsubscribes before returning.
    pub fn tear_down(&self) {
        if self.lifecycle.tear_down(self.context) {
            tracing::debug!("live results torn down from observer");
        }
    }
}

type Observer<'a, C> = Box<dyn FnMut(&ChangeSet, &ControllerHandle<'_, C>) + 'a>;

/// Observed, ordered, sectioned results of a fetch.
pub struct LiveResultController<'a, T: Entity, C: QueryableContext + ?Sized> {
    context: &'a C,
    descriptor: FetchDescriptor,
    section: Option<SectionBy>,
    config: EngineConfig,
    diagnostics: Arc<dyn Diagnostics>,
    lifecycle: Lifecycle,
    reader: SnapshotReader,
    receiver: Option<ChangeReceiver>,
    observer: Option<Observer<'a, C>>,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: Entity, C: QueryableContext + ?Sized> LiveResultController<'a, T, C> {
    /// Compile `clauses` into a controller with default settings.
    pub fn new<I>(context: &'a C, clauses: I) -> Result<Self, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        Self::with_settings(context, clauses, EngineConfig::default(), default_diagnostics())
    }

    /// Compile `clauses` into a controller.
    pub fn with_settings<I>(
        context: &'a C,
        clauses: I,
        config: EngineConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        context
            .confinement()
            .check("compile live results", config.confinement_policy, diagnostics.as_ref())?;

        let descriptor = ClauseCompiler::new()
            .with_default_batch_size(config.default_batch_size)
            .compile(ClauseCategory::Fetch, clauses)?;

        if descriptor.entity != T::entity_name() {
            return Err(ExecutionError::type_mismatch(T::entity_name(), descriptor.entity));
        }
        let model = context
            .entity_model(&descriptor.entity)
            .ok_or_else(|| ExecutionError::UnknownEntity(descriptor.entity.clone()))?;
        if model.is_abstract {
            return Err(ExecutionError::AbstractEntity(descriptor.entity));
        }

        Ok(Self {
            context,
            descriptor,
            section: None,
            config,
            diagnostics,
            lifecycle: Lifecycle::new(),
            reader: SnapshotReader::new(Snapshot::empty(false)),
            receiver: None,
            observer: None,
            _entity: PhantomData,
        })
    }

    /// Section results by `key_path`. Call before the first fetch.
    pub fn sectioned_by(mut self, key_path: impl Into<String>) -> Self {
        self.section = Some(SectionBy::following_sort(key_path, &self.descriptor.sort));
        self.reader.publish(Snapshot::empty(true));
        self
    }

    /// Register the observer told about every reconciled change set.
    pub fn on_change<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ChangeSet, &ControllerHandle<'_, C>) + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ControllerState {
        self.lifecycle.state()
    }

    /// The compiled descriptor, including the resolved store scope.
    pub fn descriptor(&self) -> &FetchDescriptor {
        &self.descriptor
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.reader.current()
    }

    /// A shareable reader of published snapshots.
    pub fn reader(&self) -> SnapshotReader {
        self.reader.clone()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.snapshot().object_ids()
    }

    pub fn number_of_objects(&self) -> usize {
        self.snapshot().len()
    }

    pub fn sections(&self) -> Vec<SectionInfo> {
        self.snapshot().sections().to_vec()
    }

    pub fn index_path_of(&self, id: &ObjectId) -> Option<IndexPath> {
        self.snapshot().index_path_of(id)
    }

    /// Materialize every object in snapshot order.
    pub fn try_objects(&self) -> Result<Vec<T>, ExecutionError> {
        self.check_confinement("read live objects")?;
        let ids = self.object_ids();
        self.context
            .existing_records(&ids)?
            .iter()
            .map(T::from_record)
            .collect()
    }

    /// Materialize every object, or nothing.
    pub fn objects(&self) -> Vec<T> {
        match self.try_objects() {
            Ok(objects) => objects,
            Err(error) => {
                self.diagnostics.error(&error, "reading live objects failed");
                vec![]
            }
        }
    }

    /// Materialize the object at an index path.
    pub fn try_object_at(&self, path: IndexPath) -> Result<Option<T>, ExecutionError> {
        self.check_confinement("read live object")?;
        let snapshot = self.snapshot();
        let Some(id) = snapshot.id_at(path) else {
            return Ok(None);
        };
        self.context
            .existing_record(id)?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    /// Materialize the object at an index path, or `None`.
    pub fn object_at(&self, path: IndexPath) -> Option<T> {
        match self.try_object_at(path) {
            Ok(object) => object,
            Err(error) => {
                self.diagnostics.error(&error, "reading live object failed");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Execute the fetch and replace the snapshot.
    pub fn perform_fetch(&mut self) -> Result<(), ExecutionError> {
        self.ensure_live()?;
        self.check_confinement("perform fetch")?;

        let snapshot = self.fetch_snapshot()?;
        let count = snapshot.len();
        self.reader.publish(snapshot);
        if self.lifecycle.state() == ControllerState::Uninitialized {
            self.lifecycle.transition(ControllerState::Fetched);
        }

        tracing::debug!(entity = %self.descriptor.entity, objects = count, "live results fetched");
        Ok(())
    }

    /// Register for change notifications, fetching first if needed.
    pub fn start_observing(&mut self) -> Result<(), ExecutionError> {
        self.ensure_live()?;
        match self.lifecycle.state() {
            ControllerState::Uninitialized => self.perform_fetch()?,
            ControllerState::Observing | ControllerState::Reconciling => return Ok(()),
            ControllerState::Fetched | ControllerState::Invalidated => {}
        }
        self.check_confinement("start observing")?;

        let subscription = self.context.subscribe(&[self.descriptor.entity.clone()]);
        *self.lifecycle.subscription.lock() = Some(subscription.id);
        self.receiver = Some(subscription.receiver);
        self.lifecycle.transition(ControllerState::Observing);

        tracing::debug!(
            entity = %self.descriptor.entity,
            subscription_id = subscription.id,
            "live results observing"
        );
        Ok(())
    }

    /// Apply queued notification batches. Returns how many were applied.
    ///
    /// At most `notification_batch_limit` batches are applied per call.
    pub fn process_changes(&mut self) -> Result<usize, ExecutionError> {
        self.ensure_live()?;
        if self.lifecycle.state() != ControllerState::Observing {
            return Ok(0);
        }
        self.check_confinement("process changes")?;

        let mut processed = 0;
        self.run_requested_refetch()?;

        while processed < self.config.notification_batch_limit && !self.lifecycle.is_invalidated() {
            let Some(receiver) = self.receiver.as_mut() else {
                break;
            };
            let notification = match receiver.try_recv() {
                Ok(notification) => notification,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.diagnostics
                        .log(DiagnosticLevel::Notice, "change notifications closed; tearing down");
                    self.tear_down();
                    break;
                }
            };

            self.lifecycle.transition(ControllerState::Reconciling);
            let outcome = match notification {
                ChangeNotification::Batch(events) => self.reconcile(&events),
                ChangeNotification::StoresChanged(stores) => self.stores_changed(&stores),
            };
            self.lifecycle.transition(ControllerState::Observing);

            let changes = match outcome {
                Ok(changes) => changes,
                Err(error) => {
                    // The batch is gone from the channel; resync from the store next drain.
                    self.lifecycle.refetch_requested.store(true, Ordering::SeqCst);
                    self.diagnostics
                        .error(&error, "reconciling change batch failed, refetch scheduled");
                    return Err(error);
                }
            };
            processed += 1;
            self.notify(&changes);
            self.run_requested_refetch()?;
        }

        if self.lifecycle.is_invalidated() {
            self.receiver = None;
        }
        Ok(processed)
    }

    /// Refetch now and return what changed. Does not notify the observer.
    pub fn refetch(&mut self) -> Result<ChangeSet, ExecutionError> {
        self.ensure_live()?;
        self.check_confinement("refetch")?;
        let changes = self.full_refetch(&BTreeSet::new())?;
        if self.lifecycle.state() == ControllerState::Uninitialized {
            self.lifecycle.transition(ControllerState::Fetched);
        }
        Ok(changes)
    }

    /// Tear down. Idempotent.
    pub fn tear_down(&mut self) {
        if self.lifecycle.tear_down(self.context) {
            tracing::debug!(entity = %self.descriptor.entity, "live results torn down");
        }
        self.receiver = None;
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn ensure_live(&self) -> Result<(), ExecutionError> {
        if self.lifecycle.is_invalidated() {
            return Err(ExecutionError::Invalidated);
        }
        Ok(())
    }

    fn check_confinement(&self, operation: &'static str) -> Result<(), ExecutionError> {
        self.context.confinement().check(
            operation,
            self.config.confinement_policy,
            self.diagnostics.as_ref(),
        )
    }

    /// Resolve the store scope, failing soft on an empty one if configured.
    fn resolve_scope(&mut self) -> Result<(), ExecutionError> {
        let stores = resolve_affected_stores(self.context, &self.descriptor)?;
        if stores.is_empty() {
            let error = ExecutionError::StoreUnavailable {
                entity: self.descriptor.entity.clone(),
            };
            if !self.config.fail_soft_on_empty_scope {
                return Err(error);
            }
            self.diagnostics.error(&error, "store-unavailable, fetching anyway");
        }
        self.descriptor.affected_stores = Some(stores);
        Ok(())
    }

    fn fetch_snapshot(&mut self) -> Result<Snapshot, ExecutionError> {
        self.resolve_scope()?;
        let records = self.context.fetch_all(&self.descriptor)?;
        let rows = records
            .iter()
            .map(|record| Row::from_record(record, &self.descriptor.sort, self.section.as_ref()))
            .collect();
        Ok(Snapshot::build(rows, &self.descriptor.sort, self.section.as_ref()))
    }

    fn full_refetch(&mut self, touched: &BTreeSet<ObjectId>) -> Result<ChangeSet, ExecutionError> {
        let old = self.reader.current();
        let new = self.fetch_snapshot()?;
        let changes = ChangeSet::between(&old, &new, touched);
        self.reader.publish(new);
        Ok(changes)
    }

    /// Whether the record belongs in the results.
    fn matches(&self, record: &Record) -> Result<bool, ExecutionError> {
        if !self.descriptor.includes_store(&record.store) {
            return Ok(false);
        }
        match &self.descriptor.predicate {
            Some(predicate) => Ok(FilterEvaluator::evaluate(predicate, &record.fields)?),
            None => Ok(true),
        }
    }

    /// Whether an update can only have changed attributes nothing positions on.
    fn is_in_place(&self, event: &ChangeEvent, snapshot: &Snapshot) -> bool {
        if event.change_type != ChangeType::Update
            || event.changed_fields.is_empty()
            || !snapshot.contains(&event.object_id)
        {
            return false;
        }
        let predicate_fields = self.descriptor.predicate_fields();
        let sort_fields = self.descriptor.sort_fields();
        event.changed_fields.iter().all(|field| {
            !predicate_fields.contains(field)
                && !sort_fields.contains(field)
                && self.section.as_ref().map_or(true, |s| &s.key_path != field)
        })
    }

    fn reconcile(&mut self, events: &[ChangeEvent]) -> Result<ChangeSet, ExecutionError> {
        let touched: BTreeSet<ObjectId> = events
            .iter()
            .filter(|event| event.entity() == self.descriptor.entity)
            .map(|event| event.object_id.clone())
            .collect();
        if touched.is_empty() {
            return Ok(ChangeSet::default());
        }

        if self.descriptor.is_windowed() {
            tracing::trace!(entity = %self.descriptor.entity, "windowed results, refetching");
            return self.full_refetch(&touched);
        }

        let old = self.reader.current();
        let mut rows: BTreeMap<ObjectId, Row> = old
            .rows()
            .iter()
            .map(|row| (row.id.clone(), row.clone()))
            .collect();
        let mut in_place = 0;

        for event in events.iter().filter(|e| e.entity() == self.descriptor.entity) {
            let id = &event.object_id;
            if event.change_type == ChangeType::Delete {
                rows.remove(id);
                continue;
            }
            if self.is_in_place(event, &old) {
                in_place += 1;
                continue;
            }
            match self.context.existing_record(id)? {
                Some(record) if self.matches(&record)? => {
                    let row = Row::from_record(&record, &self.descriptor.sort, self.section.as_ref());
                    rows.insert(id.clone(), row);
                }
                _ => {
                    rows.remove(id);
                }
            }
        }

        let new = Snapshot::build(
            rows.into_values().collect(),
            &self.descriptor.sort,
            self.section.as_ref(),
        );
        let changes = ChangeSet::between(&old, &new, &touched);
        self.reader.publish(new);

        tracing::trace!(
            entity = %self.descriptor.entity,
            events = events.len(),
            in_place,
            changes = changes.rows.len(),
            "reconciled change batch"
        );
        Ok(changes)
    }

    fn stores_changed(&mut self, stores: &[StoreId]) -> Result<ChangeSet, ExecutionError> {
        let previous = self.descriptor.affected_stores.clone();
        let model = self
            .context
            .entity_model(&self.descriptor.entity)
            .ok_or_else(|| ExecutionError::UnknownEntity(self.descriptor.entity.clone()))?;
        let selector = EntitySelector {
            entity: self.descriptor.entity.clone(),
            configurations: self.descriptor.configurations.clone(),
        };
        let scope = selector.affected_stores(stores, &model.stores);

        if previous.as_ref() == Some(&scope) {
            tracing::trace!(entity = %self.descriptor.entity, "store topology changed, scope unchanged");
            return Ok(ChangeSet::default());
        }

        tracing::debug!(
            entity = %self.descriptor.entity,
            stores = scope.len(),
            "store scope changed, refetching"
        );
        self.full_refetch(&BTreeSet::new())
    }

    fn run_requested_refetch(&mut self) -> Result<(), ExecutionError> {
        if !self.lifecycle.refetch_requested.swap(false, Ordering::SeqCst) || self.lifecycle.is_invalidated() {
            return Ok(());
        }
        match self.full_refetch(&BTreeSet::new()) {
            Ok(changes) => {
                self.notify(&changes);
                Ok(())
            }
            Err(error) => {
                self.lifecycle.refetch_requested.store(true, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    fn notify(&mut self, changes: &ChangeSet) {
        if changes.is_empty() || self.lifecycle.is_invalidated() {
            return;
        }
        if let Some(observer) = self.observer.as_mut() {
            let handle = ControllerHandle {
                lifecycle: &self.lifecycle,
                reader: &self.reader,
                context: self.context,
            };
            observer(changes, &handle);
        }
    }
}

impl<'a, T: Entity, C: QueryableContext + ?Sized> Drop for LiveResultController<'a, T, C> {
    fn drop(&mut self) {
        self.lifecycle.tear_down(self.context);
    }
}

impl<'a, T: Entity, C: QueryableContext + ?Sized> fmt::Debug for LiveResultController<'a, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveResultController")
            .field("entity", &self.descriptor.entity)
            .field("state", &self.lifecycle.state())
            .field("objects", &self.reader.current().len())
            .finish()
    }
}
