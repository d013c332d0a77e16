//! One-shot query execution.
//!
//! [`QueryExecutor`] compiles a clause sequence, checks the preconditions
//! every request shares, delegates to the [`QueryableContext`], and reshapes
//! the raw result into the caller's type.
//!
//! Each operation has two forms. `try_*` returns the full
//! [`ExecutionError`]. The plain form collapses failures to `None` or an empty
//! result after reporting the cause to the executor's [`Diagnostics`].

use std::sync::Arc;

use crate::clause::{Clause, ClauseCategory};
use crate::compiler::ClauseCompiler;
use crate::config::EngineConfig;
use crate::context::{resolve_affected_stores, QueryableContext};
use crate::descriptor::FetchDescriptor;
use crate::diagnostics::{default_diagnostics, Diagnostics};
use crate::entity::{Entity, SelectValue};
use crate::error::ExecutionError;
use ormfetch_proto::{AttributeMap, ObjectId, Record};

/// Executes clause sequences against a queryable context.
pub struct QueryExecutor<'a, C: QueryableContext + ?Sized> {
    context: &'a C,
    config: EngineConfig,
    compiler: ClauseCompiler,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<'a, C: QueryableContext + ?Sized> QueryExecutor<'a, C> {
    /// Create an executor with default configuration and tracing diagnostics.
    pub fn new(context: &'a C) -> Self {
        Self {
            context,
            config: EngineConfig::default(),
            compiler: ClauseCompiler::new(),
            diagnostics: default_diagnostics(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.compiler = ClauseCompiler::new().with_default_batch_size(config.default_batch_size);
        self.config = config;
        self
    }

    /// Replace the diagnostics sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// The context requests run against.
    pub fn context(&self) -> &'a C {
        self.context
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Identifier hand-off
    // ------------------------------------------------------------------

    /// Materialize a record by identifier in this context.
    pub fn try_fetch_existing<T: Entity>(&self, id: &ObjectId) -> Result<Option<T>, ExecutionError> {
        self.check_confinement("fetch existing")?;
        if id.entity != T::entity_name() {
            return Err(ExecutionError::type_mismatch(T::entity_name(), id.entity.as_str()));
        }
        self.context
            .existing_record(id)?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    /// Materialize a record by identifier, or `None`.
    pub fn fetch_existing<T: Entity>(&self, id: &ObjectId) -> Option<T> {
        self.collapse("fetch existing", self.try_fetch_existing(id))
            .flatten()
    }

    /// Materialize several records by identifier. Missing ones are skipped.
    pub fn try_fetch_existing_many<T: Entity>(&self, ids: &[ObjectId]) -> Result<Vec<T>, ExecutionError> {
        self.check_confinement("fetch existing")?;
        if let Some(foreign) = ids.iter().find(|id| id.entity != T::entity_name()) {
            return Err(ExecutionError::type_mismatch(
                T::entity_name(),
                foreign.entity.as_str(),
            ));
        }
        decode_all(&self.context.existing_records(ids)?)
    }

    /// Materialize several records by identifier, or nothing.
    pub fn fetch_existing_many<T: Entity>(&self, ids: &[ObjectId]) -> Vec<T> {
        self.collapse("fetch existing", self.try_fetch_existing_many(ids))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------

    /// First matching record in sort order.
    pub fn try_fetch_one<T, I>(&self, clauses: I) -> Result<Option<T>, ExecutionError>
    where
        T: Entity,
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare_objects::<T, I>("fetch one", clauses)?;
        self.context
            .fetch_one(&descriptor)?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    /// First matching record, or `None`.
    pub fn fetch_one<T, I>(&self, clauses: I) -> Option<T>
    where
        T: Entity,
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("fetch one", self.try_fetch_one(clauses)).flatten()
    }

    /// Every matching record in sort order.
    pub fn try_fetch_all<T, I>(&self, clauses: I) -> Result<Vec<T>, ExecutionError>
    where
        T: Entity,
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare_objects::<T, I>("fetch all", clauses)?;
        decode_all(&self.context.fetch_all(&descriptor)?)
    }

    /// Every matching record, or nothing.
    pub fn fetch_all<T, I>(&self, clauses: I) -> Vec<T>
    where
        T: Entity,
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("fetch all", self.try_fetch_all(clauses))
            .unwrap_or_default()
    }

    /// Number of matching records.
    pub fn try_fetch_count<I>(&self, clauses: I) -> Result<usize, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("fetch count", ClauseCategory::Fetch, clauses, false)?;
        Ok(self.context.fetch_count(&descriptor)?)
    }

    /// Number of matching records, or `None`.
    pub fn fetch_count<I>(&self, clauses: I) -> Option<usize>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("fetch count", self.try_fetch_count(clauses))
    }

    /// Identifier of the first matching record.
    pub fn try_fetch_object_id<I>(&self, clauses: I) -> Result<Option<ObjectId>, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("fetch object id", ClauseCategory::Fetch, clauses, false)?;
        Ok(self.context.fetch_object_id(&descriptor)?)
    }

    /// Identifier of the first matching record, or `None`.
    pub fn fetch_object_id<I>(&self, clauses: I) -> Option<ObjectId>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("fetch object id", self.try_fetch_object_id(clauses))
            .flatten()
    }

    /// Identifiers of every matching record in sort order.
    pub fn try_fetch_object_ids<I>(&self, clauses: I) -> Result<Vec<ObjectId>, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("fetch object ids", ClauseCategory::Fetch, clauses, false)?;
        Ok(self.context.fetch_object_ids(&descriptor)?)
    }

    /// Identifiers of every matching record, or nothing.
    pub fn fetch_object_ids<I>(&self, clauses: I) -> Vec<ObjectId>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("fetch object ids", self.try_fetch_object_ids(clauses))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete every matching record, returning how many were deleted.
    pub fn try_delete_all<I>(&self, clauses: I) -> Result<usize, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("delete all", ClauseCategory::Delete, clauses, false)?;
        let deleted = self.context.delete_all(&descriptor)?;
        tracing::debug!(entity = %descriptor.entity, deleted, "delete all");
        Ok(deleted)
    }

    /// Delete every matching record, or `None` on failure.
    pub fn delete_all<I>(&self, clauses: I) -> Option<usize>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("delete all", self.try_delete_all(clauses))
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// The first value of the first result row, converted to `U`.
    ///
    /// `None` when nothing matches or the value is null.
    pub fn try_query_value<U, I>(&self, clauses: I) -> Result<Option<U>, ExecutionError>
    where
        U: SelectValue,
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("query value", ClauseCategory::Query, clauses, false)?;
        // Aggregates over no rows still yield a row, so count matches first.
        if self.context.fetch_count(&descriptor)? == 0 {
            return Ok(None);
        }
        match self.context.query_value(&descriptor)? {
            None => Ok(None),
            Some(value) if value.is_null() => Ok(None),
            Some(value) => U::from_value(&value)
                .map(Some)
                .ok_or_else(|| ExecutionError::type_mismatch(U::type_name(), value.type_name())),
        }
    }

    /// The first value of the first result row, or `None`.
    pub fn query_value<U, I>(&self, clauses: I) -> Option<U>
    where
        U: SelectValue,
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("query value", self.try_query_value(clauses))
            .flatten()
    }

    /// One ordered attribute map per result row.
    pub fn try_query_attributes<I>(&self, clauses: I) -> Result<Vec<AttributeMap>, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare("query attributes", ClauseCategory::Query, clauses, false)?;
        Ok(self.context.query_attributes(&descriptor)?)
    }

    /// One ordered attribute map per result row, or nothing.
    pub fn query_attributes<I>(&self, clauses: I) -> Vec<AttributeMap>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.collapse("query attributes", self.try_query_attributes(clauses))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Preconditions
    // ------------------------------------------------------------------

    fn check_confinement(&self, operation: &'static str) -> Result<(), ExecutionError> {
        self.context.confinement().check(
            operation,
            self.config.confinement_policy,
            self.diagnostics.as_ref(),
        )
    }

    /// Prepare a fetch returning records of `T`.
    fn prepare_objects<T, I>(&self, operation: &'static str, clauses: I) -> Result<FetchDescriptor, ExecutionError>
    where
        T: Entity,
        I: IntoIterator<Item = Clause>,
    {
        let descriptor = self.prepare(operation, ClauseCategory::Fetch, clauses, true)?;
        if descriptor.entity != T::entity_name() {
            return Err(ExecutionError::type_mismatch(T::entity_name(), descriptor.entity));
        }
        Ok(descriptor)
    }

    /// Check confinement, compile, validate the entity, and resolve the
    /// store scope.
    fn prepare<I>(
        &self,
        operation: &'static str,
        category: ClauseCategory,
        clauses: I,
        materializes: bool,
    ) -> Result<FetchDescriptor, ExecutionError>
    where
        I: IntoIterator<Item = Clause>,
    {
        self.check_confinement(operation)?;

        let descriptor = self.compiler.compile(category, clauses)?;
        let model = self
            .context
            .entity_model(&descriptor.entity)
            .ok_or_else(|| ExecutionError::UnknownEntity(descriptor.entity.clone()))?;
        if materializes && model.is_abstract {
            return Err(ExecutionError::AbstractEntity(descriptor.entity));
        }

        let stores = resolve_affected_stores(self.context, &descriptor)?;
        if stores.is_empty() {
            return Err(ExecutionError::StoreUnavailable {
                entity: descriptor.entity,
            });
        }

        tracing::trace!(
            operation,
            entity = %descriptor.entity,
            stores = stores.len(),
            "prepared request"
        );
        Ok(descriptor.with_affected_stores(stores))
    }

    /// Report a failure and drop it.
    fn collapse<V>(&self, operation: &str, result: Result<V, ExecutionError>) -> Option<V> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.diagnostics.error(&error, &format!("{operation} failed"));
                None
            }
        }
    }
}

fn decode_all<T: Entity>(records: &[Record]) -> Result<Vec<T>, ExecutionError> {
    records.iter().map(T::from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{EntitySelector, FromEntity, Select};
    use crate::config::ConfinementPolicy;
    use crate::context::EntityModel;
    use crate::diagnostics::{DiagnosticLevel, RecordingDiagnostics};
    use crate::entity::decode_field;
    use crate::error::{CompileError, ContextError};
    use crate::memory::MemoryContext;
    use ormfetch_proto::{Predicate, SelectTerm, Value};

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: i32,
    }

    impl Entity for Person {
        fn entity_name() -> &'static str {
            "Person"
        }

        fn from_record(record: &Record) -> Result<Self, ExecutionError> {
            Ok(Self {
                name: decode_field(record, "name")?,
                age: decode_field(record, "age")?,
            })
        }
    }

    struct Animal;

    impl Entity for Animal {
        fn entity_name() -> &'static str {
            "Animal"
        }

        fn from_record(_record: &Record) -> Result<Self, ExecutionError> {
            Ok(Animal)
        }
    }

    fn context() -> MemoryContext {
        let context = MemoryContext::new("test");
        context.register_entity(EntityModel::new("Person", ["main"]));
        context.register_entity(EntityModel::new("Animal", ["main"]).abstract_entity());
        context.register_entity(EntityModel::new("Ledger", ["vault"]));
        context.attach_store("main");
        for (name, age) in [("Bob", 17), ("Amy", 20), ("Cat", 40)] {
            context
                .insert(
                    "Person",
                    "main",
                    vec![("name".into(), Value::from(name)), ("age".into(), Value::Int32(age))],
                )
                .unwrap();
        }
        context
    }

    fn from_person() -> Clause {
        FromEntity::<Person>::new().into()
    }

    fn recording(context: &MemoryContext) -> (QueryExecutor<'_, MemoryContext>, Arc<RecordingDiagnostics>) {
        let diagnostics = Arc::new(RecordingDiagnostics::new());
        let executor = QueryExecutor::new(context)
            .with_config(EngineConfig::default().with_confinement_policy(ConfinementPolicy::Report))
            .with_diagnostics(diagnostics.clone());
        (executor, diagnostics)
    }

    #[test]
    fn test_fetch_all_without_clauses_returns_everything() {
        let context = context();
        let (executor, _) = recording(&context);
        let people: Vec<Person> = executor.fetch_all(vec![from_person()]);
        assert_eq!(people.len(), 3);
    }

    #[test]
    fn test_fetch_one_follows_sort() {
        let context = context();
        let (executor, _) = recording(&context);
        let oldest: Option<Person> = executor.fetch_one(vec![from_person(), Clause::desc("age")]);
        assert_eq!(
            oldest,
            Some(Person {
                name: "Cat".into(),
                age: 40
            })
        );
    }

    #[test]
    fn test_query_value_requires_select() {
        let context = context();
        let (executor, diagnostics) = recording(&context);
        let err = executor
            .try_query_value::<i64, _>(vec![from_person()])
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Compile(CompileError::MissingRequiredClause { .. })
        ));

        assert_eq!(executor.query_value::<i64, _>(vec![from_person()]), None);
        assert!(diagnostics.contains(DiagnosticLevel::Error, "query value failed"));
    }

    #[test]
    fn test_scalar_queries() {
        let context = context();
        let (executor, _) = recording(&context);

        let count: Option<i64> = executor.query_value(vec![
            from_person(),
            Predicate::ge("age", 18).into(),
            Select::<i64>::value(SelectTerm::count_all()).into(),
        ]);
        assert_eq!(count, Some(2));

        let youngest: Option<String> = executor.query_value(vec![
            from_person(),
            Clause::asc("age"),
            Select::<String>::value(SelectTerm::attribute("name")).into(),
        ]);
        assert_eq!(youngest.as_deref(), Some("Bob"));

        let nobody: Option<String> = executor.query_value(vec![
            from_person(),
            Predicate::gt("age", 100).into(),
            Select::<String>::value(SelectTerm::attribute("name")).into(),
        ]);
        assert_eq!(nobody, None);

        for term in [SelectTerm::count_all(), SelectTerm::sum("age")] {
            let over_nothing: Option<i64> = executor.query_value(vec![
                from_person(),
                Predicate::gt("age", 100).into(),
                Select::<i64>::value(term).into(),
            ]);
            assert_eq!(over_nothing, None);
        }
        assert_eq!(
            executor.fetch_count(vec![from_person(), Predicate::gt("age", 100).into()]),
            Some(0)
        );
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let context = context();
        let (executor, diagnostics) = recording(&context);
        let result = executor.try_query_value::<bool, _>(vec![
            from_person(),
            Select::<bool>::value(SelectTerm::attribute("name")).into(),
        ]);
        assert_eq!(result, Err(ExecutionError::type_mismatch("bool", "string")));

        let collapsed = executor.query_value::<bool, _>(vec![
            from_person(),
            Select::<bool>::value(SelectTerm::attribute("name")).into(),
        ]);
        assert_eq!(collapsed, None);
        assert!(diagnostics.contains(DiagnosticLevel::Error, "type mismatch"));
    }

    #[test]
    fn test_attribute_rows_keep_keys_and_order() {
        let context = context();
        let (executor, _) = recording(&context);
        let rows = executor.query_attributes(vec![
            from_person(),
            Clause::desc("name"),
            Select::<AttributeMap>::attributes(vec![SelectTerm::attribute("name"), SelectTerm::attribute("age")]).into(),
        ]);
        let names: Vec<_> = rows.iter().filter_map(|r| r.get("name")).collect();
        assert_eq!(names, vec![&Value::from("Cat"), &Value::from("Bob"), &Value::from("Amy")]);
        assert!(rows.iter().all(|r| r.keys().collect::<Vec<_>>() == vec!["name", "age"]));
    }

    #[test]
    fn test_identifier_handoff() {
        let context = context();
        let (executor, _) = recording(&context);
        let ids = executor.fetch_object_ids(vec![from_person(), Clause::asc("name")]);
        assert_eq!(ids.len(), 3);

        let bytes = ids[0].to_handoff_bytes().unwrap();
        let id = ObjectId::from_handoff_bytes(&bytes).unwrap();
        let amy: Option<Person> = executor.fetch_existing(&id);
        assert_eq!(amy.map(|p| p.name).as_deref(), Some("Amy"));

        let many: Vec<Person> = executor.fetch_existing_many(&ids);
        assert_eq!(many.len(), 3);
    }

    #[test]
    fn test_failed_lookup_is_reported_not_dropped() {
        let context = context();
        let (executor, diagnostics) = recording(&context);
        let ids = executor.fetch_object_ids(vec![from_person()]);

        context.fail_next(ContextError::Store("index corrupt".into()));
        assert_eq!(
            executor.try_fetch_existing_many::<Person>(&ids),
            Err(ExecutionError::Underlying(ContextError::Store("index corrupt".into())))
        );

        context.fail_next(ContextError::Store("index corrupt".into()));
        let people: Vec<Person> = executor.fetch_existing_many(&ids);
        assert!(people.is_empty());
        assert!(diagnostics.contains(DiagnosticLevel::Error, "index corrupt"));
    }

    #[test]
    fn test_entity_type_must_match_selector() {
        let context = context();
        let (executor, _) = recording(&context);
        let result = executor.try_fetch_all::<Person, _>(vec![EntitySelector::new("Ledger").into()]);
        assert_eq!(result, Err(ExecutionError::type_mismatch("Person", "Ledger")));
    }

    #[test]
    fn test_abstract_and_unknown_entities() {
        let context = context();
        let (executor, _) = recording(&context);
        assert_eq!(
            executor.try_fetch_all::<Animal, _>(vec![FromEntity::<Animal>::new().into()]).err(),
            Some(ExecutionError::AbstractEntity("Animal".into()))
        );
        assert_eq!(
            executor.try_fetch_count(vec![EntitySelector::new("Robot").into()]),
            Err(ExecutionError::UnknownEntity("Robot".into()))
        );
    }

    #[test]
    fn test_store_unavailable() {
        let context = context();
        let (executor, diagnostics) = recording(&context);
        assert_eq!(
            executor.try_fetch_count(vec![EntitySelector::new("Ledger").into()]),
            Err(ExecutionError::StoreUnavailable {
                entity: "Ledger".into()
            })
        );
        assert_eq!(executor.fetch_count(vec![EntitySelector::new("Ledger").into()]), None);
        assert!(diagnostics.contains(DiagnosticLevel::Error, "no persistent store"));
    }

    #[test]
    fn test_underlying_failure_preserves_cause() {
        let context = context();
        let (executor, diagnostics) = recording(&context);
        context.fail_next(ContextError::Store("disk on fire".into()));

        let people: Vec<Person> = executor.fetch_all(vec![from_person()]);
        assert!(people.is_empty());
        assert!(diagnostics.contains(DiagnosticLevel::Error, "disk on fire"));
    }

    #[test]
    fn test_malformed_predicate_is_underlying() {
        let context = context();
        let (executor, _) = recording(&context);
        let result = executor.try_fetch_count(vec![from_person(), Predicate::like("age", "1%").into()]);
        assert!(matches!(
            result,
            Err(ExecutionError::Underlying(ContextError::InvalidPredicate(_)))
        ));
    }

    #[test]
    fn test_delete_all() {
        let context = context();
        let (executor, _) = recording(&context);
        let deleted = executor.delete_all(vec![from_person(), Predicate::lt("age", 18).into()]);
        assert_eq!(deleted, Some(1));
        assert_eq!(executor.fetch_count(vec![from_person()]), Some(2));
        assert_eq!(context.pending_changes(), 4);
    }

    #[test]
    fn test_confinement_violation_reported() {
        let context = context();
        let (executor, diagnostics) = recording(&context);

        let result = std::thread::scope(|s| {
            s.spawn(|| executor.try_fetch_count(vec![from_person()]))
                .join()
                .unwrap()
        });
        assert_eq!(
            result,
            Err(ExecutionError::ConfinementViolation {
                operation: "fetch count"
            })
        );
        assert!(diagnostics.contains(DiagnosticLevel::Error, "assertion failed"));
    }
}
