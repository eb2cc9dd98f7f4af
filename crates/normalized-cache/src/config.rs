//! Cache construction options: keying functions, resolvers, updaters,
//! optimistic resolvers, the schema descriptor and the logging hook.

use std::{collections::HashMap, sync::Arc};

use schema_registry::SchemaRegistry;
use serde_json::Value;

use crate::{
    error::{default_logger, Logger, Severity, UpdaterError},
    handle::CacheHandle,
    operation::{OperationKind, Variables},
};

/// Context handed to resolvers, updaters and optimistic resolvers.
pub struct FieldInfo<'a> {
    pub parent_typename: &'a str,
    pub field_name: &'a str,
    pub variables: &'a Variables,
}

/// Derives an entity id from an object of the configured type. Returning
/// `None` embeds the object under its parent.
pub type KeyResolver = Arc<dyn Fn(&serde_json::Map<String, Value>) -> Option<String> + Send + Sync>;

/// Computes a field's value during read traversal instead of the store.
///
/// `parent` carries the entity's `__typename` and id fields. Returning
/// `None` falls back to the stored value. A returned object containing
/// `__typename` plus an id resolves to the referenced entity.
pub type Resolver =
    Arc<dyn Fn(&Value, &Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Option<Value> + Send + Sync>;

/// Reacts to a written root field, queueing extra writes through the handle.
pub type Updater =
    Arc<dyn Fn(&Value, &Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Result<(), UpdaterError> + Send + Sync>;

/// Synthesizes an optimistic result for a mutation field.
pub type OptimisticResolver = Arc<dyn Fn(&Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Value + Send + Sync>;

/// Configuration of one cache instance.
#[derive(Clone)]
pub struct CacheConfig {
    pub(crate) keys: HashMap<String, KeyResolver>,
    pub(crate) resolvers: HashMap<String, HashMap<String, Resolver>>,
    pub(crate) updates: HashMap<String, HashMap<String, Updater>>,
    pub(crate) optimistic: HashMap<String, OptimisticResolver>,
    pub(crate) schema: Option<SchemaRegistry>,
    pub(crate) logger: Logger,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            keys: HashMap::new(),
            resolvers: HashMap::new(),
            updates: HashMap::new(),
            optimistic: HashMap::new(),
            schema: None,
            logger: default_logger(),
        }
    }
}

impl CacheConfig {
    pub fn with_key(
        mut self,
        typename: &str,
        key: impl Fn(&serde_json::Map<String, Value>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.keys.insert(typename.to_owned(), Arc::new(key));
        self
    }

    pub fn with_resolver(
        mut self,
        typename: &str,
        field: &str,
        resolver: impl Fn(&Value, &Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Option<Value>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.resolvers
            .entry(typename.to_owned())
            .or_default()
            .insert(field.to_owned(), Arc::new(resolver));
        self
    }

    pub fn with_updater(
        mut self,
        typename: &str,
        field: &str,
        updater: impl Fn(&Value, &Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Result<(), UpdaterError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.updates
            .entry(typename.to_owned())
            .or_default()
            .insert(field.to_owned(), Arc::new(updater));
        self
    }

    pub fn with_optimistic(
        mut self,
        field: &str,
        resolver: impl Fn(&Variables, &mut CacheHandle<'_>, &FieldInfo<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.optimistic.insert(field.to_owned(), Arc::new(resolver));
        self
    }

    pub fn with_schema(mut self, schema: SchemaRegistry) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_logger(mut self, logger: impl Fn(Severity, &str) + Send + Sync + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub(crate) fn log(&self, severity: Severity, message: &str) {
        (self.logger)(severity, message);
    }

    pub(crate) fn resolver(&self, typename: &str, field: &str) -> Option<&Resolver> {
        self.resolvers.get(typename)?.get(field)
    }

    pub(crate) fn updater(&self, typename: &str, field: &str) -> Option<&Updater> {
        self.updates.get(typename)?.get(field)
    }

    pub(crate) fn schema(&self) -> Option<&SchemaRegistry> {
        self.schema.as_ref()
    }

    /// The root object type name for an operation kind.
    pub(crate) fn root_typename(&self, kind: OperationKind) -> &str {
        match (&self.schema, kind) {
            (Some(schema), OperationKind::Query) => schema.query_type(),
            (Some(schema), OperationKind::Mutation) => schema.mutation_type(),
            (Some(schema), OperationKind::Subscription) => schema.subscription_type(),
            (None, OperationKind::Query) => "Query",
            (None, OperationKind::Mutation) => "Mutation",
            (None, OperationKind::Subscription) => "Subscription",
        }
    }
}
