//! The write traversal: walks a result against the lowered selection set,
//! normalizing objects into records and links on a target layer, invoking
//! user updaters, and collecting the touched dependency set.

use serde_json::Value;

use crate::{
    config::FieldInfo,
    document::{arguments, DocumentCache, DocumentInfo, FieldSelection},
    error::{InvariantViolation, Severity},
    handle::{CacheHandle, QueuedWrite},
    key::{self, EntityKey, FieldKey},
    operation::{GraphqlError, PathSegment, Variables},
    store::{LayerTarget, Link, StagedWrite, Store, WriteTxn},
    CacheConfig,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Query,
    Mutation,
    Subscription,
}

/// Whether any root selection of a mutation has an optimistic resolver.
pub(crate) fn has_optimistic(document: &DocumentInfo, config: &CacheConfig) -> bool {
    document
        .selections
        .iter()
        .any(|field| config.optimistic.contains_key(&field.name))
}

/// Ingests a result into the target layer, returning the staged write.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_operation(
    store: &Store,
    config: &CacheConfig,
    documents: &mut DocumentCache,
    document: &DocumentInfo,
    variables: &Variables,
    data: &serde_json::Map<String, Value>,
    target: LayerTarget,
    kind: WriteKind,
    error: Option<&GraphqlError>,
    root: EntityKey,
) -> StagedWrite {
    let mut run = WriteRun {
        store,
        config,
        documents,
        txn: store.begin(target),
        mutation_result: kind == WriteKind::Mutation,
    };
    let bindings = Bindings {
        variables,
        defaults: &document.variable_defaults,
    };
    let root_typename = root.typename().unwrap_or_default().to_owned();
    run.write_selection_set(&root, &root_typename, &document.selections, data, bindings, true);
    if let Some(error) = error {
        run.record_error_path(document, &root, bindings, error);
    }
    run.txn.finish()
}

/// Synthesizes and writes the optimistic result of a mutation into its
/// optimistic layer, updaters included.
pub(crate) fn write_optimistic(
    store: &Store,
    config: &CacheConfig,
    documents: &mut DocumentCache,
    document: &DocumentInfo,
    variables: &Variables,
    target: LayerTarget,
    root: EntityKey,
) -> StagedWrite {
    let mut run = WriteRun {
        store,
        config,
        documents,
        txn: store.begin(target),
        mutation_result: false,
    };
    let bindings = Bindings {
        variables,
        defaults: &document.variable_defaults,
    };
    let root_typename = root.typename().unwrap_or_default().to_owned();

    let mut data = serde_json::Map::new();
    for field in &document.selections {
        if !arguments::is_included(field, bindings.variables, bindings.defaults) {
            continue;
        }
        let Some(resolver) = run.config.optimistic.get(&field.name).cloned() else {
            continue;
        };
        let args = arguments::bind_arguments(field, bindings.variables, bindings.defaults);
        let queued;
        let value = {
            let mut handle = CacheHandle::new(run.store, run.config, run.documents, bindings.variables, true);
            let info = FieldInfo {
                parent_typename: &root_typename,
                field_name: &field.name,
                variables: bindings.variables,
            };
            let value = resolver(&args, &mut handle, &info);
            queued = handle.into_queued();
            value
        };
        run.apply_queued(queued);
        data.insert(field.response_key().to_owned(), value);
    }

    run.write_selection_set(&root, &root_typename, &document.selections, &data, bindings, true);
    run.txn.finish()
}

/// Records the fields of an error-only result as known null, so later reads
/// do not re-classify them as cache misses.
pub(crate) fn record_error_only(
    store: &Store,
    config: &CacheConfig,
    documents: &mut DocumentCache,
    document: &DocumentInfo,
    variables: &Variables,
    target: LayerTarget,
    error: &GraphqlError,
    root: EntityKey,
) -> StagedWrite {
    let mut run = WriteRun {
        store,
        config,
        documents,
        txn: store.begin(target),
        mutation_result: false,
    };
    let bindings = Bindings {
        variables,
        defaults: &document.variable_defaults,
    };
    run.record_error_path(document, &root, bindings, error);
    run.txn.finish()
}

/// Variable bindings in effect for one document's traversal.
#[derive(Clone, Copy)]
struct Bindings<'v> {
    variables: &'v Variables,
    defaults: &'v Variables,
}

struct WriteRun<'a, 'b> {
    store: &'a Store,
    config: &'a CacheConfig,
    documents: &'b mut DocumentCache,
    txn: WriteTxn<'a>,
    mutation_result: bool,
}

impl WriteRun<'_, '_> {
    fn write_selection_set(
        &mut self,
        entity: &EntityKey,
        typename: &str,
        selections: &[FieldSelection],
        data: &serde_json::Map<String, Value>,
        bindings: Bindings<'_>,
        root: bool,
    ) {
        for field in selections {
            if !arguments::is_included(field, bindings.variables, bindings.defaults) {
                continue;
            }
            if let Some(condition) = &field.type_condition {
                if !self.type_matches(condition, typename) {
                    continue;
                }
            }
            if field.name == "__typename" {
                continue;
            }
            let Some(value) = data.get(field.response_key()) else {
                if !field.deferred {
                    self.config.log(
                        Severity::Debug,
                        &format!("result is missing field \"{}\" on \"{typename}\"", field.name),
                    );
                }
                continue;
            };

            let args = arguments::bind_arguments(field, bindings.variables, bindings.defaults);
            let field_key = key::field_key(typename, &field.name, &args, self.config.schema());

            if let Some(schema) = self.config.schema() {
                if schema.has_type(typename) && schema.field(typename, &field.name).is_none() {
                    self.config.log(
                        Severity::Warn,
                        &format!("field \"{typename}.{}\" is not declared by the schema", field.name),
                    );
                }
            }

            if self.mutation_result
                && self.txn.entity_known(entity)
                && !self.txn.base_contains(entity, &field_key)
            {
                self.txn.invalidate_type(typename);
            }

            if field.composite {
                self.write_composite(entity, &field_key, field, value, bindings);
            } else {
                self.txn.write_record(entity.clone(), field_key.clone(), value.clone());
            }

            if root {
                self.run_updater(typename, field, &args, value, bindings);
            }
        }
    }

    fn write_composite(
        &mut self,
        entity: &EntityKey,
        field_key: &FieldKey,
        field: &FieldSelection,
        value: &Value,
        bindings: Bindings<'_>,
    ) {
        match value {
            Value::Null => {
                self.txn.write_link(entity.clone(), field_key.clone(), Link::Null);
            }
            Value::Object(map) => {
                if map.get("__typename").and_then(Value::as_str).is_some() {
                    let link = self.link_for_object(entity, field_key, field, map, &[], bindings);
                    self.txn.write_link(entity.clone(), field_key.clone(), link);
                } else {
                    let violation = InvariantViolation::MissingTypename {
                        entity: entity.to_string(),
                        field: field_key.to_string(),
                    };
                    self.config.log(Severity::Error, &violation.to_string());
                    self.txn.write_record(entity.clone(), field_key.clone(), value.clone());
                }
            }
            Value::Array(items) => {
                let link = Link::List(self.link_elements(entity, field_key, field, items, &[], bindings));
                self.txn.write_link(entity.clone(), field_key.clone(), link);
            }
            _ => {
                self.config.log(
                    Severity::Warn,
                    &format!("expected an object for field \"{field_key}\" on \"{entity}\""),
                );
                self.txn.write_record(entity.clone(), field_key.clone(), value.clone());
            }
        }
    }

    fn link_for_object(
        &mut self,
        parent: &EntityKey,
        field_key: &FieldKey,
        field: &FieldSelection,
        map: &serde_json::Map<String, Value>,
        index_path: &[usize],
        bindings: Bindings<'_>,
    ) -> Link {
        let typename = map
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let child = match key::entity_key(self.config, &typename, map) {
            Some(key) => key,
            None if index_path.is_empty() => EntityKey::embedded(parent, field_key),
            None => {
                let mut suffix = field_key.to_string();
                for index in index_path {
                    suffix.push('.');
                    suffix.push_str(&index.to_string());
                }
                EntityKey::new(format!("{parent}.{suffix}"))
            }
        };

        self.txn
            .write_record(child.clone(), FieldKey::new("__typename"), Value::String(typename.clone()));
        self.write_selection_set(&child, &typename, &field.children, map, bindings, false);
        Link::Entity(child)
    }

    fn link_elements(
        &mut self,
        parent: &EntityKey,
        field_key: &FieldKey,
        field: &FieldSelection,
        items: &[Value],
        index_path: &[usize],
        bindings: Bindings<'_>,
    ) -> Vec<Link> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut path = index_path.to_vec();
                path.push(index);
                match item {
                    Value::Null => Link::Null,
                    Value::Object(map) if map.get("__typename").and_then(Value::as_str).is_some() => {
                        self.link_for_object(parent, field_key, field, map, &path, bindings)
                    }
                    Value::Array(nested) => {
                        Link::List(self.link_elements(parent, field_key, field, nested, &path, bindings))
                    }
                    _ => {
                        let violation = InvariantViolation::MissingTypename {
                            entity: parent.to_string(),
                            field: field_key.to_string(),
                        };
                        self.config.log(Severity::Error, &violation.to_string());
                        Link::Null
                    }
                }
            })
            .collect()
    }

    fn run_updater(
        &mut self,
        typename: &str,
        field: &FieldSelection,
        args: &Variables,
        value: &Value,
        bindings: Bindings<'_>,
    ) {
        let Some(updater) = self.config.updater(typename, &field.name).cloned() else {
            return;
        };
        let queued = {
            let mut handle = CacheHandle::new(self.store, self.config, self.documents, bindings.variables, true);
            let info = FieldInfo {
                parent_typename: typename,
                field_name: &field.name,
                variables: bindings.variables,
            };
            match updater(value, args, &mut handle, &info) {
                Ok(()) => handle.into_queued(),
                Err(err) => {
                    self.config.log(
                        Severity::Error,
                        &format!("updater for \"{typename}.{}\" failed: {err}", field.name),
                    );
                    return;
                }
            }
        };
        self.apply_queued(queued);
    }

    fn apply_queued(&mut self, queued: Vec<QueuedWrite>) {
        for write in queued {
            match write {
                QueuedWrite::Fragment { document, data } => self.write_fragment_data(&document, data),
                QueuedWrite::Query {
                    document,
                    variables,
                    data,
                } => self.write_query_data(&document, variables, data),
                QueuedWrite::Invalidate { entity, field } => match field {
                    Some((name, args)) => {
                        let typename = self.store.entity_typename(&entity).unwrap_or_default();
                        let field_key =
                            key::field_key(&typename, &name, &args.unwrap_or_default(), self.config.schema());
                        self.txn.remove(entity, field_key);
                    }
                    None => self.txn.invalidate_entity(&entity),
                },
            }
        }
    }

    fn write_fragment_data(&mut self, document: &str, data: Value) {
        let document = match self.documents.analyzed(document) {
            Ok(document) => document,
            Err(err) => {
                self.config.log(Severity::Error, &err.to_string());
                return;
            }
        };
        let Some(map) = data.as_object() else {
            self.config.log(Severity::Warn, "fragment data must be an object");
            return;
        };
        let typename = map
            .get("__typename")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| document.root_condition.clone());
        let Some(typename) = typename else {
            self.config
                .log(Severity::Warn, "fragment data carries no __typename");
            return;
        };
        let Some(entity) = key::entity_key(self.config, &typename, map) else {
            self.config.log(
                Severity::Warn,
                &format!("fragment data for type \"{typename}\" has no key"),
            );
            return;
        };

        self.txn
            .write_record(entity.clone(), FieldKey::new("__typename"), Value::String(typename.clone()));
        let empty = Variables::new();
        let bindings = Bindings {
            variables: &empty,
            defaults: &document.variable_defaults,
        };
        self.write_selection_set(&entity, &typename, &document.selections, map, bindings, false);
    }

    fn write_query_data(&mut self, document: &str, variables: Option<Variables>, data: Value) {
        let document = match self.documents.analyzed(document) {
            Ok(document) => document,
            Err(err) => {
                self.config.log(Severity::Error, &err.to_string());
                return;
            }
        };
        let Some(map) = data.as_object() else {
            self.config.log(Severity::Warn, "updated query data must be an object");
            return;
        };
        let variables = variables.unwrap_or_default();
        let bindings = Bindings {
            variables: &variables,
            defaults: &document.variable_defaults,
        };
        let root = EntityKey::root(self.config.root_typename(document.kind()));
        let root_typename = root.typename().unwrap_or_default().to_owned();
        self.write_selection_set(&root, &root_typename, &document.selections, map, bindings, false);
    }

    /// Follows an error path through the written links and records the
    /// terminal field as known null when nothing else occupies the slot.
    fn record_error_path(
        &mut self,
        document: &DocumentInfo,
        root: &EntityKey,
        bindings: Bindings<'_>,
        error: &GraphqlError,
    ) {
        if error.path.is_empty() {
            return;
        }
        let mut entity = root.clone();
        let mut typename = root.typename().unwrap_or_default().to_owned();
        let mut selections: &[FieldSelection] = &document.selections;
        let mut segments = error.path.iter().peekable();

        loop {
            let Some(PathSegment::Field(name)) = segments.next() else {
                return;
            };
            let Some(field) = selections.iter().find(|field| field.response_key() == name.as_str()) else {
                return;
            };
            let args = arguments::bind_arguments(field, bindings.variables, bindings.defaults);
            let field_key = key::field_key(&typename, &field.name, &args, self.config.schema());

            if segments.peek().is_none() {
                if !self.txn.contains(&entity, &field_key) {
                    if field.composite {
                        self.txn.write_link(entity.clone(), field_key, Link::Null);
                    } else {
                        self.txn.write_record(entity.clone(), field_key, Value::Null);
                    }
                }
                return;
            }

            let Some(mut link) = self.txn.visible_link(&entity, &field_key) else {
                return;
            };
            while let Some(PathSegment::Index(index)) = segments.peek() {
                let Link::List(items) = link else { return };
                let Some(item) = items.get(*index) else { return };
                link = item.clone();
                segments.next();
            }
            match link {
                Link::Entity(next) => {
                    typename = self.store.entity_typename(&next).unwrap_or_default();
                    entity = next;
                    selections = &field.children;
                }
                _ => return,
            }
        }
    }

    fn type_matches(&self, condition: &str, typename: &str) -> bool {
        if condition == typename {
            return true;
        }
        self.config
            .schema()
            .is_some_and(|schema| schema.is_possible_type(condition, typename))
    }
}
