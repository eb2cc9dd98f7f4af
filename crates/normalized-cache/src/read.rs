//! The read traversal: walks a lowered selection set against the composed
//! layers, producing a denormalized [`OutputValue`], the dependency set of
//! everything it looked at, and a completeness classification.
//!
//! Entity subtrees are memoized by `(entity, selection fingerprint)` so a
//! re-read of unchanged data returns the previously produced allocation.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde_json::Value;

use crate::{
    config::FieldInfo,
    document::{arguments, DocumentCache, DocumentInfo, FieldSelection},
    error::{InvariantViolation, Severity},
    handle::CacheHandle,
    key::{self, Dependency, EntityKey, FieldKey},
    operation::{CacheOutcome, Variables},
    output::{OutputObject, OutputValue},
    store::{Link, SlotValue, Store},
    CacheConfig,
};

pub(crate) struct ReadOutput {
    pub data: Option<OutputValue>,
    pub dependencies: IndexSet<Dependency>,
    pub typenames: IndexSet<String>,
    pub partial: bool,
}

impl ReadOutput {
    pub fn outcome(&self) -> CacheOutcome {
        match &self.data {
            None => CacheOutcome::Miss,
            Some(_) if self.partial => CacheOutcome::Partial,
            Some(_) => CacheOutcome::Hit,
        }
    }
}

/// Memoized entity subtrees, shared across operations with equal selection
/// shapes. Entries are validated against per-entity write generations.
#[derive(Default)]
pub(crate) struct ReadMemo {
    entries: HashMap<(EntityKey, u64), MemoEntry>,
}

#[derive(Clone)]
struct MemoEntry {
    value: OutputValue,
    dependencies: Vec<Dependency>,
    typenames: Vec<String>,
    partial: bool,
    entities: Vec<(EntityKey, u64)>,
}

impl ReadMemo {
    fn lookup(&self, store: &Store, key: &(EntityKey, u64)) -> Option<MemoEntry> {
        let entry = self.entries.get(key)?;
        let valid = entry
            .entities
            .iter()
            .all(|(entity, generation)| store.entity_generation(entity) <= *generation);
        valid.then(|| entry.clone())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub(crate) fn read_operation(
    store: &Store,
    config: &CacheConfig,
    documents: &mut DocumentCache,
    memo: Option<&mut ReadMemo>,
    document: &DocumentInfo,
    variables: &Variables,
    root: EntityKey,
) -> ReadOutput {
    let mut run = ReadRun {
        store,
        config,
        documents,
        memo,
        variables,
        defaults: &document.variable_defaults,
        dependencies: IndexSet::new(),
        typenames: IndexSet::new(),
        partial: false,
        collectors: Vec::new(),
    };
    let data = run.read_entity(&root, &document.selections);
    ReadOutput {
        data,
        dependencies: run.dependencies,
        typenames: run.typenames,
        partial: run.partial,
    }
}

struct ReadRun<'a> {
    store: &'a Store,
    config: &'a CacheConfig,
    documents: &'a mut DocumentCache,
    memo: Option<&'a mut ReadMemo>,
    variables: &'a Variables,
    defaults: &'a Variables,
    dependencies: IndexSet<Dependency>,
    typenames: IndexSet<String>,
    partial: bool,
    /// One frame per in-flight memoizable subtree.
    collectors: Vec<Collector>,
}

#[derive(Default)]
struct Collector {
    dependencies: Vec<Dependency>,
    typenames: Vec<String>,
    entities: IndexSet<EntityKey>,
    partial: bool,
    /// A resolver ran somewhere below; the subtree must not be memoized.
    tainted: bool,
}

impl ReadRun<'_> {
    fn add_dependency(&mut self, entity: &EntityKey, field: &FieldKey) {
        let dependency = Dependency::new(entity.clone(), field.clone());
        for collector in &mut self.collectors {
            collector.dependencies.push(dependency.clone());
        }
        self.dependencies.insert(dependency);
    }

    fn note_typename(&mut self, typename: &str) {
        for collector in &mut self.collectors {
            collector.typenames.push(typename.to_owned());
        }
        self.typenames.insert(typename.to_owned());
    }

    fn note_entity(&mut self, entity: &EntityKey) {
        for collector in &mut self.collectors {
            collector.entities.insert(entity.clone());
        }
    }

    fn mark_partial(&mut self) {
        self.partial = true;
        for collector in &mut self.collectors {
            collector.partial = true;
        }
    }

    fn taint(&mut self) {
        for collector in &mut self.collectors {
            collector.tainted = true;
        }
    }

    fn read_entity(&mut self, entity: &EntityKey, selections: &[FieldSelection]) -> Option<OutputValue> {
        let Some(typename) = self.store.entity_typename(entity) else {
            self.config.log(
                Severity::Error,
                &format!("entity \"{entity}\" has no resolvable __typename"),
            );
            return None;
        };

        let fingerprint = arguments::set_fingerprint(selections, self.variables, self.defaults);
        let memo_key = (entity.clone(), fingerprint);

        let hit = match self.memo.as_deref() {
            Some(memo) => memo.lookup(self.store, &memo_key),
            None => None,
        };
        if let Some(entry) = hit {
            for dependency in entry.dependencies {
                for collector in &mut self.collectors {
                    collector.dependencies.push(dependency.clone());
                }
                self.dependencies.insert(dependency);
            }
            for typename in entry.typenames {
                for collector in &mut self.collectors {
                    collector.typenames.push(typename.clone());
                }
                self.typenames.insert(typename);
            }
            for (entity, _) in &entry.entities {
                for collector in &mut self.collectors {
                    collector.entities.insert(entity.clone());
                }
            }
            if entry.partial {
                self.mark_partial();
            }
            return Some(entry.value);
        }

        self.collectors.push(Collector::default());
        self.note_entity(entity);
        self.note_typename(&typename);
        let result = self.read_selection_set(entity, &typename, selections);
        let collector = self.collectors.pop().unwrap();

        if let Some(value) = &result {
            if !collector.tainted {
                let store = self.store;
                if let Some(memo) = self.memo.as_deref_mut() {
                    let entities = collector
                        .entities
                        .iter()
                        .map(|entity| (entity.clone(), store.entity_generation(entity)))
                        .collect();
                    memo.entries.insert(
                        memo_key,
                        MemoEntry {
                            value: value.clone(),
                            dependencies: collector.dependencies,
                            typenames: collector.typenames,
                            partial: collector.partial,
                            entities,
                        },
                    );
                }
            }
        }
        result
    }

    fn read_selection_set(
        &mut self,
        entity: &EntityKey,
        typename: &str,
        selections: &[FieldSelection],
    ) -> Option<OutputValue> {
        let mut object = OutputObject::default();
        for field in selections {
            if !arguments::is_included(field, self.variables, self.defaults) {
                continue;
            }
            if let Some(condition) = &field.type_condition {
                if !self.type_matches(condition, typename) {
                    continue;
                }
            }
            let response_key = field.response_key().to_owned();
            if field.name == "__typename" {
                object
                    .fields
                    .insert(response_key, OutputValue::scalar(Value::String(typename.to_owned())));
                continue;
            }

            let args = arguments::bind_arguments(field, self.variables, self.defaults);
            let field_key = key::field_key(typename, &field.name, &args, self.config.schema());
            self.add_dependency(entity, &field_key);

            match self.field_value(entity, typename, field, &field_key, &args) {
                Some(value) => {
                    object.fields.insert(response_key, value);
                }
                None => {
                    if self.tolerates_missing(typename, field) {
                        self.mark_partial();
                        object.fields.insert(response_key, OutputValue::Null);
                    } else {
                        return None;
                    }
                }
            }
        }
        Some(object.into())
    }

    /// `None` means the value is missing or a required descendant was; the
    /// caller applies optional/schema tolerance.
    fn field_value(
        &mut self,
        entity: &EntityKey,
        typename: &str,
        field: &FieldSelection,
        field_key: &FieldKey,
        args: &Variables,
    ) -> Option<OutputValue> {
        if let Some(resolver) = self.config.resolver(typename, &field.name).cloned() {
            self.taint();
            let parent = self.parent_object(entity, typename);
            let resolved = {
                let mut handle =
                    CacheHandle::new(self.store, self.config, self.documents, self.variables, false);
                let info = FieldInfo {
                    parent_typename: typename,
                    field_name: &field.name,
                    variables: self.variables,
                };
                resolver(&parent, args, &mut handle, &info)
            };
            if let Some(value) = resolved {
                return self.literal_value(&value, field, typename);
            }
        }

        match self.store.slot(entity, field_key) {
            Some(SlotValue::Record(value)) => {
                if field.composite {
                    let violation = InvariantViolation::RecordWhereLinkExpected {
                        entity: entity.to_string(),
                        field: field_key.to_string(),
                    };
                    self.config.log(Severity::Error, &violation.to_string());
                    return None;
                }
                Some(OutputValue::scalar(value.clone()))
            }
            Some(SlotValue::Link(link)) => {
                if !field.composite {
                    let violation = InvariantViolation::LinkWhereRecordExpected {
                        entity: entity.to_string(),
                        field: field_key.to_string(),
                    };
                    self.config.log(Severity::Error, &violation.to_string());
                    return None;
                }
                let link = link.clone();
                self.link_value(&link, typename, field)
            }
            None => {
                let message = if args.is_empty() {
                    format!("No value for field \"{}\" on entity \"{entity}\"", field.name)
                } else {
                    format!(
                        "No value for field \"{}\" with args {} on entity \"{entity}\"",
                        field.name,
                        Value::Object(args.clone())
                    )
                };
                self.config.log(Severity::Debug, &message);
                None
            }
        }
    }

    fn link_value(&mut self, link: &Link, parent_typename: &str, field: &FieldSelection) -> Option<OutputValue> {
        match link {
            Link::Null => Some(OutputValue::Null),
            Link::Entity(key) => self.read_entity(key, &field.children),
            Link::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.link_value(item, parent_typename, field) {
                        Some(value) => out.push(value),
                        None => {
                            if self.tolerates_missing(parent_typename, field) {
                                self.mark_partial();
                                out.push(OutputValue::Null);
                            } else {
                                return None;
                            }
                        }
                    }
                }
                Some(out.into())
            }
        }
    }

    /// A value a resolver produced: keyed objects continue through the
    /// store, everything else is walked literally.
    fn literal_value(&mut self, value: &Value, field: &FieldSelection, parent_typename: &str) -> Option<OutputValue> {
        if !field.composite {
            return Some(OutputValue::scalar(value.clone()));
        }
        match value {
            Value::Null => Some(OutputValue::Null),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.literal_value(item, field, parent_typename) {
                        Some(value) => out.push(value),
                        None => {
                            if self.tolerates_missing(parent_typename, field) {
                                self.mark_partial();
                                out.push(OutputValue::Null);
                            } else {
                                return None;
                            }
                        }
                    }
                }
                Some(out.into())
            }
            Value::Object(map) => {
                if let Some(typename) = map.get("__typename").and_then(Value::as_str) {
                    if let Some(key) = key::entity_key(self.config, typename, map) {
                        return self.read_entity(&key, &field.children);
                    }
                }
                self.literal_object(map, field)
            }
            _ => {
                self.config.log(
                    Severity::Error,
                    &format!("resolver returned a scalar for composite field \"{}\"", field.name),
                );
                None
            }
        }
    }

    fn literal_object(&mut self, map: &serde_json::Map<String, Value>, field: &FieldSelection) -> Option<OutputValue> {
        let typename = map
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let mut object = OutputObject::default();
        for child in &field.children {
            if !arguments::is_included(child, self.variables, self.defaults) {
                continue;
            }
            if let Some(condition) = &child.type_condition {
                if !self.type_matches(condition, &typename) {
                    continue;
                }
            }
            let response_key = child.response_key().to_owned();
            if child.name == "__typename" {
                object
                    .fields
                    .insert(response_key, OutputValue::scalar(Value::String(typename.clone())));
                continue;
            }
            let value = map.get(&response_key).or_else(|| map.get(&child.name));
            let resolved = match value {
                Some(value) => self.literal_value(value, child, &typename),
                None => None,
            };
            match resolved {
                Some(value) => {
                    object.fields.insert(response_key, value);
                }
                None => {
                    if self.tolerates_missing(&typename, child) {
                        self.mark_partial();
                        object.fields.insert(response_key, OutputValue::Null);
                    } else {
                        return None;
                    }
                }
            }
        }
        Some(object.into())
    }

    fn tolerates_missing(&self, typename: &str, field: &FieldSelection) -> bool {
        match field.optional {
            Some(optional) => optional,
            None => {
                field.deferred
                    || self
                        .config
                        .schema()
                        .and_then(|schema| schema.field(typename, &field.name))
                        .is_some_and(|declared| declared.nullable())
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

    fn parent_object(&self, entity: &EntityKey, typename: &str) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("__typename".to_owned(), Value::String(typename.to_owned()));
        for id_field in ["id", "_id"] {
            if let Some(value) = self.store.read_record(entity, &FieldKey::new(id_field)) {
                object.insert(id_field.to_owned(), value.clone());
            }
        }
        Value::Object(object)
    }
}
