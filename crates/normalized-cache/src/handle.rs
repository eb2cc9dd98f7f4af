//! The mediated cache API handed to user resolvers, updaters and optimistic
//! resolvers.
//!
//! Reads observe the composed layers directly; writes are queued and folded
//! into the currently open transaction once the user function returns, so a
//! failing updater aborts its own writes and nothing else.

use itertools::Itertools;
use serde_json::Value;

use crate::{
    document::DocumentCache,
    error::Severity,
    key::{self, EntityKey, FieldKey},
    operation::Variables,
    read,
    store::{Link, Store},
    CacheConfig,
};

/// A field slot of an entity, as reported by [`CacheHandle::inspect_fields`].
#[derive(Clone, Debug, PartialEq)]
pub struct InspectedField {
    pub field_key: FieldKey,
    pub name: String,
    pub arguments: Option<Variables>,
}

/// A write queued by a user function, applied when the function succeeds.
pub(crate) enum QueuedWrite {
    Fragment {
        document: String,
        data: Value,
    },
    Query {
        document: String,
        variables: Option<Variables>,
        data: Value,
    },
    Invalidate {
        entity: EntityKey,
        field: Option<(String, Option<Variables>)>,
    },
}

pub struct CacheHandle<'a> {
    store: &'a Store,
    config: &'a CacheConfig,
    documents: &'a mut DocumentCache,
    variables: &'a Variables,
    queued: Vec<QueuedWrite>,
    writable: bool,
}

impl<'a> CacheHandle<'a> {
    pub(crate) fn new(
        store: &'a Store,
        config: &'a CacheConfig,
        documents: &'a mut DocumentCache,
        variables: &'a Variables,
        writable: bool,
    ) -> Self {
        CacheHandle {
            store,
            config,
            documents,
            variables,
            queued: Vec::new(),
            writable,
        }
    }

    pub(crate) fn into_queued(self) -> Vec<QueuedWrite> {
        self.queued
    }

    /// The key an object normalizes under, or `None` for embedded objects.
    pub fn key_of_entity(&self, data: &Value) -> Option<String> {
        let object = data.as_object()?;
        let typename = object.get("__typename")?.as_str()?;
        key::entity_key(self.config, typename, object).map(|key| key.to_string())
    }

    /// Reads one field of an entity. Links resolve to entity key strings.
    pub fn resolve(&self, entity: &Value, field_name: &str, arguments: Option<&Variables>) -> Option<Value> {
        let entity = self.entity_from(entity)?;
        let typename = self.store.entity_typename(&entity)?;
        let empty = Variables::new();
        let field = key::field_key(
            &typename,
            field_name,
            arguments.unwrap_or(&empty),
            self.config.schema(),
        );
        if let Some(value) = self.store.read_record(&entity, &field) {
            return Some(value.clone());
        }
        self.store.read_link(&entity, &field).map(render_link)
    }

    /// Enumerates the known field slots of an entity.
    pub fn inspect_fields(&self, entity: &Value) -> Vec<InspectedField> {
        let Some(entity) = self.entity_from(entity) else {
            return Vec::new();
        };
        self.store
            .entity_field_keys(&entity)
            .into_iter()
            .sorted_by(|a, b| a.as_str().cmp(b.as_str()))
            .map(|field_key| InspectedField {
                name: field_key.name().to_owned(),
                arguments: field_key.arguments(),
                field_key,
            })
            .collect()
    }

    /// Runs a query document against the store, without registering
    /// dependencies.
    pub fn read_query(&mut self, document: &str, variables: Option<Variables>) -> Option<Value> {
        let document = match self.documents.analyzed(document) {
            Ok(document) => document,
            Err(err) => {
                self.config.log(Severity::Error, &err.to_string());
                return None;
            }
        };
        let variables = variables.unwrap_or_else(|| self.variables.clone());
        let root = EntityKey::root(self.config.root_typename(document.kind()));
        let output = read::read_operation(
            self.store,
            self.config,
            self.documents,
            None,
            &document,
            &variables,
            root,
        );
        output.data.map(|data| data.to_json())
    }

    /// Reads a fragment rooted at the entity `data` keys to.
    pub fn read_fragment(&mut self, document: &str, entity: &Value) -> Option<Value> {
        let document = match self.documents.analyzed(document) {
            Ok(document) => document,
            Err(err) => {
                self.config.log(Severity::Error, &err.to_string());
                return None;
            }
        };
        let root = self.entity_from(entity)?;
        let output = read::read_operation(
            self.store,
            self.config,
            self.documents,
            None,
            &document,
            self.variables,
            root,
        );
        output.data.map(|data| data.to_json())
    }

    /// Queues a fragment write into the open transaction.
    pub fn write_fragment(&mut self, document: &str, data: Value) {
        if !self.queueable("write_fragment") {
            return;
        }
        self.queued.push(QueuedWrite::Fragment {
            document: document.to_owned(),
            data,
        });
    }

    /// Reads a query, lets `update` transform it, and queues the write-back.
    pub fn update_query(
        &mut self,
        document: &str,
        variables: Option<Variables>,
        update: impl FnOnce(Option<Value>) -> Option<Value>,
    ) {
        let current = self.read_query(document, variables.clone());
        let Some(data) = update(current) else { return };
        if !self.queueable("update_query") {
            return;
        }
        self.queued.push(QueuedWrite::Query {
            document: document.to_owned(),
            variables,
            data,
        });
    }

    /// Queues invalidation of an entity, or of a single field of it.
    pub fn invalidate(&mut self, entity: &Value, field: Option<&str>, arguments: Option<&Variables>) {
        if !self.queueable("invalidate") {
            return;
        }
        let Some(entity) = self.entity_from(entity) else {
            self.config
                .log(Severity::Warn, "invalidate called with an unkeyable entity");
            return;
        };
        self.queued.push(QueuedWrite::Invalidate {
            entity,
            field: field.map(|name| (name.to_owned(), arguments.cloned())),
        });
    }

    fn queueable(&self, operation: &str) -> bool {
        if !self.writable {
            self.config.log(
                Severity::Error,
                &format!("{operation} is not available during read traversal"),
            );
        }
        self.writable
    }

    /// Accepts an entity key string, a root type name, or a keyable object.
    fn entity_from(&self, value: &Value) -> Option<EntityKey> {
        match value {
            Value::String(key) => Some(EntityKey::new(key.clone())),
            Value::Object(object) => {
                let typename = object.get("__typename")?.as_str()?;
                key::entity_key(self.config, typename, object)
            }
            _ => None,
        }
    }
}

fn render_link(link: &Link) -> Value {
    match link {
        Link::Null => Value::Null,
        Link::Entity(key) => Value::String(key.to_string()),
        Link::List(items) => Value::Array(items.iter().map(render_link).collect()),
    }
}
