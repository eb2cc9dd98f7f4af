//! Entity and field key derivation.
//!
//! An entity key is `Typename:id` (or whatever a user keying function
//! returns); field keys append a canonical rendering of the field's
//! arguments so that `todo(id: 1)` and `todo(id: 2)` occupy distinct slots.

use std::{fmt, sync::Arc};

use itertools::Itertools;
use schema_registry::SchemaRegistry;
use serde_json::Value;

use crate::config::CacheConfig;

/// Key of a normalized entity, e.g. `Todo:1`.
///
/// Root operation objects are keyed by their type name (`Query`, ...), and
/// embedded objects by their parent key joined with the owning field key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(Arc<str>);

impl EntityKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        EntityKey(key.into())
    }

    /// Key of the root object for an operation type.
    pub fn root(typename: &str) -> Self {
        EntityKey(typename.into())
    }

    /// Key of an embedded (keyless) object, derived from its parent.
    pub(crate) fn embedded(parent: &EntityKey, field: &FieldKey) -> Self {
        EntityKey(format!("{parent}.{field}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type name encoded in the key, when there is one.
    ///
    /// Embedded keys carry no type name; their `__typename` record does.
    pub fn typename(&self) -> Option<&str> {
        if self.0.contains('.') {
            return None;
        }
        match self.0.find(':') {
            Some(index) => Some(&self.0[..index]),
            None => Some(&self.0),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a field slot on an entity: the field name, plus canonicalized
/// arguments when there are any, e.g. `todo({"id":1})`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        FieldKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare field name without the argument suffix.
    pub fn name(&self) -> &str {
        match self.0.find('(') {
            Some(index) => &self.0[..index],
            None => &self.0,
        }
    }

    /// The canonicalized arguments, parsed back into a JSON object.
    pub fn arguments(&self) -> Option<serde_json::Map<String, Value>> {
        let start = self.0.find('(')?;
        let raw = &self.0[start + 1..self.0.len().checked_sub(1)?];
        serde_json::from_str(raw).ok()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(entity, field)` pair an operation read or a write touched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub entity: EntityKey,
    pub field: FieldKey,
}

impl Dependency {
    pub fn new(entity: EntityKey, field: FieldKey) -> Self {
        Dependency { entity, field }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.field)
    }
}

/// Derives the key of `object`, given its runtime type name.
///
/// Order of precedence: the user keying function for the type, then the
/// `id` field, then `_id`. `None` means the object is embedded.
pub(crate) fn entity_key(
    config: &CacheConfig,
    typename: &str,
    object: &serde_json::Map<String, Value>,
) -> Option<EntityKey> {
    let id = match config.keys.get(typename) {
        Some(key_fn) => key_fn(object)?,
        None => {
            let id = object.get("id").or_else(|| object.get("_id"))?;
            scalar_to_id(id)?
        }
    };
    Some(EntityKey::new(format!("{typename}:{id}")))
}

fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Computes the field key for `name` with already-bound arguments.
///
/// Arguments bound to a value equal to the schema-declared default are
/// elided so that `todos(first: 10)` and `todos` share a slot when `10` is
/// the declared default.
pub(crate) fn field_key(
    typename: &str,
    name: &str,
    arguments: &serde_json::Map<String, Value>,
    schema: Option<&SchemaRegistry>,
) -> FieldKey {
    let schema_field = schema.and_then(|schema| schema.field(typename, name));

    let mut rendered = String::new();
    for key in arguments.keys().sorted() {
        let value = &arguments[key];
        if let Some(default) = schema_field.and_then(|field| field.argument_default(key)) {
            if default == value {
                continue;
            }
        }
        if !rendered.is_empty() {
            rendered.push(',');
        }
        rendered.push_str(&format!("{}:", serde_json::Value::String(key.clone())));
        canonical_json(value, &mut rendered);
    }

    if rendered.is_empty() {
        FieldKey::new(name)
    } else {
        FieldKey::new(format!("{name}({{{rendered}}})"))
    }
}

/// Renders `value` with object keys sorted, so equal argument objects always
/// produce the same key text.
fn canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(object) => {
            out.push('{');
            for (index, key) in object.keys().sorted().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                canonical_json(&object[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
