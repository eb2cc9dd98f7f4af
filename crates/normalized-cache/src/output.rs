//! The denormalized result tree emitted to downstream consumers.
//!
//! Subtrees are shared behind `Arc` so that re-reads of unchanged data
//! return the previous allocation. Downstream can rely on pointer identity
//! to skip re-rendering unchanged parts of a result.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

/// A value produced by the read traversal.
#[derive(Clone, Debug)]
pub enum OutputValue {
    Null,
    /// A leaf scalar (or array of scalars), stored as plain JSON.
    Scalar(Value),
    List(Arc<Vec<OutputValue>>),
    Object(Arc<OutputObject>),
}

/// An object in the output tree, keyed by response key in selection order.
#[derive(Debug, Default, PartialEq)]
pub struct OutputObject {
    pub fields: IndexMap<String, OutputValue>,
}

impl OutputValue {
    pub fn scalar(value: Value) -> Self {
        match value {
            Value::Null => OutputValue::Null,
            other => OutputValue::Scalar(other),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OutputValue::Null)
    }

    /// Field access for objects, by response key.
    pub fn field(&self, key: &str) -> Option<&OutputValue> {
        match self {
            OutputValue::Object(object) => object.fields.get(key),
            _ => None,
        }
    }

    /// List element access.
    pub fn element(&self, index: usize) -> Option<&OutputValue> {
        match self {
            OutputValue::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Whether two values are the same allocation.
    ///
    /// Scalars and nulls are unshared and compare by value; lists and
    /// objects compare by pointer.
    pub fn ptr_eq(&self, other: &OutputValue) -> bool {
        match (self, other) {
            (OutputValue::Null, OutputValue::Null) => true,
            (OutputValue::Scalar(a), OutputValue::Scalar(b)) => a == b,
            (OutputValue::List(a), OutputValue::List(b)) => Arc::ptr_eq(a, b),
            (OutputValue::Object(a), OutputValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Deep conversion into plain JSON.
    pub fn to_json(&self) -> Value {
        match self {
            OutputValue::Null => Value::Null,
            OutputValue::Scalar(value) => value.clone(),
            OutputValue::List(items) => Value::Array(items.iter().map(OutputValue::to_json).collect()),
            OutputValue::Object(object) => Value::Object(
                object
                    .fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for OutputValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OutputValue::Null, OutputValue::Null) => true,
            (OutputValue::Scalar(a), OutputValue::Scalar(b)) => a == b,
            (OutputValue::List(a), OutputValue::List(b)) => Arc::ptr_eq(a, b) || a == b,
            (OutputValue::Object(a), OutputValue::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<OutputObject> for OutputValue {
    fn from(object: OutputObject) -> Self {
        OutputValue::Object(Arc::new(object))
    }
}

impl From<Vec<OutputValue>> for OutputValue {
    fn from(items: Vec<OutputValue>) -> Self {
        OutputValue::List(Arc::new(items))
    }
}

impl Serialize for OutputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OutputValue::Null => serializer.serialize_none(),
            OutputValue::Scalar(value) => value.serialize(serializer),
            OutputValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            OutputValue::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.fields.len()))?;
                for (key, value) in &object.fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
