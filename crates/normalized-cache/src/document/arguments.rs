//! Binding of argument templates against operation variables.

use std::hash::{DefaultHasher, Hash, Hasher};

use serde_json::Value;

use super::{ArgTemplate, Condition, FieldSelection};
use crate::operation::Variables;

/// Binds a field's arguments, dropping arguments whose variable is absent.
pub(crate) fn bind_arguments(field: &FieldSelection, variables: &Variables, defaults: &Variables) -> Variables {
    let mut out = Variables::new();
    for (name, template) in &field.arguments {
        if let Some(value) = bind_value(template, variables, defaults) {
            out.insert(name.clone(), value);
        }
    }
    out
}

/// Resolves one template. `None` means an absent variable with no default.
pub(crate) fn bind_value(template: &ArgTemplate, variables: &Variables, defaults: &Variables) -> Option<Value> {
    match template {
        ArgTemplate::Variable(name) => variables
            .get(name)
            .or_else(|| defaults.get(name))
            .cloned(),
        ArgTemplate::Null => Some(Value::Null),
        ArgTemplate::Int(value) => Some(Value::from(*value)),
        ArgTemplate::Float(value) => Some(serde_json::Number::from_f64(*value).map_or(Value::Null, Value::Number)),
        ArgTemplate::String(value) => Some(Value::String(value.clone())),
        ArgTemplate::Boolean(value) => Some(Value::Bool(*value)),
        ArgTemplate::Enum(value) => Some(Value::String(value.clone())),
        ArgTemplate::List(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| bind_value(item, variables, defaults).unwrap_or(Value::Null))
                .collect(),
        )),
        ArgTemplate::Object(fields) => Some(Value::Object(
            fields
                .iter()
                .filter_map(|(name, value)| Some((name.clone(), bind_value(value, variables, defaults)?)))
                .collect(),
        )),
    }
}

/// Evaluates the field's `@include`/`@skip` conditions.
pub(crate) fn is_included(field: &FieldSelection, variables: &Variables, defaults: &Variables) -> bool {
    field.conditions.iter().all(|condition| match condition {
        Condition::Include(template) => truthy(bind_value(template, variables, defaults)),
        Condition::Skip(template) => !truthy(bind_value(template, variables, defaults)),
    })
}

fn truthy(value: Option<Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

/// Fingerprint of a selection list under concrete variable values, used to
/// share read-memo entries between documents with equal shapes.
pub(crate) fn set_fingerprint(fields: &[FieldSelection], variables: &Variables, defaults: &Variables) -> u64 {
    let mut hasher = DefaultHasher::new();
    for field in fields {
        field.shape_hash.hash(&mut hasher);
        for name in &field.variables_used {
            name.hash(&mut hasher);
            match variables.get(name).or_else(|| defaults.get(name)) {
                Some(value) => value.to_string().hash(&mut hasher),
                None => 0u8.hash(&mut hasher),
            }
        }
    }
    hasher.finish()
}
