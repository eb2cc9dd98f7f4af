#![allow(dead_code)]

use normalized_cache::{Command, Operation, OperationResult, Variables};
use serde_json::Value;

pub const AUTHOR_QUERY: &str = "{ author { id name } }";

pub fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => panic!("variables must be an object"),
    }
}

pub fn emissions(commands: &[Command]) -> Vec<&OperationResult> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Emit(result) => Some(result),
            _ => None,
        })
        .collect()
}

pub fn forwards(commands: &[Command]) -> Vec<&Operation> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Forward(operation) => Some(operation),
            _ => None,
        })
        .collect()
}

pub fn reexecutes(commands: &[Command]) -> Vec<&Operation> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Reexecute(operation) => Some(operation),
            _ => None,
        })
        .collect()
}

/// The data of the only emission in `commands`, as plain JSON.
pub fn emitted_json(commands: &[Command]) -> Value {
    let emitted = emissions(commands);
    assert_eq!(emitted.len(), 1, "expected exactly one emission");
    emitted[0]
        .data
        .as_ref()
        .map(|data| data.to_json())
        .unwrap_or(Value::Null)
}
