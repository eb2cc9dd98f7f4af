//! End-to-end flows: operations in, commands out.

mod common;

use common::{emissions, emitted_json, forwards, reexecutes, AUTHOR_QUERY};
use indoc::indoc;
use normalized_cache::{
    CacheConfig, CacheEngine, CacheOutcome, ExecutionResult, GraphqlError, Operation, PathSegment,
    RequestPolicy, SchemaRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn author_result(operation: &Operation, name: &str) -> ExecutionResult {
    ExecutionResult::data(
        operation.clone(),
        json!({ "author": { "__typename": "Author", "id": "123", "name": name } }),
    )
}

#[test]
fn basic_hit_is_reference_identical() {
    let mut cache = CacheEngine::default();
    let operation = Operation::query(1, AUTHOR_QUERY);

    let commands = cache.operation(operation.clone());
    assert_eq!(forwards(&commands).len(), 1);
    assert!(emissions(&commands).is_empty());

    let commands = cache.result(author_result(&operation, "A"));
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].cache_outcome, None);
    let first = emitted[0].data.clone().unwrap();
    assert_eq!(first.to_json(), json!({ "author": { "id": "123", "name": "A" } }));

    let commands = cache.operation(operation);
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Hit));
    assert!(!emitted[0].stale);
    assert!(forwards(&commands).is_empty());

    let second = emitted[0].data.clone().unwrap();
    assert!(second.ptr_eq(&first));
}

#[test]
fn cache_only_misses_without_forwarding() {
    let mut cache = CacheEngine::default();
    let operation = Operation::query(1, AUTHOR_QUERY).with_policy(RequestPolicy::CacheOnly);

    let commands = cache.operation(operation);
    assert!(forwards(&commands).is_empty());
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].data.is_none());
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Miss));
}

#[test]
fn related_write_reexecutes_dependents_once() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, AUTHOR_QUERY);
    cache.operation(op1.clone());
    cache.result(author_result(&op1, "X"));

    let op2 = Operation::query(2, "{ authors { id name } }");
    cache.operation(op2.clone());
    let commands = cache.result(ExecutionResult::data(
        op2,
        json!({ "authors": [{ "__typename": "Author", "id": "123", "name": "Y" }] }),
    ));

    let replays = reexecutes(&commands);
    assert_eq!(replays.len(), 1);
    assert_eq!(replays[0].key, 1);

    let commands = cache.operation(replays[0].clone());
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Hit));
    assert_eq!(
        emitted[0].data.as_ref().unwrap().to_json(),
        json!({ "author": { "id": "123", "name": "Y" } })
    );
}

#[test]
fn unrelated_subtrees_keep_their_identity_across_reexecution() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, "{ author { id name } pet { id name } }");
    cache.operation(op1.clone());
    let commands = cache.result(ExecutionResult::data(
        op1.clone(),
        json!({
            "author": { "__typename": "Author", "id": "123", "name": "X" },
            "pet": { "__typename": "Pet", "id": "7", "name": "Rex" },
        }),
    ));
    let first = emissions(&commands)[0].data.clone().unwrap();

    let op2 = Operation::query(2, "{ authors { id name } }");
    cache.operation(op2.clone());
    let commands = cache.result(ExecutionResult::data(
        op2,
        json!({ "authors": [{ "__typename": "Author", "id": "123", "name": "Y" }] }),
    ));
    let replays = reexecutes(&commands);
    assert_eq!(replays.len(), 1);

    let commands = cache.operation(replays[0].clone());
    let second = emissions(&commands)[0].data.clone().unwrap();

    assert!(!second.ptr_eq(&first));
    assert!(!second.field("author").unwrap().ptr_eq(first.field("author").unwrap()));
    assert!(second.field("pet").unwrap().ptr_eq(first.field("pet").unwrap()));
    assert_eq!(second.field("author").unwrap().to_json(), json!({ "id": "123", "name": "Y" }));
}

#[test]
fn overlapping_queries_share_unchanged_subtrees() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, AUTHOR_QUERY);
    cache.operation(op1.clone());
    let commands = cache.result(author_result(&op1, "A"));
    let first = emissions(&commands)[0].data.clone().unwrap();

    // A structurally identical document parsed from different text.
    let op2 = Operation::query(2, "query Other { author { id name } }");
    let commands = cache.operation(op2);
    let emitted = emissions(&commands);
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Hit));
    let second = emitted[0].data.clone().unwrap();
    assert!(second.field("author").unwrap().ptr_eq(first.field("author").unwrap()));
}

#[test]
fn idempotent_rewrites_do_not_reexecute() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, AUTHOR_QUERY);
    cache.operation(op1.clone());
    cache.result(author_result(&op1, "A"));

    let op2 = Operation::query(2, AUTHOR_QUERY);
    cache.operation(op2.clone());
    let commands = cache.result(author_result(&op2, "A"));
    assert!(reexecutes(&commands).is_empty());
}

fn todo_schema() -> SchemaRegistry {
    SchemaRegistry::from_introspection(&json!({
        "__schema": {
            "queryType": { "name": "Query" },
            "types": [
                {
                    "kind": "OBJECT",
                    "name": "Query",
                    "fields": [{
                        "name": "todos",
                        "args": [],
                        "type": { "kind": "LIST", "ofType": { "kind": "OBJECT", "name": "Todo" } }
                    }]
                },
                {
                    "kind": "OBJECT",
                    "name": "Todo",
                    "fields": [
                        { "name": "id", "args": [], "type": { "kind": "NON_NULL", "ofType": { "kind": "SCALAR", "name": "ID" } } },
                        { "name": "text", "args": [], "type": { "kind": "NON_NULL", "ofType": { "kind": "SCALAR", "name": "String" } } },
                        { "name": "completed", "args": [], "type": { "kind": "SCALAR", "name": "Boolean" } },
                        { "name": "author", "args": [], "type": { "kind": "OBJECT", "name": "Author" } }
                    ]
                },
                {
                    "kind": "OBJECT",
                    "name": "Author",
                    "fields": [
                        { "name": "id", "args": [], "type": { "kind": "NON_NULL", "ofType": { "kind": "SCALAR", "name": "ID" } } },
                        { "name": "name", "args": [], "type": { "kind": "SCALAR", "name": "String" } }
                    ]
                }
            ]
        }
    }))
    .unwrap()
}

#[test]
fn schema_nullability_produces_partial_results() {
    let mut cache = CacheEngine::new(CacheConfig::default().with_schema(todo_schema()));

    let op1 = Operation::query(1, "{ todos { id text } }");
    cache.operation(op1.clone());
    cache.result(ExecutionResult::data(
        op1,
        json!({ "todos": [{ "__typename": "Todo", "id": "1", "text": "learn" }] }),
    ));

    let op2 = Operation::query(
        2,
        indoc! {"
            {
                todos {
                    id
                    text
                    completed
                    author { id name }
                }
            }
        "},
    );
    let commands = cache.operation(op2);
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Partial));
    assert!(emitted[0].stale);
    assert_eq!(
        emitted[0].data.as_ref().unwrap().to_json(),
        json!({ "todos": [{ "id": "1", "text": "learn", "completed": null, "author": null }] })
    );
    assert_eq!(forwards(&commands).len(), 1);
}

#[test]
fn untouched_dependencies_do_not_retrigger_required_misses() {
    let mut cache = CacheEngine::new(CacheConfig::default().with_schema(todo_schema()));

    let op1 = Operation::query(1, "{ todos { id text author @_required { id } } }");
    cache.operation(op1.clone());
    // The server never provides `author`; the re-read stays a miss.
    let commands = cache.result(ExecutionResult::data(
        op1,
        json!({ "todos": [{ "__typename": "Todo", "id": "1", "text": "learn" }] }),
    ));
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    // The required miss bubbles to the nullable list element.
    assert_eq!(emitted[0].data.as_ref().unwrap().to_json(), json!({ "todos": [null] }));

    // A write that touches nothing op 1 depends on issues no reexecution.
    let op2 = Operation::query(2, AUTHOR_QUERY);
    cache.operation(op2.clone());
    let commands = cache.result(ExecutionResult::data(
        op2,
        json!({ "author": { "__typename": "Author", "id": "9", "name": "Z" } }),
    ));
    assert!(reexecutes(&commands).is_empty());

    // So does an identical rewrite of the data it does depend on.
    let op3 = Operation::query(3, "{ todos { id text } }");
    cache.operation(op3.clone());
    let commands = cache.result(ExecutionResult::data(
        op3,
        json!({ "todos": [{ "__typename": "Todo", "id": "1", "text": "learn" }] }),
    ));
    assert!(reexecutes(&commands).is_empty());
}

#[test]
fn error_paths_become_known_nulls() {
    let mut cache = CacheEngine::default();
    let operation = Operation::query(1, AUTHOR_QUERY);
    cache.operation(operation.clone());

    let result = ExecutionResult {
        operation: operation.clone(),
        data: Some(json!({ "author": { "__typename": "Author", "id": "123" } })),
        error: Some(GraphqlError::new("cannot resolve name").with_path([
            PathSegment::Field("author".to_owned()),
            PathSegment::Field("name".to_owned()),
        ])),
        has_next: false,
    };
    let commands = cache.result(result);
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].error.is_some());
    assert_eq!(
        emitted[0].data.as_ref().unwrap().to_json(),
        json!({ "author": { "id": "123", "name": null } })
    );

    // The slot is a known null now, not a cache miss.
    let commands = cache.operation(operation);
    let emitted = emissions(&commands);
    assert_eq!(emitted[0].cache_outcome, Some(CacheOutcome::Hit));
    assert!(forwards(&commands).is_empty());
}

#[test]
fn resolvers_take_precedence_over_records() {
    let config = CacheConfig::default().with_resolver("Author", "displayName", |parent, _args, _cache, _info| {
        let id = parent.get("id").and_then(serde_json::Value::as_str).unwrap_or("?");
        Some(serde_json::Value::String(format!("Author {id}")))
    });
    let mut cache = CacheEngine::new(config);

    let operation = Operation::query(1, "{ author { id displayName } }");
    cache.operation(operation.clone());
    let commands = cache.result(ExecutionResult::data(
        operation,
        json!({ "author": { "__typename": "Author", "id": "123", "displayName": "from server" } }),
    ));
    assert_eq!(
        emitted_json(&commands),
        json!({ "author": { "id": "123", "displayName": "Author 123" } })
    );
}

#[test]
fn teardown_forgets_the_operation() {
    let mut cache = CacheEngine::default();
    let operation = Operation::query(1, AUTHOR_QUERY);
    cache.operation(operation.clone());
    cache.teardown(1);

    // The late result still lands in the store, but nothing is emitted.
    let commands = cache.result(author_result(&operation, "A"));
    assert!(emissions(&commands).is_empty());

    let probe = Operation::query(2, AUTHOR_QUERY).with_policy(RequestPolicy::CacheOnly);
    let commands = cache.operation(probe);
    assert_eq!(emitted_json(&commands), json!({ "author": { "id": "123", "name": "A" } }));
}

#[test]
fn gc_drops_unreachable_entities_only() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, AUTHOR_QUERY);
    cache.operation(op1.clone());
    cache.result(author_result(&op1, "A"));

    // Replace the link so the old author is unreachable, then drop op 1.
    let op2 = Operation::query(2, AUTHOR_QUERY);
    cache.operation(op2.clone());
    cache.result(ExecutionResult::data(
        op2,
        json!({ "author": { "__typename": "Author", "id": "456", "name": "B" } }),
    ));
    cache.teardown(1);

    // Author:123 is unreachable and no live operation depends on it.
    assert_eq!(cache.gc(), 1);

    let probe = Operation::query(3, AUTHOR_QUERY).with_policy(RequestPolicy::CacheOnly);
    let commands = cache.operation(probe);
    assert_eq!(emitted_json(&commands), json!({ "author": { "id": "456", "name": "B" } }));
}
