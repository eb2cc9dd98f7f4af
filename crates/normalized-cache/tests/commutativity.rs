//! Arrival-order independence: commutative layers, subscriptions and
//! deferred results.

mod common;

use common::{emissions, emitted_json, forwards, AUTHOR_QUERY};
use normalized_cache::{
    CacheConfig, CacheEngine, ExecutionResult, Operation, RequestPolicy,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const INDEX_QUERY: &str = "{ index }";

fn probe(cache: &mut CacheEngine, key: u64, query: &str) -> serde_json::Value {
    let operation = Operation::query(key, query).with_policy(RequestPolicy::CacheOnly);
    emitted_json(&cache.operation(operation))
}

#[test]
fn out_of_order_results_resolve_in_issue_order() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, INDEX_QUERY);
    let op2 = Operation::query(2, INDEX_QUERY);
    let op3 = Operation::query(3, INDEX_QUERY);
    cache.operation(op1.clone());
    cache.operation(op2.clone());
    cache.operation(op3.clone());

    // Results arrive 2, 1, 3.
    let commands = cache.result(ExecutionResult::data(op2, json!({ "index": 2 })));
    assert_eq!(emissions(&commands)[0].data.as_ref().unwrap().to_json(), json!({ "index": 2 }));

    // Op 1's late result lands below op 2's; no regression to 1.
    let commands = cache.result(ExecutionResult::data(op1, json!({ "index": 1 })));
    for result in emissions(&commands) {
        assert_ne!(result.data.as_ref().unwrap().to_json(), json!({ "index": 1 }));
    }

    let commands = cache.result(ExecutionResult::data(op3, json!({ "index": 3 })));
    assert_eq!(emissions(&commands)[0].data.as_ref().unwrap().to_json(), json!({ "index": 3 }));

    assert_eq!(probe(&mut cache, 9, INDEX_QUERY), json!({ "index": 3 }));
}

#[test]
fn in_order_results_stay_in_base() {
    let mut cache = CacheEngine::default();
    let op1 = Operation::query(1, INDEX_QUERY);
    let op2 = Operation::query(2, INDEX_QUERY);
    cache.operation(op1.clone());
    cache.operation(op2.clone());

    cache.result(ExecutionResult::data(op1, json!({ "index": 1 })));
    assert_eq!(probe(&mut cache, 8, INDEX_QUERY), json!({ "index": 1 }));
    cache.result(ExecutionResult::data(op2, json!({ "index": 2 })));
    assert_eq!(probe(&mut cache, 9, INDEX_QUERY), json!({ "index": 2 }));
}

#[test]
fn subscriptions_win_over_optimistic_layers_and_survive_commit() {
    let config = CacheConfig::default().with_optimistic("changeName", |_args, _cache, _info| {
        json!({ "__typename": "Author", "id": "123", "name": "OFFLINE" })
    });
    let mut cache = CacheEngine::new(config);

    let query = Operation::query(1, AUTHOR_QUERY);
    cache.operation(query.clone());
    cache.result(ExecutionResult::data(
        query,
        json!({ "author": { "__typename": "Author", "id": "123", "name": "A" } }),
    ));

    let mutation = Operation::mutation(2, "mutation { changeName { id name } }");
    cache.operation(mutation.clone());
    assert_eq!(
        probe(&mut cache, 10, AUTHOR_QUERY),
        json!({ "author": { "id": "123", "name": "OFFLINE" } })
    );

    let subscription = Operation::subscription(3, "subscription { authorChanged { id name } }");
    let commands = cache.operation(subscription.clone());
    assert_eq!(forwards(&commands).len(), 1);

    // The subscription's layer sits above the optimistic one.
    cache.result(ExecutionResult::data(
        subscription.clone(),
        json!({ "authorChanged": { "__typename": "Author", "id": "123", "name": "LIVE" } }),
    ));
    assert_eq!(
        probe(&mut cache, 11, AUTHOR_QUERY),
        json!({ "author": { "id": "123", "name": "LIVE" } })
    );

    // The mutation commits below it; the subscription still wins.
    cache.result(ExecutionResult::data(
        mutation,
        json!({ "changeName": { "__typename": "Author", "id": "123", "name": "ONLINE" } }),
    ));
    assert_eq!(
        probe(&mut cache, 12, AUTHOR_QUERY),
        json!({ "author": { "id": "123", "name": "LIVE" } })
    );

    // Teardown collapses the subscription's data into base.
    cache.teardown(3);
    assert_eq!(
        probe(&mut cache, 13, AUTHOR_QUERY),
        json!({ "author": { "id": "123", "name": "LIVE" } })
    );
}

#[test]
fn deferred_patches_merge_into_the_same_result() {
    let mut cache = CacheEngine::default();
    let operation = Operation::query(1, "{ author { id name bio @defer } }");
    cache.operation(operation.clone());

    let first = ExecutionResult::data(
        operation.clone(),
        json!({ "author": { "__typename": "Author", "id": "123", "name": "A" } }),
    )
    .with_has_next(true);
    let commands = cache.result(first);
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].has_next);
    // The deferred field is tolerated while its patch is outstanding.
    assert_eq!(
        emitted[0].data.as_ref().unwrap().to_json(),
        json!({ "author": { "id": "123", "name": "A", "bio": null } })
    );

    let second = ExecutionResult::data(
        operation.clone(),
        json!({ "author": { "__typename": "Author", "id": "123", "name": "A", "bio": "hello" } }),
    );
    let commands = cache.result(second);
    let emitted = emissions(&commands);
    assert_eq!(emitted.len(), 1);
    assert!(!emitted[0].has_next);
    assert_eq!(
        emitted[0].data.as_ref().unwrap().to_json(),
        json!({ "author": { "id": "123", "name": "A", "bio": "hello" } })
    );
}

#[test]
fn late_results_do_not_overwrite_newer_query_results() {
    let mut cache = CacheEngine::default();

    let op1 = Operation::query(1, AUTHOR_QUERY);
    let op2 = Operation::query(2, AUTHOR_QUERY);
    cache.operation(op1.clone());
    cache.operation(op2.clone());

    // Op 2 arrives first and reserves its position above op 1.
    cache.result(ExecutionResult::data(
        op2,
        json!({ "author": { "__typename": "Author", "id": "123", "name": "newer" } }),
    ));
    cache.result(ExecutionResult::data(
        op1,
        json!({ "author": { "__typename": "Author", "id": "123", "name": "older" } }),
    ));

    assert_eq!(
        probe(&mut cache, 9, AUTHOR_QUERY),
        json!({ "author": { "id": "123", "name": "newer" } })
    );
}
