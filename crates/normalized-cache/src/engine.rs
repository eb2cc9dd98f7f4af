//! The externally visible state machine.
//!
//! Three events come in — `operation`, `result`, `teardown` — and the engine
//! answers each with the commands the host pipeline should carry out:
//! results to emit downstream, operations to forward to the transport, and
//! reexecutions of operations whose dependencies changed.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexSet;
use serde_json::Value;

use crate::{
    deps::DependencyIndex,
    document::{DocumentCache, DocumentInfo},
    error::Severity,
    key::{Dependency, EntityKey},
    operation::{
        CacheOutcome, Command, ExecutionResult, GraphqlError, Operation, OperationKind, OperationResult,
        RequestPolicy,
    },
    output::OutputValue,
    read::{self, ReadMemo, ReadOutput},
    store::{LayerKind, LayerTarget, Store, WriteOutcome},
    write::{self, WriteKind},
    CacheConfig,
};

/// One cache instance: the normalized store, its dependency bookkeeping and
/// the operation state machine on top.
pub struct CacheEngine {
    config: CacheConfig,
    store: Store,
    documents: DocumentCache,
    dependencies: DependencyIndex,
    operations: HashMap<u64, OperationEntry>,
    memo: ReadMemo,
}

struct OperationEntry {
    operation: Operation,
    last_data: Option<OutputValue>,
    last_dependencies: IndexSet<Dependency>,
    last_typenames: IndexSet<String>,
    generation: u64,
    /// Loop protection: a replay came back partial; hold further
    /// reexecutions until one of its dependencies changes value.
    reexecutions_blocked: bool,
    /// A reexecution is in flight and has not been replayed yet.
    scheduled: bool,
    /// A type-level invalidation flagged this operation; its replay is
    /// emitted stale and refreshed from the network.
    marked_stale: bool,
    /// The first result chunk landed in base; later chunks follow it.
    wrote_base: bool,
}

impl OperationEntry {
    fn new(operation: Operation) -> Self {
        OperationEntry {
            operation,
            last_data: None,
            last_dependencies: IndexSet::new(),
            last_typenames: IndexSet::new(),
            generation: 0,
            reexecutions_blocked: false,
            scheduled: false,
            marked_stale: false,
            wrote_base: false,
        }
    }
}

impl Default for CacheEngine {
    fn default() -> Self {
        CacheEngine::new(CacheConfig::default())
    }
}

impl CacheEngine {
    pub fn new(config: CacheConfig) -> Self {
        CacheEngine {
            config,
            store: Store::new(),
            documents: DocumentCache::new(),
            dependencies: DependencyIndex::default(),
            operations: HashMap::new(),
            memo: ReadMemo::default(),
        }
    }

    /// Handles an incoming operation.
    pub fn operation(&mut self, operation: Operation) -> Vec<Command> {
        match operation.kind {
            OperationKind::Query => self.handle_query(operation),
            OperationKind::Mutation => self.handle_mutation(operation),
            OperationKind::Subscription => self.handle_subscription(operation),
        }
    }

    /// Handles a result arriving from the transport.
    pub fn result(&mut self, result: ExecutionResult) -> Vec<Command> {
        match result.operation.kind {
            OperationKind::Query => self.query_result(result),
            OperationKind::Mutation => self.mutation_result(result),
            OperationKind::Subscription => self.subscription_result(result),
        }
    }

    /// Drops all tracking for an operation. A subscription's layer (or a
    /// deferred query's) is collapsed into base; an optimistic mutation
    /// layer stays until the mutation's own result retires it.
    pub fn teardown(&mut self, operation_key: u64) -> Vec<Command> {
        if let Some(entry) = self.operations.remove(&operation_key) {
            self.dependencies
                .remove(operation_key, &entry.last_dependencies, &entry.last_typenames);
        }
        match self.store.layer_kind(operation_key) {
            Some(LayerKind::Optimistic) => {}
            Some(_) => self.store.squash_layer(operation_key),
            None => {}
        }
        self.store.release_reservation(operation_key);
        self.store.squash_ready();
        Vec::new()
    }

    /// Best-effort reclamation of entities no live operation depends on.
    pub fn gc(&mut self) -> usize {
        let live = self.dependencies.live_entities();
        self.memo.clear();
        self.store.gc(&live)
    }

    fn analyze(&mut self, operation: &Operation) -> Result<Arc<DocumentInfo>, Vec<Command>> {
        match self.documents.analyzed(&operation.query) {
            Ok(document) => Ok(document),
            Err(err) => {
                self.config.log(Severity::Error, &err.to_string());
                Err(vec![Command::Emit(OperationResult {
                    operation: operation.clone(),
                    data: None,
                    error: Some(GraphqlError::new(err.to_string())),
                    stale: false,
                    has_next: false,
                    cache_outcome: Some(CacheOutcome::Miss),
                })])
            }
        }
    }

    fn handle_query(&mut self, operation: Operation) -> Vec<Command> {
        let document = match self.analyze(&operation) {
            Ok(document) => document,
            Err(commands) => return commands,
        };

        let was_scheduled = self
            .operations
            .get(&operation.key)
            .is_some_and(|entry| entry.scheduled);
        let read = self.read_and_register(&operation, &document);
        let outcome = read.outcome();
        let mut force_refresh = {
            let entry = self.operations.get_mut(&operation.key).unwrap();
            entry.scheduled = false;
            match outcome {
                CacheOutcome::Hit => entry.reexecutions_blocked = false,
                _ if was_scheduled => entry.reexecutions_blocked = true,
                _ => {}
            }
            std::mem::take(&mut entry.marked_stale)
        };

        let mut policy = operation.request_policy;
        if policy != RequestPolicy::CacheOnly && self.store.optimistic_covers(&read.dependencies) {
            // Refreshing under a pending optimistic layer would race the
            // mutation; keep the stale mark for the commit to resolve.
            if force_refresh {
                self.operations.get_mut(&operation.key).unwrap().marked_stale = true;
                force_refresh = false;
            }
            policy = RequestPolicy::CacheFirst;
        }

        let mut commands = Vec::new();
        match policy {
            RequestPolicy::CacheOnly => {
                commands.push(Command::Emit(OperationResult {
                    operation: operation.clone(),
                    data: read.data,
                    error: None,
                    stale: outcome == CacheOutcome::Partial || force_refresh,
                    has_next: false,
                    cache_outcome: Some(outcome),
                }));
            }
            RequestPolicy::CacheFirst => {
                if outcome == CacheOutcome::Hit && !force_refresh {
                    commands.push(Command::Emit(OperationResult {
                        operation: operation.clone(),
                        data: read.data,
                        error: None,
                        stale: false,
                        has_next: false,
                        cache_outcome: Some(outcome),
                    }));
                } else {
                    if read.data.is_some() {
                        commands.push(Command::Emit(OperationResult {
                            operation: operation.clone(),
                            data: read.data,
                            error: None,
                            stale: true,
                            has_next: false,
                            cache_outcome: Some(outcome),
                        }));
                    }
                    self.store.reserve(operation.key);
                    commands.push(Command::Forward(operation));
                }
            }
            RequestPolicy::CacheAndNetwork => {
                if read.data.is_some() {
                    commands.push(Command::Emit(OperationResult {
                        operation: operation.clone(),
                        data: read.data,
                        error: None,
                        stale: true,
                        has_next: false,
                        cache_outcome: Some(outcome),
                    }));
                }
                self.store.reserve(operation.key);
                commands.push(Command::Forward(operation));
            }
            RequestPolicy::NetworkOnly => {
                self.store.reserve(operation.key);
                commands.push(Command::Forward(operation));
            }
        }
        commands
    }

    fn handle_mutation(&mut self, operation: Operation) -> Vec<Command> {
        let document = match self.analyze(&operation) {
            Ok(document) => document,
            Err(commands) => return commands,
        };
        self.operations
            .entry(operation.key)
            .or_insert_with(|| OperationEntry::new(operation.clone()));

        let mut commands = Vec::new();
        if write::has_optimistic(&document, &self.config) {
            self.store.push_layer(operation.key, LayerKind::Optimistic);
            let root = EntityKey::root(self.config.root_typename(OperationKind::Mutation));
            let staged = write::write_optimistic(
                &self.store,
                &self.config,
                &mut self.documents,
                &document,
                &operation.variables,
                LayerTarget::Layer(operation.key),
                root,
            );
            let outcome = self.store.commit(staged);
            commands.push(Command::Forward(operation.clone()));
            self.reexecutes(&outcome, Some(operation.key), true, &mut commands);
        } else {
            commands.push(Command::Forward(operation));
        }
        commands
    }

    fn handle_subscription(&mut self, operation: Operation) -> Vec<Command> {
        if let Err(commands) = self.analyze(&operation) {
            return commands;
        }
        self.operations
            .entry(operation.key)
            .or_insert_with(|| OperationEntry::new(operation.clone()));
        vec![Command::Forward(operation)]
    }

    fn query_result(&mut self, result: ExecutionResult) -> Vec<Command> {
        let key = result.operation.key;
        let document = match self.analyze(&result.operation) {
            Ok(document) => document,
            Err(commands) => return commands,
        };

        let target = if self.store.has_layer(key) {
            LayerTarget::Layer(key)
        } else if self.operations.get(&key).is_some_and(|entry| entry.wrote_base) {
            LayerTarget::Base
        } else if self.store.needs_commutative_layer(key) {
            self.store.push_layer(key, LayerKind::Commutative { order: key });
            LayerTarget::Layer(key)
        } else {
            LayerTarget::Base
        };
        if target == LayerTarget::Base {
            if let Some(entry) = self.operations.get_mut(&key) {
                entry.wrote_base = true;
            }
        }

        let outcome = self.ingest(&result, &document, target, WriteKind::Query);

        self.store.mark_layer_complete(key, !result.has_next);
        if !result.has_next {
            self.store.resolve_reservation(key);
        }
        self.store.squash_ready();

        let mut commands = Vec::new();
        if self.operations.contains_key(&key) {
            let read = self.read_and_register(&result.operation, &document);
            let entry = self.operations.get_mut(&key).unwrap();
            entry.scheduled = false;
            entry.marked_stale = false;
            if read.outcome() == CacheOutcome::Hit {
                entry.reexecutions_blocked = false;
            }
            commands.push(Command::Emit(OperationResult {
                operation: result.operation.clone(),
                data: read.data,
                error: result.error.clone(),
                stale: false,
                has_next: result.has_next,
                cache_outcome: None,
            }));
        }
        self.reexecutes(&outcome, Some(key), false, &mut commands);
        commands
    }

    fn mutation_result(&mut self, result: ExecutionResult) -> Vec<Command> {
        let key = result.operation.key;
        let document = match self.analyze(&result.operation) {
            Ok(document) => document,
            Err(commands) => return commands,
        };

        let mut outcome = WriteOutcome::default();
        if self.store.layer_kind(key) == Some(LayerKind::Optimistic) {
            outcome.extend_touched(self.store.discard_layer(key));
        }
        if result.data.as_ref().and_then(Value::as_object).is_some() {
            outcome.merge(self.ingest(&result, &document, LayerTarget::Base, WriteKind::Mutation));
        }

        let mut commands = Vec::new();
        if self.operations.contains_key(&key) {
            let root = EntityKey::root(self.config.root_typename(OperationKind::Mutation));
            let read = read::read_operation(
                &self.store,
                &self.config,
                &mut self.documents,
                Some(&mut self.memo),
                &document,
                &result.operation.variables,
                root,
            );
            commands.push(Command::Emit(OperationResult {
                operation: result.operation.clone(),
                data: read.data,
                error: result.error.clone(),
                stale: false,
                has_next: result.has_next,
                cache_outcome: None,
            }));
        }
        self.reexecutes(&outcome, Some(key), false, &mut commands);
        commands
    }

    fn subscription_result(&mut self, result: ExecutionResult) -> Vec<Command> {
        let key = result.operation.key;
        let document = match self.analyze(&result.operation) {
            Ok(document) => document,
            Err(commands) => return commands,
        };

        if !self.store.has_layer(key) {
            self.store.push_layer(key, LayerKind::Subscription);
        }
        let outcome = self.ingest(&result, &document, LayerTarget::Layer(key), WriteKind::Subscription);

        let mut commands = Vec::new();
        if self.operations.contains_key(&key) {
            let root = EntityKey::root(self.config.root_typename(OperationKind::Subscription));
            let read = read::read_operation(
                &self.store,
                &self.config,
                &mut self.documents,
                Some(&mut self.memo),
                &document,
                &result.operation.variables,
                root,
            );
            commands.push(Command::Emit(OperationResult {
                operation: result.operation.clone(),
                data: read.data,
                error: result.error.clone(),
                stale: false,
                has_next: result.has_next,
                cache_outcome: None,
            }));
        }
        self.reexecutes(&outcome, Some(key), false, &mut commands);
        commands
    }

    /// Applies a result's data (or its error paths) to the target layer.
    fn ingest(
        &mut self,
        result: &ExecutionResult,
        document: &DocumentInfo,
        target: LayerTarget,
        kind: WriteKind,
    ) -> WriteOutcome {
        let root = EntityKey::root(self.config.root_typename(document.kind()));
        if let Some(map) = result.data.as_ref().and_then(Value::as_object) {
            let staged = write::write_operation(
                &self.store,
                &self.config,
                &mut self.documents,
                document,
                &result.operation.variables,
                map,
                target,
                kind,
                result.error.as_ref(),
                root,
            );
            self.store.commit(staged)
        } else if let Some(error) = result.error.as_ref().filter(|error| !error.path.is_empty()) {
            let staged = write::record_error_only(
                &self.store,
                &self.config,
                &mut self.documents,
                document,
                &result.operation.variables,
                target,
                error,
                root,
            );
            self.store.commit(staged)
        } else {
            WriteOutcome::default()
        }
    }

    /// Runs the read traversal and updates the operation's registration in
    /// the dependency index and pending table.
    fn read_and_register(&mut self, operation: &Operation, document: &DocumentInfo) -> ReadOutput {
        let root = EntityKey::root(self.config.root_typename(document.kind()));
        let read = read::read_operation(
            &self.store,
            &self.config,
            &mut self.documents,
            Some(&mut self.memo),
            document,
            &operation.variables,
            root,
        );

        let (old_deps, old_types) = match self.operations.get(&operation.key) {
            Some(entry) => (entry.last_dependencies.clone(), entry.last_typenames.clone()),
            None => (IndexSet::new(), IndexSet::new()),
        };
        self.dependencies
            .update(operation.key, &old_deps, &old_types, &read.dependencies, &read.typenames);

        let generation = self.store.generation();
        let entry = self
            .operations
            .entry(operation.key)
            .or_insert_with(|| OperationEntry::new(operation.clone()));
        entry.operation = operation.clone();
        entry.last_data = read.data.clone();
        entry.last_dependencies = read.dependencies.clone();
        entry.last_typenames = read.typenames.clone();
        entry.generation = generation;
        read
    }

    /// Computes and issues the reexecution set of a committed write.
    ///
    /// An operation is reexecuted only when re-reading it yields a different
    /// output or dependency set; value-equal writes never cause churn. When
    /// the originating change is an optimistic mutation the replayed policy
    /// is downgraded to cache-first so no network traffic results.
    fn reexecutes(
        &mut self,
        outcome: &WriteOutcome,
        exclude: Option<u64>,
        optimistic: bool,
        commands: &mut Vec<Command>,
    ) {
        if outcome.touched.is_empty() && outcome.invalidated_types.is_empty() {
            return;
        }
        let empty_deps = IndexSet::new();
        let empty_types = IndexSet::new();
        let field_dependents = self.dependencies.dependents(&outcome.touched, &empty_types);
        let type_dependents = self.dependencies.dependents(&empty_deps, &outcome.invalidated_types);

        let mut dependents = field_dependents;
        dependents.extend(type_dependents.iter().copied());

        for operation_key in dependents {
            if exclude == Some(operation_key) {
                continue;
            }
            let Some(entry) = self.operations.get(&operation_key) else {
                continue;
            };
            if entry.operation.kind != OperationKind::Query {
                continue;
            }
            if entry.scheduled {
                continue;
            }
            // Already re-read at this generation during the current event.
            if entry.generation == self.store.generation() {
                continue;
            }
            let type_invalidated = type_dependents.contains(&operation_key);
            if entry.reexecutions_blocked
                && !type_invalidated
                && !outcome
                    .touched
                    .iter()
                    .any(|dep| entry.last_dependencies.contains(dep))
            {
                continue;
            }
            let operation = entry.operation.clone();
            let last_data = entry.last_data.clone();
            let last_dependencies = entry.last_dependencies.clone();

            let Ok(document) = self.documents.analyzed(&operation.query) else {
                continue;
            };
            let root = EntityKey::root(self.config.root_typename(document.kind()));
            let read = read::read_operation(
                &self.store,
                &self.config,
                &mut self.documents,
                Some(&mut self.memo),
                &document,
                &operation.variables,
                root,
            );
            let changed = read.data != last_data || read.dependencies != last_dependencies;
            if !changed && !type_invalidated {
                continue;
            }

            let mut operation = operation;
            if optimistic {
                operation.request_policy = RequestPolicy::CacheFirst;
            } else if operation.request_policy == RequestPolicy::NetworkOnly {
                operation.request_policy = RequestPolicy::CacheAndNetwork;
            }
            let entry = self.operations.get_mut(&operation_key).unwrap();
            entry.scheduled = true;
            entry.reexecutions_blocked = false;
            if type_invalidated {
                entry.marked_stale = true;
            }
            commands.push(Command::Reexecute(operation));
        }
    }
}
