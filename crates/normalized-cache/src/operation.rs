//! The operation and result types flowing through the cache.

use std::sync::Arc;

use serde_json::Value;

use crate::output::OutputValue;

/// Operation variables, as received alongside the document.
pub type Variables = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Client hint controlling whether an operation is served from cache, the
/// network, or both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestPolicy {
    #[default]
    CacheFirst,
    CacheAndNetwork,
    CacheOnly,
    NetworkOnly,
}

/// One incoming GraphQL operation.
///
/// Keys are assigned by the host pipeline and increase with issue order;
/// the commutativity guarantees lean on that ordering.
#[derive(Clone, Debug)]
pub struct Operation {
    pub key: u64,
    pub kind: OperationKind,
    pub query: Arc<str>,
    pub variables: Variables,
    pub request_policy: RequestPolicy,
}

impl Operation {
    pub fn new(key: u64, kind: OperationKind, query: impl Into<Arc<str>>) -> Self {
        Operation {
            key,
            kind,
            query: query.into(),
            variables: Variables::new(),
            request_policy: RequestPolicy::default(),
        }
    }

    pub fn query(key: u64, query: impl Into<Arc<str>>) -> Self {
        Operation::new(key, OperationKind::Query, query)
    }

    pub fn mutation(key: u64, query: impl Into<Arc<str>>) -> Self {
        Operation::new(key, OperationKind::Mutation, query)
    }

    pub fn subscription(key: u64, query: impl Into<Arc<str>>) -> Self {
        Operation::new(key, OperationKind::Subscription, query)
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.request_policy = policy;
        self
    }
}

/// Classification attached to results served from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Partial,
}

/// One step of a GraphQL error path.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A GraphQL execution error, passed through results verbatim.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphqlError {
            message: message.into(),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl IntoIterator<Item = PathSegment>) -> Self {
        self.path = path.into_iter().collect();
        self
    }
}

/// A result arriving from the transport for a forwarded operation.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub operation: Operation,
    pub data: Option<Value>,
    pub error: Option<GraphqlError>,
    pub has_next: bool,
}

impl ExecutionResult {
    pub fn data(operation: Operation, data: Value) -> Self {
        ExecutionResult {
            operation,
            data: Some(data),
            error: None,
            has_next: false,
        }
    }

    pub fn error(operation: Operation, error: GraphqlError) -> Self {
        ExecutionResult {
            operation,
            data: None,
            error: Some(error),
            has_next: false,
        }
    }

    pub fn with_has_next(mut self, has_next: bool) -> Self {
        self.has_next = has_next;
        self
    }
}

/// A result emitted to downstream consumers.
#[derive(Clone, Debug)]
pub struct OperationResult {
    pub operation: Operation,
    pub data: Option<OutputValue>,
    pub error: Option<GraphqlError>,
    pub stale: bool,
    pub has_next: bool,
    /// Set for cache-served emissions; unset on an operation's own network
    /// result.
    pub cache_outcome: Option<CacheOutcome>,
}

/// What the cache asks its host to do in response to an event.
#[derive(Clone, Debug)]
pub enum Command {
    /// Deliver a result downstream.
    Emit(OperationResult),
    /// Forward an unresolved operation to the transport.
    Forward(Operation),
    /// Re-issue a previously seen operation whose dependencies changed.
    Reexecute(Operation),
}
