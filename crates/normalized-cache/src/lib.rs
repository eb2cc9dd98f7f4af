//! A normalized, layered, document-aware client cache for GraphQL
//! operations.
//!
//! The cache sits in a request pipeline: operations come in, the engine
//! answers them from the normalized store or asks the host to forward them,
//! and returning results are decomposed into per-entity records and links.
//! A layered overlay model keeps optimistic mutations floating above real
//! data and makes concurrently-issued queries resolve to a deterministic
//! final state regardless of network arrival order.
//!
//! The entry point is [`CacheEngine`]: feed it [`Operation`]s and
//! [`ExecutionResult`]s, carry out the [`Command`]s it returns.
//!
//! ```
//! use normalized_cache::{CacheConfig, CacheEngine, Command, ExecutionResult, Operation};
//! use serde_json::json;
//!
//! let mut cache = CacheEngine::new(CacheConfig::default());
//!
//! let operation = Operation::query(1, "{ author { id name } }");
//! // An empty cache forwards the operation upstream.
//! let commands = cache.operation(operation.clone());
//! assert!(matches!(commands.as_slice(), [Command::Forward(_)]));
//!
//! // The transport answers; the cache normalizes and re-emits.
//! let result = ExecutionResult::data(
//!     operation,
//!     json!({ "author": { "__typename": "Author", "id": "1", "name": "A" } }),
//! );
//! let commands = cache.result(result);
//! assert!(matches!(commands.as_slice(), [Command::Emit(_)]));
//! ```

mod config;
mod deps;
mod document;
mod engine;
mod error;
mod handle;
mod key;
mod operation;
mod output;
mod read;
mod store;
mod write;

pub use config::{CacheConfig, FieldInfo, KeyResolver, OptimisticResolver, Resolver, Updater};
pub use document::DocumentError;
pub use engine::CacheEngine;
pub use error::{Logger, Severity, UpdaterError};
pub use handle::{CacheHandle, InspectedField};
pub use key::{Dependency, EntityKey, FieldKey};
pub use operation::{
    CacheOutcome, Command, ExecutionResult, GraphqlError, Operation, OperationKind, OperationResult,
    PathSegment, RequestPolicy, Variables,
};
pub use output::{OutputObject, OutputValue};
pub use schema_registry::SchemaRegistry;
pub use store::Link;
