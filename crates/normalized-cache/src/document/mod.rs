//! Per-document structural analysis.
//!
//! A document is parsed and lowered once into an owned tree of
//! [`FieldSelection`]s with fragments inlined, duplicate selections merged
//! and directive semantics resolved. The result is cached by document hash,
//! so every traversal of the same document works off the same
//! [`DocumentInfo`] allocation.

mod analyze;
pub(crate) mod arguments;

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use serde_json::Value;

use crate::operation::OperationKind;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to parse the operation document: {0}")]
    Parse(String),
    #[error("the document contains no operation or fragment definition")]
    Empty,
    #[error("unknown fragment \"{0}\"")]
    UnknownFragment(String),
    #[error("fragment cycle through \"{0}\"")]
    FragmentCycle(String),
}

/// Structural information about one document.
#[derive(Debug)]
pub struct DocumentInfo {
    pub(crate) kind: OperationKind,
    pub(crate) operation_name: Option<String>,
    pub(crate) selections: Vec<FieldSelection>,
    /// Type condition of the root, for fragment-only documents.
    pub(crate) root_condition: Option<String>,
    pub(crate) has_defer: bool,
    pub(crate) has_optional: bool,
    pub(crate) variable_defaults: serde_json::Map<String, Value>,
    source: String,
}

impl DocumentInfo {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn has_defer(&self) -> bool {
        self.has_defer
    }
}

/// One field of a lowered selection set.
///
/// Fragments are gone at this point: a field stemming from a fragment
/// carries the fragment's type condition, and directive semantics
/// (`@_optional`, `@_required`, `@defer`, `@include`, `@skip`) are folded
/// into the field itself, innermost occurrence winning.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Vec<(String, ArgTemplate)>,
    pub type_condition: Option<String>,
    /// `Some(true)` for `@_optional`, `Some(false)` for `@_required`,
    /// `None` when neither applies (schema nullability may still tolerate a
    /// missing value).
    pub optional: Option<bool>,
    pub deferred: bool,
    pub conditions: Vec<Condition>,
    pub children: Vec<FieldSelection>,
    /// Whether the document gave this field a selection set.
    pub composite: bool,
    /// Structural hash of this field and its subtree.
    pub shape_hash: u64,
    /// Names of the variables this subtree's arguments and conditions use.
    pub variables_used: Vec<String>,
}

impl FieldSelection {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// An argument value as written in the document, before variable binding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ArgTemplate {
    Variable(String),
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Enum(String),
    List(Vec<ArgTemplate>),
    Object(Vec<(String, ArgTemplate)>),
}

impl ArgTemplate {
    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        std::mem::discriminant(self).hash(state);
        match self {
            ArgTemplate::Variable(name) | ArgTemplate::String(name) | ArgTemplate::Enum(name) => name.hash(state),
            ArgTemplate::Null => {}
            ArgTemplate::Int(value) => value.hash(state),
            ArgTemplate::Float(value) => value.to_bits().hash(state),
            ArgTemplate::Boolean(value) => value.hash(state),
            ArgTemplate::List(items) => {
                for item in items {
                    item.hash_into(state);
                }
            }
            ArgTemplate::Object(fields) => {
                for (name, value) in fields {
                    name.hash(state);
                    value.hash_into(state);
                }
            }
        }
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            ArgTemplate::Variable(name) => out.push(name.clone()),
            ArgTemplate::List(items) => {
                for item in items {
                    item.collect_variables(out);
                }
            }
            ArgTemplate::Object(fields) => {
                for (_, value) in fields {
                    value.collect_variables(out);
                }
            }
            _ => {}
        }
    }
}

/// A `@include`/`@skip` condition attached to a field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Include(ArgTemplate),
    Skip(ArgTemplate),
}

impl Condition {
    pub(crate) fn template(&self) -> &ArgTemplate {
        match self {
            Condition::Include(template) | Condition::Skip(template) => template,
        }
    }
}

/// Analyzed documents, keyed by source hash.
#[derive(Default)]
pub(crate) struct DocumentCache {
    entries: HashMap<u64, Arc<DocumentInfo>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        DocumentCache::default()
    }

    /// Returns the cached analysis for `source`, lowering it on first use.
    pub fn analyzed(&mut self, source: &str) -> Result<Arc<DocumentInfo>, DocumentError> {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some(info) = self.entries.get(&hash) {
            if info.source == source {
                return Ok(info.clone());
            }
            // Hash collision; analyze without caching.
            return Ok(Arc::new(analyze::analyze(source)?));
        }

        let info = Arc::new(analyze::analyze(source)?);
        self.entries.insert(hash, info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    fn analyzed(source: &str) -> Arc<DocumentInfo> {
        DocumentCache::new().analyzed(source).unwrap()
    }

    fn field<'a>(info: &'a DocumentInfo, key: &str) -> &'a FieldSelection {
        info.selections
            .iter()
            .find(|field| field.response_key() == key)
            .unwrap()
    }

    #[test]
    fn lowers_a_simple_query() {
        let info = analyzed("query GetAuthor { author { id name } }");
        assert_eq!(info.kind(), OperationKind::Query);
        assert_eq!(info.operation_name(), Some("GetAuthor"));
        assert_eq!(info.selections.len(), 1);

        let author = field(&info, "author");
        assert!(author.composite);
        assert_eq!(author.children.len(), 2);
        assert!(!info.has_defer);
    }

    #[test]
    fn inlines_fragments_with_type_conditions() {
        let info = analyzed(
            "query { search { ...TodoFields ... on Author { name } } }
             fragment TodoFields on Todo { text }",
        );
        let search = field(&info, "search");
        assert_eq!(search.children.len(), 2);
        assert_eq!(search.children[0].name, "text");
        assert_eq!(search.children[0].type_condition.as_deref(), Some("Todo"));
        assert_eq!(search.children[1].name, "name");
        assert_eq!(search.children[1].type_condition.as_deref(), Some("Author"));
    }

    #[test]
    fn merges_duplicate_selections() {
        let info = analyzed("query { author { id } author { name } }");
        assert_eq!(info.selections.len(), 1);
        let author = field(&info, "author");
        assert_eq!(author.children.len(), 2);
    }

    #[test]
    fn directive_flags() {
        let info = analyzed(
            "query {
                author @_optional { name score @_required }
                feed @defer { id }
             }",
        );
        let author = field(&info, "author");
        assert_eq!(author.optional, Some(true));
        // @_optional propagates inward, @_required overrides it in place.
        assert_eq!(author.children[0].optional, Some(true));
        assert_eq!(author.children[1].optional, Some(false));

        let feed = field(&info, "feed");
        assert!(feed.deferred);
        assert!(feed.children[0].deferred);
        assert!(info.has_defer);
        assert!(info.has_optional);
    }

    #[test]
    fn optional_propagates_through_fragments() {
        let info = analyzed(
            "query { viewer { ...Profile @_optional } }
             fragment Profile on User { bio avatar @_required }",
        );
        let viewer = field(&info, "viewer");
        assert_eq!(viewer.children[0].optional, Some(true));
        assert_eq!(viewer.children[1].optional, Some(false));
    }

    #[test]
    fn include_and_skip_conditions() {
        let info = analyzed("query ($withAuthor: Boolean!) { author @include(if: $withAuthor) { name } }");
        let author = field(&info, "author");
        assert_eq!(
            author.conditions,
            vec![Condition::Include(ArgTemplate::Variable("withAuthor".into()))]
        );
    }

    #[test]
    fn variable_defaults_are_resolved() {
        let info = analyzed("query ($first: Int = 10, $after: String) { todos(first: $first, after: $after) { id } }");
        assert_eq!(info.variable_defaults.get("first"), Some(&serde_json::json!(10)));
        assert_eq!(info.variable_defaults.get("after"), None);
    }

    #[test]
    fn fragment_only_documents() {
        let info = analyzed("fragment TodoFields on Todo { id text }");
        assert_eq!(info.root_condition.as_deref(), Some("Todo"));
        assert_eq!(info.selections.len(), 2);
    }

    #[test]
    fn unknown_fragments_are_an_error() {
        let err = DocumentCache::new().analyzed("query { ...Missing }").unwrap_err();
        assert!(matches!(err, DocumentError::UnknownFragment(name) if name == "Missing"));
    }

    #[test]
    fn fragment_cycles_are_an_error() {
        let err = DocumentCache::new()
            .analyzed(
                "query { ...A }
                 fragment A on Query { ...B }
                 fragment B on Query { ...A }",
            )
            .unwrap_err();
        assert!(matches!(err, DocumentError::FragmentCycle(_)));
    }

    #[test]
    fn caches_by_document_identity() {
        let mut cache = DocumentCache::new();
        let a = cache.analyzed("query { author { id } }").unwrap();
        let b = cache.analyzed("query { author { id } }").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn shape_hashes_distinguish_different_subtrees() {
        let info = analyzed("query { a { x } b { x } c { y } }");
        let a = field(&info, "a");
        let b = field(&info, "b");
        let c = field(&info, "c");
        assert_ne!(a.shape_hash, b.shape_hash);
        assert_ne!(a.children[0].shape_hash, c.children[0].shape_hash);
        assert_eq!(a.children[0].shape_hash, b.children[0].shape_hash);
    }
}
