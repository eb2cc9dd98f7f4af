//! A compact, read-optimized view of a GraphQL schema built from an
//! introspection result.
//!
//! The cache only needs a thin slice of what introspection carries: field
//! nullability, list-ness, argument defaults, abstract type membership and
//! the root operation type names. Everything else is dropped at build time
//! so lookups stay cheap.
//!
//! Fields live in a flat vector sorted by `(type, field)` and are resolved
//! with a binary search; abstract type membership works the same way.

mod introspection;

pub use introspection::RegistryError;

/// Read-optimized schema descriptor.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    query_type: String,
    mutation_type: String,
    subscription_type: String,
    /// Sorted by `(type_name, field_name)`.
    fields: Vec<SchemaField>,
    /// Sorted `(abstract type, concrete type)` pairs.
    possible_types: Vec<(String, String)>,
    /// Sorted names of all object, interface and union types.
    type_names: Vec<String>,
}

/// A single field of an object or interface type.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub(crate) type_name: String,
    pub(crate) field_name: String,
    pub(crate) nullable: bool,
    pub(crate) list: bool,
    /// Sorted by argument name.
    pub(crate) argument_defaults: Vec<(String, serde_json::Value)>,
}

impl SchemaField {
    /// Whether the field may be `null` according to the schema.
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the outermost non-null wrapper of the field type is a list.
    pub fn list(&self) -> bool {
        self.list
    }

    /// The declared default for one of the field's arguments, if any.
    pub fn argument_default(&self, name: &str) -> Option<&serde_json::Value> {
        self.argument_defaults
            .binary_search_by(|(arg, _)| arg.as_str().cmp(name))
            .ok()
            .map(|index| &self.argument_defaults[index].1)
    }
}

impl SchemaRegistry {
    /// Builds a registry from an introspection result.
    ///
    /// Accepts either the bare `__schema` object or the usual
    /// `{"__schema": ...}` wrapper, minified or not.
    pub fn from_introspection(document: &serde_json::Value) -> Result<Self, RegistryError> {
        introspection::build(document)
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> &str {
        &self.mutation_type
    }

    pub fn subscription_type(&self) -> &str {
        &self.subscription_type
    }

    /// Looks up a field declaration.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&SchemaField> {
        self.fields
            .binary_search_by(|field| {
                (field.type_name.as_str(), field.field_name.as_str()).cmp(&(type_name, field_name))
            })
            .ok()
            .map(|index| &self.fields[index])
    }

    /// Whether the schema declares a type with this name.
    pub fn has_type(&self, name: &str) -> bool {
        self.type_names.binary_search_by(|ty| ty.as_str().cmp(name)).is_ok()
    }

    /// Whether `concrete` satisfies a fragment type condition on `condition`.
    ///
    /// A concrete type always matches itself; for interfaces and unions the
    /// registry consults the recorded possible types.
    pub fn is_possible_type(&self, condition: &str, concrete: &str) -> bool {
        if condition == concrete {
            return true;
        }
        self.possible_types
            .binary_search_by(|(abstract_ty, member)| {
                (abstract_ty.as_str(), member.as_str()).cmp(&(condition, concrete))
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_introspection(&json!({
            "__schema": {
                "queryType": { "name": "Query" },
                "mutationType": { "name": "Mutation" },
                "subscriptionType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "fields": [
                            {
                                "name": "todos",
                                "args": [],
                                "type": {
                                    "kind": "LIST",
                                    "ofType": { "kind": "OBJECT", "name": "Todo" }
                                }
                            },
                            {
                                "name": "todo",
                                "args": [
                                    { "name": "first", "defaultValue": "10" },
                                    { "name": "id", "defaultValue": null }
                                ],
                                "type": { "kind": "OBJECT", "name": "Todo" }
                            }
                        ]
                    },
                    {
                        "kind": "OBJECT",
                        "name": "Todo",
                        "fields": [
                            {
                                "name": "id",
                                "args": [],
                                "type": {
                                    "kind": "NON_NULL",
                                    "ofType": { "kind": "SCALAR", "name": "ID" }
                                }
                            },
                            {
                                "name": "text",
                                "args": [],
                                "type": {
                                    "kind": "NON_NULL",
                                    "ofType": { "kind": "SCALAR", "name": "String" }
                                }
                            },
                            { "name": "author", "args": [], "type": { "kind": "OBJECT", "name": "Author" } }
                        ]
                    },
                    {
                        "kind": "OBJECT",
                        "name": "Author",
                        "fields": [
                            {
                                "name": "id",
                                "args": [],
                                "type": {
                                    "kind": "NON_NULL",
                                    "ofType": { "kind": "SCALAR", "name": "ID" }
                                }
                            },
                            { "name": "name", "args": [], "type": { "kind": "SCALAR", "name": "String" } }
                        ]
                    },
                    {
                        "kind": "UNION",
                        "name": "SearchResult",
                        "possibleTypes": [{ "name": "Todo" }, { "name": "Author" }]
                    },
                    { "kind": "SCALAR", "name": "String" }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn root_type_names() {
        let registry = registry();
        assert_eq!(registry.query_type(), "Query");
        assert_eq!(registry.mutation_type(), "Mutation");
        assert_eq!(registry.subscription_type(), "Subscription");
    }

    #[test]
    fn nullability() {
        let registry = registry();
        assert!(!registry.field("Todo", "id").unwrap().nullable());
        assert!(!registry.field("Todo", "text").unwrap().nullable());
        assert!(registry.field("Todo", "author").unwrap().nullable());
        assert!(registry.field("Query", "todos").unwrap().nullable());
        assert!(registry.field("Query", "todos").unwrap().list());
        assert!(registry.field("Todo", "missing").is_none());
        assert!(registry.field("Missing", "id").is_none());
    }

    #[test]
    fn argument_defaults() {
        let registry = registry();
        let field = registry.field("Query", "todo").unwrap();
        assert_eq!(field.argument_default("first"), Some(&json!(10)));
        assert_eq!(field.argument_default("id"), None);
        assert_eq!(field.argument_default("missing"), None);
    }

    #[test]
    fn possible_types() {
        let registry = registry();
        assert!(registry.is_possible_type("Todo", "Todo"));
        assert!(registry.is_possible_type("SearchResult", "Todo"));
        assert!(registry.is_possible_type("SearchResult", "Author"));
        assert!(!registry.is_possible_type("SearchResult", "Query"));
    }

    #[test]
    fn missing_query_type_is_an_error() {
        let err = SchemaRegistry::from_introspection(&json!({ "__schema": { "types": [] } })).unwrap_err();
        assert!(matches!(err, RegistryError::MissingQueryType));
    }
}
