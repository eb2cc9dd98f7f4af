//! Deserialization of the introspection document into the registry.

use serde::Deserialize;

use crate::{SchemaField, SchemaRegistry};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("the introspection document is malformed: {0}")]
    Malformed(String),
    #[error("the introspection document declares no query type")]
    MissingQueryType,
}

#[derive(Deserialize)]
struct IntrospectionData {
    #[serde(rename = "__schema")]
    schema: IntrospectionSchema,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    #[serde(default)]
    query_type: Option<NamedTypeRef>,
    #[serde(default)]
    mutation_type: Option<NamedTypeRef>,
    #[serde(default)]
    subscription_type: Option<NamedTypeRef>,
    #[serde(default)]
    types: Vec<IntrospectionType>,
}

#[derive(Deserialize)]
struct NamedTypeRef {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionType {
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fields: Option<Vec<IntrospectionField>>,
    #[serde(default)]
    possible_types: Option<Vec<NamedTypeRef>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionField {
    name: String,
    #[serde(default)]
    args: Vec<IntrospectionArgument>,
    #[serde(rename = "type")]
    ty: TypeRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionArgument {
    name: String,
    #[serde(default)]
    default_value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: String,
    #[serde(default)]
    of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    fn nullable(&self) -> bool {
        self.kind != "NON_NULL"
    }

    fn list(&self) -> bool {
        match self.kind.as_str() {
            "LIST" => true,
            "NON_NULL" => self.of_type.as_deref().is_some_and(TypeRef::list),
            _ => false,
        }
    }
}

pub(crate) fn build(document: &serde_json::Value) -> Result<SchemaRegistry, RegistryError> {
    // Tolerate both `{"__schema": ...}` and a bare schema object.
    let schema = if document.get("__schema").is_some() {
        serde_json::from_value::<IntrospectionData>(document.clone())
            .map_err(|err| RegistryError::Malformed(err.to_string()))?
            .schema
    } else {
        serde_json::from_value::<IntrospectionSchema>(document.clone())
            .map_err(|err| RegistryError::Malformed(err.to_string()))?
    };

    let query_type = schema
        .query_type
        .map(|ty| ty.name)
        .ok_or(RegistryError::MissingQueryType)?;
    let mutation_type = schema
        .mutation_type
        .map(|ty| ty.name)
        .unwrap_or_else(|| "Mutation".to_owned());
    let subscription_type = schema
        .subscription_type
        .map(|ty| ty.name)
        .unwrap_or_else(|| "Subscription".to_owned());

    let mut fields = Vec::new();
    let mut possible_types = Vec::new();
    let mut type_names = Vec::new();

    for ty in schema.types {
        let Some(type_name) = ty.name else { continue };

        match ty.kind.as_str() {
            "OBJECT" | "INTERFACE" | "UNION" => type_names.push(type_name.clone()),
            _ => continue,
        }

        for member in ty.possible_types.unwrap_or_default() {
            possible_types.push((type_name.clone(), member.name));
        }

        for field in ty.fields.unwrap_or_default() {
            let mut argument_defaults: Vec<_> = field
                .args
                .into_iter()
                .filter_map(|arg| Some((arg.name, parse_default_value(&arg.default_value?))))
                .collect();
            argument_defaults.sort_by(|(a, _), (b, _)| a.cmp(b));

            fields.push(SchemaField {
                type_name: type_name.clone(),
                field_name: field.name,
                nullable: field.ty.nullable(),
                list: field.ty.list(),
                argument_defaults,
            });
        }
    }

    fields.sort_by(|a, b| (&a.type_name, &a.field_name).cmp(&(&b.type_name, &b.field_name)));
    possible_types.sort();
    type_names.sort();

    Ok(SchemaRegistry {
        query_type,
        mutation_type,
        subscription_type,
        fields,
        possible_types,
        type_names,
    })
}

/// Introspection serializes defaults as GraphQL literals. JSON covers all of
/// them except enum values, which are kept as raw strings.
fn parse_default_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}
