//! Lowering of a parsed document into [`DocumentInfo`].

use std::collections::HashMap;

use graphql_parser::query::{
    Definition, Directive, FragmentDefinition, OperationDefinition, Selection, SelectionSet, TypeCondition,
    Value as ParserValue,
};

use super::{arguments, ArgTemplate, Condition, DocumentError, DocumentInfo, FieldSelection};
use crate::operation::OperationKind;

pub(super) fn analyze(source: &str) -> Result<DocumentInfo, DocumentError> {
    let document =
        graphql_parser::parse_query::<&str>(source).map_err(|err| DocumentError::Parse(err.to_string()))?;

    let mut fragments = HashMap::new();
    let mut first_fragment = None;
    let mut operation = None;
    for definition in &document.definitions {
        match definition {
            Definition::Fragment(fragment) => {
                if first_fragment.is_none() {
                    first_fragment = Some(fragment);
                }
                fragments.insert(fragment.name, fragment);
            }
            Definition::Operation(definition) => {
                if operation.is_none() {
                    operation = Some(definition);
                }
            }
        }
    }

    let mut lowerer = Lowerer {
        fragments,
        visiting: Vec::new(),
        has_defer: false,
        has_optional: false,
    };

    let info = match (operation, first_fragment) {
        (Some(operation), _) => lowerer.lower_operation(operation, source)?,
        (None, Some(fragment)) => lowerer.lower_fragment_document(fragment, source)?,
        (None, None) => return Err(DocumentError::Empty),
    };

    Ok(info)
}

struct Lowerer<'doc, 'a> {
    fragments: HashMap<&'a str, &'doc FragmentDefinition<'a, &'a str>>,
    visiting: Vec<&'a str>,
    has_defer: bool,
    has_optional: bool,
}

/// Directive state flowing downward from enclosing fields and fragments.
#[derive(Clone, Default)]
struct Inherited {
    type_condition: Option<String>,
    optional: Option<bool>,
    deferred: bool,
    conditions: Vec<Condition>,
}

impl<'doc, 'a> Lowerer<'doc, 'a> {
    fn lower_operation(
        &mut self,
        operation: &'doc OperationDefinition<'a, &'a str>,
        source: &str,
    ) -> Result<DocumentInfo, DocumentError> {
        let (kind, name, variable_definitions, selection_set) = match operation {
            OperationDefinition::Query(query) => (
                OperationKind::Query,
                query.name,
                query.variable_definitions.as_slice(),
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => (
                OperationKind::Mutation,
                mutation.name,
                mutation.variable_definitions.as_slice(),
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(subscription) => (
                OperationKind::Subscription,
                subscription.name,
                subscription.variable_definitions.as_slice(),
                &subscription.selection_set,
            ),
            OperationDefinition::SelectionSet(selection_set) => {
                (OperationKind::Query, None, [].as_slice(), selection_set)
            }
        };

        let mut variable_defaults = serde_json::Map::new();
        for definition in variable_definitions {
            let Some(default) = &definition.default_value else { continue };
            let template = lower_value(default);
            if let Some(value) = arguments::bind_value(&template, &serde_json::Map::new(), &serde_json::Map::new()) {
                variable_defaults.insert(definition.name.to_owned(), value);
            }
        }

        let mut selections = Vec::new();
        self.lower_set(selection_set, &Inherited::default(), &mut selections)?;
        let mut selections = dedupe(selections);
        finalize(&mut selections);

        Ok(DocumentInfo {
            kind,
            operation_name: name.map(str::to_owned),
            selections,
            root_condition: None,
            has_defer: self.has_defer,
            has_optional: self.has_optional,
            variable_defaults,
            source: source.to_owned(),
        })
    }

    /// Documents made of fragments only, as handed to `write_fragment` and
    /// `read_fragment`. The first fragment is the root.
    fn lower_fragment_document(
        &mut self,
        root: &'doc FragmentDefinition<'a, &'a str>,
        source: &str,
    ) -> Result<DocumentInfo, DocumentError> {
        let TypeCondition::On(condition) = &root.type_condition;
        let inherited = Inherited {
            type_condition: Some((*condition).to_owned()),
            ..Inherited::default()
        };

        let mut selections = Vec::new();
        self.lower_set(&root.selection_set, &inherited, &mut selections)?;
        let mut selections = dedupe(selections);
        finalize(&mut selections);

        Ok(DocumentInfo {
            kind: OperationKind::Query,
            operation_name: None,
            selections,
            root_condition: Some((*condition).to_owned()),
            has_defer: self.has_defer,
            has_optional: self.has_optional,
            variable_defaults: serde_json::Map::new(),
            source: source.to_owned(),
        })
    }

    fn lower_set(
        &mut self,
        set: &'doc SelectionSet<'a, &'a str>,
        inherited: &Inherited,
        out: &mut Vec<FieldSelection>,
    ) -> Result<(), DocumentError> {
        for item in &set.items {
            match item {
                Selection::Field(field) => {
                    let flags = self.parse_directives(&field.directives);
                    let optional = flags.optional.or(inherited.optional);
                    let deferred = flags.deferred || inherited.deferred;
                    let mut conditions = inherited.conditions.clone();
                    conditions.extend(flags.conditions);

                    let composite = !field.selection_set.items.is_empty();
                    let mut children = Vec::new();
                    if composite {
                        let child_inherited = Inherited {
                            type_condition: None,
                            optional,
                            deferred,
                            conditions: Vec::new(),
                        };
                        self.lower_set(&field.selection_set, &child_inherited, &mut children)?;
                    }

                    out.push(FieldSelection {
                        name: field.name.to_owned(),
                        alias: field.alias.map(str::to_owned),
                        arguments: field
                            .arguments
                            .iter()
                            .map(|(name, value)| ((*name).to_owned(), lower_value(value)))
                            .collect(),
                        type_condition: inherited.type_condition.clone(),
                        optional,
                        deferred,
                        conditions,
                        children,
                        composite,
                        shape_hash: 0,
                        variables_used: Vec::new(),
                    });
                }
                Selection::InlineFragment(fragment) => {
                    let flags = self.parse_directives(&fragment.directives);
                    let type_condition = match &fragment.type_condition {
                        Some(TypeCondition::On(ty)) => Some((*ty).to_owned()),
                        None => inherited.type_condition.clone(),
                    };
                    let mut conditions = inherited.conditions.clone();
                    conditions.extend(flags.conditions);
                    let next = Inherited {
                        type_condition,
                        optional: flags.optional.or(inherited.optional),
                        deferred: flags.deferred || inherited.deferred,
                        conditions,
                    };
                    self.lower_set(&fragment.selection_set, &next, out)?;
                }
                Selection::FragmentSpread(spread) => {
                    let flags = self.parse_directives(&spread.directives);
                    let Some(fragment) = self.fragments.get(spread.fragment_name).copied() else {
                        return Err(DocumentError::UnknownFragment(spread.fragment_name.to_owned()));
                    };
                    if self.visiting.contains(&spread.fragment_name) {
                        return Err(DocumentError::FragmentCycle(spread.fragment_name.to_owned()));
                    }
                    self.visiting.push(spread.fragment_name);

                    let TypeCondition::On(ty) = &fragment.type_condition;
                    let mut conditions = inherited.conditions.clone();
                    conditions.extend(flags.conditions);
                    let next = Inherited {
                        type_condition: Some((*ty).to_owned()),
                        optional: flags.optional.or(inherited.optional),
                        deferred: flags.deferred || inherited.deferred,
                        conditions,
                    };
                    self.lower_set(&fragment.selection_set, &next, out)?;
                    self.visiting.pop();
                }
            }
        }
        Ok(())
    }

    fn parse_directives(&mut self, directives: &[Directive<'a, &'a str>]) -> DirectiveFlags {
        let mut flags = DirectiveFlags::default();
        for directive in directives {
            match directive.name {
                "_optional" => {
                    flags.optional = Some(true);
                    self.has_optional = true;
                }
                "_required" => flags.optional = Some(false),
                "defer" => {
                    flags.deferred = true;
                    self.has_defer = true;
                }
                "include" | "skip" => {
                    let condition = directive
                        .arguments
                        .iter()
                        .find(|(name, _)| *name == "if")
                        .map(|(_, value)| lower_value(value))
                        .unwrap_or(ArgTemplate::Boolean(true));
                    flags.conditions.push(if directive.name == "include" {
                        Condition::Include(condition)
                    } else {
                        Condition::Skip(condition)
                    });
                }
                _ => {}
            }
        }
        flags
    }
}

#[derive(Default)]
struct DirectiveFlags {
    optional: Option<bool>,
    deferred: bool,
    conditions: Vec<Condition>,
}

fn lower_value<'a>(value: &ParserValue<'a, &'a str>) -> ArgTemplate {
    match value {
        ParserValue::Variable(name) => ArgTemplate::Variable((*name).to_owned()),
        ParserValue::Int(number) => ArgTemplate::Int(number.as_i64().unwrap_or_default()),
        ParserValue::Float(value) => ArgTemplate::Float(*value),
        ParserValue::String(value) => ArgTemplate::String(value.clone()),
        ParserValue::Boolean(value) => ArgTemplate::Boolean(*value),
        ParserValue::Null => ArgTemplate::Null,
        ParserValue::Enum(name) => ArgTemplate::Enum((*name).to_owned()),
        ParserValue::List(items) => ArgTemplate::List(items.iter().map(lower_value).collect()),
        ParserValue::Object(fields) => ArgTemplate::Object(
            fields
                .iter()
                .map(|(name, value)| ((*name).to_owned(), lower_value(value)))
                .collect(),
        ),
    }
}

/// Merges selections sharing a response key, type condition, arguments and
/// conditions, the way executors merge duplicate fields.
fn dedupe(fields: Vec<FieldSelection>) -> Vec<FieldSelection> {
    let mut out: Vec<FieldSelection> = Vec::new();
    for field in fields {
        let existing = out.iter_mut().find(|candidate| {
            candidate.response_key() == field.response_key()
                && candidate.name == field.name
                && candidate.type_condition == field.type_condition
                && candidate.arguments == field.arguments
                && candidate.conditions == field.conditions
        });
        match existing {
            Some(existing) => {
                existing.children.extend(field.children);
                existing.optional = merge_optional(existing.optional, field.optional);
                existing.deferred = existing.deferred && field.deferred;
                existing.composite |= field.composite;
            }
            None => out.push(field),
        }
    }
    for field in &mut out {
        let children = std::mem::take(&mut field.children);
        field.children = dedupe(children);
    }
    out
}

fn merge_optional(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), _) | (_, Some(true)) => Some(true),
        _ => None,
    }
}

/// Bottom-up pass computing shape hashes and used-variable sets.
fn finalize(fields: &mut [FieldSelection]) {
    use std::hash::{DefaultHasher, Hash, Hasher};

    for field in fields {
        finalize(&mut field.children);

        let mut variables = Vec::new();
        for (_, template) in &field.arguments {
            template.collect_variables(&mut variables);
        }
        for condition in &field.conditions {
            condition.template().collect_variables(&mut variables);
        }
        for child in &field.children {
            variables.extend(child.variables_used.iter().cloned());
        }
        variables.sort();
        variables.dedup();
        field.variables_used = variables;

        let mut hasher = DefaultHasher::new();
        field.name.hash(&mut hasher);
        field.alias.hash(&mut hasher);
        field.type_condition.hash(&mut hasher);
        field.optional.hash(&mut hasher);
        field.deferred.hash(&mut hasher);
        for (name, template) in &field.arguments {
            name.hash(&mut hasher);
            template.hash_into(&mut hasher);
        }
        for condition in &field.conditions {
            std::mem::discriminant(condition).hash(&mut hasher);
            condition.template().hash_into(&mut hasher);
        }
        field.composite.hash(&mut hasher);
        for child in &field.children {
            child.shape_hash.hash(&mut hasher);
        }
        field.shape_hash = hasher.finish();
    }
}
