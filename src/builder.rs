//! Field-node synthesis from effective schemas.
//!
//! A node is built from the schema its parent hands down: the builder
//! follows or drops a remaining `$ref`, computes the effective schema
//! (merging the selected variant), resolves the node type and recurses into
//! properties or slots.
//!
//! References left in a resolved schema point at recursive definitions. A
//! node whose value is an object or array always follows its reference into
//! the session schema. Below the deepest such value a reference is followed
//! only once per branch, so an empty recursive field opens one level.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::{json, Value};

use crate::model::{FieldNode, Inherited, NodeKind, Property, Selections, Variant};
use crate::normalize::{subschema, Normalizer};
use crate::pointer::{self, child_path};
use crate::types::{Draft, SchemaType};
use crate::validator::SchemaValidator;

/// Bound on combinator nesting followed by [`resolve_type`].
const MAX_TYPE_DEPTH: usize = 16;

/// Bound on `$ref` hops followed for one node.
const MAX_REF_HOPS: usize = 16;

/// Value of a cleared leaf.
static NULL: Value = Value::Null;

/// Resolve the type a schema is edited as.
///
/// `enum` wins over `type`. A combinator without a direct `type` is typed by
/// its first branch. A `type` list picks its first non-null entry. Without
/// a usable `type` the shape is inferred from structural keywords.
pub fn resolve_type(schema: &Value) -> SchemaType {
    resolve_type_at(schema, 0)
}

fn resolve_type_at(schema: &Value, depth: usize) -> SchemaType {
    if schema.get("enum").is_some() {
        return SchemaType::Enum;
    }

    if schema.get("type").is_none() && depth < MAX_TYPE_DEPTH {
        for keyword in ["oneOf", "anyOf", "allOf"] {
            if let Some(first) = schema.get(keyword).and_then(Value::as_array).and_then(|b| b.first()) {
                return resolve_type_at(first, depth + 1);
            }
        }
    }

    match schema.get("type") {
        Some(Value::String(name)) => {
            if let Some(ty) = SchemaType::parse(name) {
                return ty;
            }
        }
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            let preferred = names
                .iter()
                .find(|n| **n != "null")
                .or_else(|| names.first());
            if let Some(ty) = preferred.and_then(|n| SchemaType::parse(n)) {
                return ty;
            }
        }
        _ => {}
    }

    let has = |key: &str| schema.get(key).is_some();
    if has("properties") || has("patternProperties") || has("additionalProperties") {
        SchemaType::Object
    } else if has("items") || has("prefixItems") {
        SchemaType::Array
    } else {
        SchemaType::String
    }
}

/// Schema for an undeclared property `key`, or `None` when the key is not allowed.
///
/// The first `patternProperties` entry whose pattern matches wins; invalid
/// patterns are skipped. Otherwise the first present of
/// `additionalProperties` and `unevaluatedProperties` decides.
pub fn dynamic_schema(schema: &Value, key: &str) -> Option<Value> {
    if let Some(patterns) = schema.get("patternProperties").and_then(Value::as_object) {
        for (pattern, pattern_schema) in patterns {
            match Regex::new(pattern) {
                Ok(re) if re.is_match(key) => return subschema(pattern_schema),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid patternProperties regex");
                }
            }
        }
    }

    match ["additionalProperties", "unevaluatedProperties"]
        .iter()
        .find_map(|keyword| schema.get(*keyword))
    {
        Some(rest) => subschema(rest),
        None => Some(json!({})),
    }
}

/// Tuple schemas: `prefixItems`, or a legacy `items` array.
fn tuple_schemas(schema: &Value) -> Option<&Vec<Value>> {
    schema
        .get("prefixItems")
        .and_then(Value::as_array)
        .or_else(|| schema.get("items").and_then(Value::as_array))
}

/// Schema for array slot `index`, or `None` when no slot may exist there.
pub fn slot_schema(schema: &Value, index: usize) -> Option<Value> {
    if let Some(slot) = tuple_schemas(schema).and_then(|tuple| tuple.get(index)) {
        return subschema(slot);
    }

    let rest = ["items", "additionalItems", "unevaluatedItems"]
        .iter()
        .filter_map(|keyword| schema.get(*keyword))
        .find(|rest| !rest.is_array());
    match rest {
        Some(rest) => subschema(rest),
        None => Some(json!({})),
    }
}

/// Initial value of a leaf: the supplied value, else `const`, `default`,
/// the first `enum` entry, or the empty value of the declared type.
pub fn initial_value(schema: &Value, value: Option<&Value>) -> Value {
    if let Some(value) = value {
        return value.clone();
    }
    if let Some(constant) = schema.get("const") {
        return constant.clone();
    }
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return first.clone();
    }

    let declared = match schema.get("type") {
        Some(Value::String(name)) => SchemaType::parse(name),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|n| *n != "null")
            .and_then(SchemaType::parse),
        _ => None,
    };
    match declared {
        Some(SchemaType::Boolean) => Value::Bool(false),
        Some(SchemaType::Array) => json!([]),
        Some(SchemaType::Object) => json!({}),
        _ => Value::Null,
    }
}

/// Required property names of an effective schema.
fn required_keys(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Builds [`FieldNode`] trees.
#[derive(Debug, Clone, Copy)]
pub struct ModelBuilder<'a> {
    normalizer: Normalizer<'a>,
    selections: &'a Selections,
    /// Resolved schema that remaining local `$ref`s point into.
    root: Option<&'a Value>,
    /// Paths of declared leaves cleared to `null`.
    cleared: Option<&'a BTreeSet<String>>,
}

impl<'a> ModelBuilder<'a> {
    /// `selections` supplies the current variant choice per node path.
    pub fn new(validator: &'a SchemaValidator, draft: Option<Draft>, selections: &'a Selections) -> Self {
        Self {
            normalizer: Normalizer::new(validator, draft),
            selections,
            root: None,
            cleared: None,
        }
    }

    /// Follow remaining local `$ref`s into `root`, the resolved schema the
    /// tree is built from. Without it such references build as `{}`.
    pub fn with_root(mut self, root: &'a Value) -> Self {
        self.root = Some(root);
        self
    }

    /// Keep declared leaves at these paths `null` when their value is absent,
    /// instead of filling them from `default`, `const` or `enum`.
    pub(crate) fn with_cleared(mut self, cleared: &'a BTreeSet<String>) -> Self {
        self.cleared = Some(cleared);
        self
    }

    /// Build the node at `path` from the schema handed down by its parent.
    pub fn build(&self, schema: &Value, value: Option<&Value>, required: bool, path: &str) -> FieldNode {
        self.build_with(schema, value, required, path, &Inherited::default())
    }

    /// Effective schema of the node at `path`, with its selected variant merged.
    pub fn effective_with_variant(
        &self,
        schema: &Value,
        value: Option<&Value>,
        path: &str,
    ) -> (Value, Option<Variant>) {
        let (effective, variant, _) = self.normalize(schema, value, path, &[]);
        (effective, variant)
    }

    /// Effective schema of a node below ancestors described by `inherited`.
    pub(crate) fn effective_within(
        &self,
        schema: &Value,
        value: Option<&Value>,
        path: &str,
        inherited: &Inherited,
    ) -> Value {
        self.normalize(schema, value, path, &inherited.refs).0
    }

    fn normalize(
        &self,
        schema: &Value,
        value: Option<&Value>,
        path: &str,
        refs: &[String],
    ) -> (Value, Option<Variant>, Vec<String>) {
        let mut refs = refs.to_vec();
        let prepared = self.dereference(schema, value, &mut refs);
        let (effective, variant) = self
            .normalizer
            .with_variant(&prepared, value, self.selections.get(path));
        (effective, variant, refs)
    }

    /// Normalize the schema position a node is built from: `true` and
    /// non-objects become `{}`, and a remaining `$ref` is either followed into
    /// the root (siblings win) or dropped so the node is built from its other
    /// keywords. Every reference met is appended to `refs`, which restarts
    /// at a node holding an object or array value.
    fn dereference(&self, schema: &Value, value: Option<&Value>, refs: &mut Vec<String>) -> Value {
        let mut schema = subschema(schema).unwrap_or_else(|| json!({}));
        let structured = value.is_some_and(|v| v.is_object() || v.is_array());
        if structured {
            refs.clear();
        }

        for _ in 0..MAX_REF_HOPS {
            let Value::Object(map) = &mut schema else {
                break;
            };
            let Some(Value::String(reference)) = map.remove("$ref") else {
                break;
            };
            let follow = structured || !refs.contains(&reference);
            let target = self
                .root
                .filter(|_| follow)
                .and_then(|root| pointer::resolve(root, &reference));
            match target {
                Some(Value::Object(target)) => {
                    for (key, value) in target {
                        map.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                    refs.push(reference);
                }
                _ => {
                    tracing::debug!(reference = %reference, "building node from unresolved reference as {{}}");
                    refs.push(reference);
                    break;
                }
            }
        }
        if let Value::Object(map) = &mut schema {
            map.remove("$ref");
        }
        schema
    }

    fn is_cleared(&self, path: &str) -> bool {
        self.cleared.is_some_and(|cleared| cleared.contains(path))
    }

    /// As [`ModelBuilder::build`], for a node below ancestors described by
    /// `inherited`.
    pub(crate) fn build_with(
        &self,
        schema: &Value,
        value: Option<&Value>,
        required: bool,
        path: &str,
        inherited: &Inherited,
    ) -> FieldNode {
        let (effective, variant, refs) = self.normalize(schema, value, path, &inherited.refs);
        let field_type = resolve_type(&effective);
        let read_only = effective.get("readOnly") == Some(&Value::Bool(true));
        let scope = Inherited {
            disabled: inherited.disabled || read_only,
            refs,
        };

        let kind = match field_type {
            SchemaType::Object => NodeKind::Container(self.build_properties(&effective, value, path, &scope)),
            SchemaType::Array => NodeKind::List(self.build_items(&effective, value, path, &scope)),
            _ => NodeKind::Leaf(initial_value(&effective, value)),
        };
        let disabled = scope.disabled
            || (matches!(kind, NodeKind::Leaf(_)) && effective.get("const").is_some());

        FieldNode {
            path: path.to_string(),
            schema: effective,
            source: schema.clone(),
            refs: scope.refs,
            required,
            disabled,
            field_type,
            variant,
            kind,
        }
    }

    fn build_properties(
        &self,
        schema: &Value,
        value: Option<&Value>,
        path: &str,
        scope: &Inherited,
    ) -> Vec<Property> {
        let object = value.and_then(Value::as_object);
        let required = required_keys(schema);
        let declared = schema.get("properties").and_then(Value::as_object);
        let mut properties = Vec::new();

        for (key, child_schema) in declared.into_iter().flatten() {
            if child_schema == &Value::Bool(false) {
                continue;
            }
            let property_path = child_path(path, key);
            let child_value = object
                .and_then(|o| o.get(key))
                .or_else(|| self.is_cleared(&property_path).then_some(&NULL));
            properties.push(Property {
                key: key.clone(),
                dynamic: false,
                node: self.build_with(
                    child_schema,
                    child_value,
                    required.contains(&key.as_str()),
                    &property_path,
                    scope,
                ),
            });
        }

        for (key, child_value) in object.into_iter().flatten() {
            if declared.is_some_and(|d| d.contains_key(key)) {
                continue;
            }
            let Some(child_schema) = dynamic_schema(schema, key) else {
                tracing::debug!(path = %path, key = %key, "dropping key not allowed by schema");
                continue;
            };
            properties.push(Property {
                key: key.clone(),
                dynamic: true,
                node: self.build_with(
                    &child_schema,
                    Some(child_value),
                    required.contains(&key.as_str()),
                    &child_path(path, key),
                    scope,
                ),
            });
        }

        properties
    }

    fn build_items(&self, schema: &Value, value: Option<&Value>, path: &str, scope: &Inherited) -> Vec<FieldNode> {
        let items = value.and_then(Value::as_array);
        let tuple_len = tuple_schemas(schema).map_or(0, Vec::len);
        let min_items = schema
            .get("minItems")
            .and_then(Value::as_u64)
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let count = tuple_len.max(min_items).max(items.map_or(0, Vec::len));

        // Slots stop at the first index whose schema is `false`.
        (0..count)
            .map_while(|index| {
                let slot = slot_schema(schema, index)?;
                let item_value = items.and_then(|a| a.get(index));
                Some(self.build_with(&slot, item_value, false, &child_path(path, &index.to_string()), scope))
            })
            .collect()
    }
}
