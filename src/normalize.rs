//! Effective-schema computation.
//!
//! The effective schema of a node is the product of folding `allOf`, merging
//! the `if`/`then`/`else` branch chosen by the node's current value, and
//! merging whichever dependency keywords the value's keys trigger. `oneOf`
//! and `anyOf` are left alone; [`Normalizer::with_variant`] merges the
//! selected branch(es) on request.

use serde_json::{json, Map, Value};

use crate::model::{Selection, Variant};
use crate::types::Draft;
use crate::validator::{detect_draft, SchemaValidator};

/// Upper bound on nested `if` chains (a `then` that carries its own `if`).
const MAX_CONDITIONAL_DEPTH: usize = 32;

/// Interpret a subschema position. `false` admits nothing and yields `None`;
/// `true` and non-object values are the empty schema.
pub fn subschema(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::Bool(false) => None,
        _ => Some(json!({})),
    }
}

/// Merge `b` on top of `a`.
///
/// `properties` and `patternProperties` merge key by key with `b` winning,
/// `required` becomes the ordered union, `type` becomes the union of both
/// type sets when both declare one. Every other key is overwritten by `b`.
pub fn merge_schemas(a: &Value, b: &Value) -> Value {
    let mut merged = match a {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let Value::Object(overlay) = b else {
        return Value::Object(merged);
    };

    for (key, value) in overlay {
        match key.as_str() {
            "properties" | "patternProperties" => {
                let mut combined = merged
                    .get(key)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if let Value::Object(entries) = value {
                    for (name, schema) in entries {
                        combined.insert(name.clone(), schema.clone());
                    }
                }
                merged.insert(key.clone(), Value::Object(combined));
            }
            "required" => {
                let mut required = string_list(merged.get("required"));
                for name in string_list(Some(value)) {
                    if !required.contains(&name) {
                        required.push(name);
                    }
                }
                merged.insert(
                    key.clone(),
                    Value::Array(required.into_iter().map(Value::String).collect()),
                );
            }
            "type" if merged.contains_key("type") => {
                let mut types = string_list(merged.get("type"));
                for name in string_list(Some(value)) {
                    if !types.contains(&name) {
                        types.push(name);
                    }
                }
                let combined = match types.as_slice() {
                    [single] => Value::String(single.clone()),
                    _ => Value::Array(types.into_iter().map(Value::String).collect()),
                };
                merged.insert(key.clone(), combined);
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    Value::Object(merged)
}

/// Fold schemas left to right through [`merge_schemas`].
pub fn merge_all<'a, I>(schemas: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    schemas
        .into_iter()
        .fold(json!({}), |acc, schema| merge_schemas(&acc, schema))
}

/// Strings of a `required` list or `type` keyword; a bare string is a list of one.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Label shown for a `oneOf`/`anyOf` branch.
pub fn branch_label(branch: &Value, index: usize) -> String {
    branch
        .get("title")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("Option {}", index + 1))
}

/// Computes effective schemas. Stateless apart from the borrowed validator.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    validator: &'a SchemaValidator,
    draft: Option<Draft>,
}

impl<'a> Normalizer<'a> {
    /// `draft` is the session dialect used to evaluate `if`; when `None` the
    /// dialect is detected on each `if` subschema.
    pub fn new(validator: &'a SchemaValidator, draft: Option<Draft>) -> Self {
        Self { validator, draft }
    }

    /// Effective schema of `schema` for `value` (`None` when the value is absent).
    pub fn effective_schema(&self, schema: &Value, value: Option<&Value>) -> Value {
        let mut effective = fold_all_of(schema);

        for _ in 0..MAX_CONDITIONAL_DEPTH {
            match self.take_conditional_branch(&mut effective, value) {
                Some(branch) => effective = merge_schemas(&effective, &fold_all_of(&branch)),
                None => break,
            }
        }

        self.apply_dependencies(effective, value)
    }

    /// Effective schema with the selected `oneOf` branch or `anyOf` branches
    /// merged in. Returns the selector state when the schema offers variants.
    ///
    /// `selection` is honoured only if it matches the combinator and every
    /// index is in range; otherwise the default (first branch) applies.
    pub fn with_variant(
        &self,
        schema: &Value,
        value: Option<&Value>,
        selection: Option<&Selection>,
    ) -> (Value, Option<Variant>) {
        let mut base = self.effective_schema(schema, value);

        let (keyword, branches) = match (non_empty_list(&base, "oneOf"), non_empty_list(&base, "anyOf")) {
            (Some(branches), _) => ("oneOf", branches),
            (None, Some(branches)) => ("anyOf", branches),
            (None, None) => return (base, None),
        };
        let count = branches.len();
        let labels: Vec<String> = branches
            .iter()
            .enumerate()
            .map(|(i, b)| branch_label(b, i))
            .collect();

        let selection = match (keyword, selection) {
            ("oneOf", Some(Selection::One(i))) if *i < count => Selection::One(*i),
            ("anyOf", Some(Selection::Any(set))) if set.iter().all(|i| *i < count) => {
                Selection::Any(set.clone())
            }
            ("oneOf", _) => Selection::One(0),
            _ => Selection::Any([0].into_iter().collect()),
        };

        let active = match &selection {
            Selection::One(i) => subschema(&branches[*i]).unwrap_or_else(|| json!({})),
            Selection::Any(set) if set.is_empty() => {
                subschema(&branches[0]).unwrap_or_else(|| json!({}))
            }
            Selection::Any(set) => merge_all(set.iter().map(|i| &branches[*i])),
        };

        if let Value::Object(map) = &mut base {
            map.remove(keyword);
        }
        let merged = merge_schemas(&base, &active);
        let effective = self.effective_schema(&merged, value);

        (effective, Some(Variant { labels, selection }))
    }

    /// Remove `if`/`then`/`else` and return the branch the value selects.
    fn take_conditional_branch(&self, schema: &mut Value, value: Option<&Value>) -> Option<Value> {
        let map = schema.as_object_mut()?;
        let condition = map.remove("if")?;
        let then_branch = map.remove("then");
        let else_branch = map.remove("else");

        let matched = match &condition {
            Value::Bool(b) => *b,
            condition => {
                let draft = self.draft.unwrap_or_else(|| detect_draft(condition));
                let instance = value.unwrap_or(&Value::Null);
                self.validator.is_valid_with(draft, condition, instance)
            }
        };

        if matched {
            then_branch
        } else {
            else_branch
        }
    }

    /// Merge `dependentRequired`, `dependentSchemas` and legacy `dependencies`
    /// entries for every key present in an object value, in that order.
    fn apply_dependencies(&self, schema: Value, value: Option<&Value>) -> Value {
        let Some(object) = value.and_then(Value::as_object) else {
            return schema;
        };
        let keys: Vec<&String> = object.keys().collect();
        let mut merged = schema.clone();

        if let Some(dependent) = schema.get("dependentRequired").and_then(Value::as_object) {
            for key in &keys {
                if let Some(required @ Value::Array(list)) = dependent.get(key.as_str()) {
                    if !list.is_empty() {
                        merged = merge_schemas(&merged, &json!({ "required": required }));
                    }
                }
            }
        }

        if let Some(dependent) = schema.get("dependentSchemas").and_then(Value::as_object) {
            for key in &keys {
                if let Some(dep @ Value::Object(_)) = dependent.get(key.as_str()) {
                    merged = merge_schemas(&merged, &fold_all_of(dep));
                }
            }
        }

        if let Some(dependencies) = schema.get("dependencies").and_then(Value::as_object) {
            for key in &keys {
                match dependencies.get(key.as_str()) {
                    Some(required @ Value::Array(_)) => {
                        merged = merge_schemas(&merged, &json!({ "required": required }));
                    }
                    Some(dep @ Value::Object(_)) => {
                        merged = merge_schemas(&merged, &fold_all_of(dep));
                    }
                    _ => {}
                }
            }
        }

        merged
    }
}

/// Fold `[schema, ...allOf]`, flattening nested `allOf` in the branches.
fn fold_all_of(schema: &Value) -> Value {
    let Some(branches) = non_empty_list(schema, "allOf") else {
        return subschema(schema).unwrap_or_else(|| json!({}));
    };

    let mut base = schema.clone();
    if let Value::Object(map) = &mut base {
        map.remove("allOf");
    }
    let folded: Vec<Value> = branches.iter().map(fold_all_of).collect();
    merge_all(std::iter::once(&base).chain(folded.iter()))
}

fn non_empty_list<'v>(schema: &'v Value, keyword: &str) -> Option<&'v Vec<Value>> {
    schema
        .get(keyword)
        .and_then(Value::as_array)
        .filter(|arr| !arr.is_empty())
}
