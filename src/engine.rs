//! Form sessions: the field tree, its edit cycle and structural mutations.
//!
//! Every mutation runs the same cycle before returning: apply the edit,
//! settle the tree (rebuild the outermost node on the edited path whose
//! effective schema changed), then revalidate the whole value. Callers never
//! observe a tree or error set from the middle of a cycle.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::builder::{dynamic_schema, initial_value, slot_schema, ModelBuilder};
use crate::error::{MutationError, ValidationError};
use crate::loader::Fetch;
use crate::model::{FieldNode, Inherited, NodeKind, Property, Selection, Selections, Variant};
use crate::pointer::{child_path, parse_pointer};
use crate::resolver::resolve_refs;
use crate::types::{json_type_name, Draft, FormOptions};
use crate::validator::{detect_draft, group_by_path, ErrorMap, SchemaValidator};

/// Upper bound on consecutive rebuilds while settling one edit.
const MAX_SETTLE_PASSES: usize = 8;

/// A live form session over one resolved schema.
#[derive(Debug)]
pub struct FormEngine {
    schema: Value,
    draft: Draft,
    validator: SchemaValidator,
    selections: Selections,
    /// Declared leaves set to `null` that would otherwise fill from a default.
    cleared: BTreeSet<String>,
    root: FieldNode,
    errors: Vec<ValidationError>,
    error_map: ErrorMap,
}

impl FormEngine {
    /// Resolve `schema` and open a session over it.
    ///
    /// External references are fetched through `fetcher`. Dropping the
    /// returned future abandons the session and any fetch in flight.
    pub async fn open<F: Fetch>(
        schema: &Value,
        value: Option<Value>,
        options: &FormOptions,
        fetcher: &F,
    ) -> Self {
        let resolved = resolve_refs(schema, options.base_uri.as_ref(), fetcher).await;
        Self::from_resolved(resolved, value, options)
    }

    /// Open a session over an already-resolved schema.
    pub fn from_resolved(schema: Value, value: Option<Value>, options: &FormOptions) -> Self {
        let draft = detect_draft(&schema);
        let validator = SchemaValidator::with_formats(options.validate_formats);
        let selections = Selections::new();
        let root = ModelBuilder::new(&validator, Some(draft), &selections)
            .with_root(&schema)
            .build(&schema, value.as_ref(), false, "");
        tracing::debug!(?draft, "form session opened");

        let mut engine = Self {
            schema,
            draft,
            validator,
            selections,
            cleared: BTreeSet::new(),
            root,
            errors: Vec::new(),
            error_map: ErrorMap::new(),
        };
        engine.remember_cleared(&[]);
        engine.commit(&[]);
        engine
    }

    pub fn root(&self) -> &FieldNode {
        &self.root
    }

    /// Node at a JSON Pointer path.
    pub fn node(&self, path: &str) -> Option<&FieldNode> {
        self.root.node(path)
    }

    /// Current value of the whole form.
    pub fn value(&self) -> Value {
        self.root.value()
    }

    /// The resolved schema the session validates against.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn draft(&self) -> Draft {
        self.draft
    }

    /// Errors from the last validation, in validator order.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Messages bound to exactly `path`.
    pub fn errors_at(&self, path: &str) -> &[String] {
        self.error_map.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn error_map(&self) -> &ErrorMap {
        &self.error_map
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Assign a value. Leaves take it as-is; containers and lists are
    /// rebuilt from it.
    ///
    /// A declared leaf set to `null` stays `null` through later rebuilds
    /// instead of returning to its default.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<(), MutationError> {
        let (tokens, node) = self.editable(path)?;
        tracing::debug!(path = %node.path, value_type = json_type_name(&value), "value set");
        if node.is_leaf() {
            if let Some(node) = self.root.find_mut(&tokens) {
                node.kind = NodeKind::Leaf(value);
            }
        } else {
            // The assigned value replaces everything below the node.
            let node_path = node.path.clone();
            self.cleared.retain(|p| !is_within(p, &node_path));
            if let Some(node) = self.root.find(&tokens) {
                let rebuilt = self.rebuild(&tokens, node, &value);
                self.splice(&tokens, rebuilt);
            }
        }
        self.remember_cleared(&tokens);
        self.commit(&tokens);
        Ok(())
    }

    /// Append a slot to a list. Returns the new item's path.
    pub fn add_item(&mut self, path: &str) -> Result<String, MutationError> {
        let (tokens, node) = self.editable(path)?;
        let items = node.items().ok_or_else(|| MutationError::NotAList {
            path: node.path.clone(),
        })?;
        let index = items.len();
        let slot = slot_schema(&node.schema, index).ok_or_else(|| MutationError::ItemNotAllowed {
            path: node.path.clone(),
            index,
        })?;

        let item_path = child_path(&node.path, &index.to_string());
        let item = self
            .builder()
            .build_with(&slot, None, false, &item_path, &added_child_scope(node));

        if let Some(NodeKind::List(items)) = self.root.find_mut(&tokens).map(|n| &mut n.kind) {
            items.push(item);
        }
        tracing::debug!(path = %item_path, "array item added");
        self.commit(&tokens);
        Ok(item_path)
    }

    /// Remove the item at `index`. Later items move down one index and are
    /// rebuilt from the slot schema of their new position.
    pub fn remove_item(&mut self, path: &str, index: usize) -> Result<(), MutationError> {
        let (tokens, node) = self.editable(path)?;
        let items = node.items().ok_or_else(|| MutationError::NotAList {
            path: node.path.clone(),
        })?;
        if index >= items.len() {
            return Err(MutationError::IndexOutOfBounds {
                path: node.path.clone(),
                index,
                len: items.len(),
            });
        }

        let list_path = node.path.clone();
        let list_schema = node.schema.clone();
        let scope = node.inherited();
        let later: Vec<Value> = items[index + 1..].iter().map(FieldNode::value).collect();

        self.selections = std::mem::take(&mut self.selections)
            .into_iter()
            .filter_map(|(key, selection)| shift_index(&key, &list_path, index).map(|k| (k, selection)))
            .collect();
        self.cleared = std::mem::take(&mut self.cleared)
            .into_iter()
            .filter_map(|key| shift_index(&key, &list_path, index))
            .collect();

        let builder = self.builder();
        let shifted: Vec<FieldNode> = later
            .iter()
            .enumerate()
            .map_while(|(offset, value)| {
                let slot_index = index + offset;
                let slot = slot_schema(&list_schema, slot_index)?;
                let item_path = child_path(&list_path, &slot_index.to_string());
                Some(builder.build_with(&slot, Some(value), false, &item_path, &scope))
            })
            .collect();

        if let Some(NodeKind::List(items)) = self.root.find_mut(&tokens).map(|n| &mut n.kind) {
            items.truncate(index);
            items.extend(shifted);
        }
        tracing::debug!(path = %list_path, index, "array item removed");
        self.commit(&tokens);
        Ok(())
    }

    /// Add an undeclared property. Returns the new property's path.
    ///
    /// The key is trimmed, must be non-empty, must satisfy `propertyNames`,
    /// must not exist yet and must be admitted by `patternProperties`,
    /// `additionalProperties` or `unevaluatedProperties`.
    pub fn add_property(&mut self, path: &str, key: &str) -> Result<String, MutationError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(MutationError::EmptyPropertyName);
        }
        let (tokens, node) = self.editable(path)?;
        if !node.is_container() {
            return Err(MutationError::NotAContainer {
                path: node.path.clone(),
            });
        }
        if let Some(names) = node.schema.get("propertyNames") {
            let name = Value::String(key.to_string());
            if !self.validator.is_valid_with(self.draft, names, &name) {
                return Err(MutationError::InvalidPropertyName { key: key.to_string() });
            }
        }
        if node.child(key).is_some() {
            return Err(MutationError::PropertyExists { key: key.to_string() });
        }
        let declared = node
            .schema
            .get("properties")
            .and_then(|p| p.get(key))
            .is_some();
        let schema = dynamic_schema(&node.schema, key)
            .filter(|_| !declared)
            .ok_or_else(|| MutationError::PropertyNotAllowed { key: key.to_string() })?;

        let required = node
            .schema
            .get("required")
            .and_then(Value::as_array)
            .is_some_and(|r| r.iter().any(|k| k == key));
        let property_path = child_path(&node.path, key);
        let child = self
            .builder()
            .build_with(&schema, None, required, &property_path, &added_child_scope(node));

        if let Some(NodeKind::Container(properties)) = self.root.find_mut(&tokens).map(|n| &mut n.kind) {
            properties.push(Property {
                key: key.to_string(),
                dynamic: true,
                node: child,
            });
        }
        tracing::debug!(path = %property_path, "dynamic property added");
        self.commit(&tokens);
        Ok(property_path)
    }

    /// Remove a dynamic property. Declared properties cannot be removed.
    pub fn remove_property(&mut self, path: &str, key: &str) -> Result<(), MutationError> {
        let (tokens, node) = self.editable(path)?;
        let properties = node.properties().ok_or_else(|| MutationError::NotAContainer {
            path: node.path.clone(),
        })?;
        let property = properties
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| MutationError::PropertyNotFound {
                path: node.path.clone(),
                key: key.to_string(),
            })?;
        if !property.dynamic {
            return Err(MutationError::DeclaredProperty { key: key.to_string() });
        }

        let removed = property.node.path.clone();
        self.selections.retain(|k, _| !is_within(k, &removed));
        self.cleared.retain(|k| !is_within(k, &removed));

        if let Some(NodeKind::Container(properties)) = self.root.find_mut(&tokens).map(|n| &mut n.kind) {
            properties.retain(|p| p.key != key);
        }
        tracing::debug!(path = %removed, "dynamic property removed");
        self.commit(&tokens);
        Ok(())
    }

    /// Select `oneOf` branch `index` and rebuild the node from it.
    pub fn select_one_of(&mut self, path: &str, index: usize) -> Result<(), MutationError> {
        let (tokens, node) = self.lookup(path)?;
        let variant = node
            .variant
            .as_ref()
            .filter(|v| v.is_one_of())
            .ok_or_else(|| MutationError::NotOneOf {
                path: node.path.clone(),
            })?;
        check_range(variant, &node.path, index)?;

        let node_path = node.path.clone();
        self.selections.insert(node_path, Selection::One(index));
        self.switch_variant(&tokens);
        Ok(())
    }

    /// Toggle `anyOf` branch `index` and rebuild the node from the selected
    /// branches.
    pub fn toggle_any_of(&mut self, path: &str, index: usize) -> Result<(), MutationError> {
        let (tokens, node) = self.lookup(path)?;
        let not_any_of = || MutationError::NotAnyOf {
            path: node.path.clone(),
        };
        let variant = node.variant.as_ref().ok_or_else(not_any_of)?;
        let Selection::Any(selected) = &variant.selection else {
            return Err(not_any_of());
        };
        check_range(variant, &node.path, index)?;

        let mut selected = selected.clone();
        if !selected.remove(&index) {
            selected.insert(index);
        }
        let node_path = node.path.clone();
        self.selections.insert(node_path, Selection::Any(selected));
        self.switch_variant(&tokens);
        Ok(())
    }

    fn builder(&self) -> ModelBuilder<'_> {
        ModelBuilder::new(&self.validator, Some(self.draft), &self.selections)
            .with_root(&self.schema)
            .with_cleared(&self.cleared)
    }

    /// Find the node at `path`. A path that is not a JSON Pointer finds nothing.
    fn lookup(&self, path: &str) -> Result<(Vec<String>, &FieldNode), MutationError> {
        let not_found = || MutationError::NodeNotFound {
            path: path.to_string(),
        };
        let tokens = parse_pointer(path).ok_or_else(not_found)?;
        let node = self.root.find(&tokens).ok_or_else(not_found)?;
        Ok((tokens, node))
    }

    /// As [`FormEngine::lookup`], declining disabled nodes.
    fn editable(&self, path: &str) -> Result<(Vec<String>, &FieldNode), MutationError> {
        let (tokens, node) = self.lookup(path)?;
        if node.disabled {
            return Err(MutationError::ReadOnly {
                path: node.path.clone(),
            });
        }
        Ok((tokens, node))
    }

    /// What the node at `tokens` inherits from its parent.
    fn inherited_at(&self, tokens: &[String]) -> Inherited {
        match tokens.split_last() {
            Some((_, parent)) => self
                .root
                .find(parent)
                .map(FieldNode::inherited)
                .unwrap_or_default(),
            None => Inherited::default(),
        }
    }

    /// Build a replacement for `node` from its source schema and `value`.
    fn rebuild(&self, tokens: &[String], node: &FieldNode, value: &Value) -> FieldNode {
        self.builder().build_with(
            &node.source,
            Some(value),
            node.required,
            &node.path,
            &self.inherited_at(tokens),
        )
    }

    /// Record which leaves under `tokens` were cleared away from a
    /// non-null default.
    fn remember_cleared(&mut self, tokens: &[String]) {
        let Some(node) = self.root.find(tokens) else {
            return;
        };
        self.cleared.retain(|path| !is_within(path, &node.path));
        self.cleared.extend(
            node.iter()
                .filter(|n| n.is_unset() && !initial_value(&n.schema, None).is_null())
                .map(|n| n.path.clone()),
        );
    }

    /// Replace the node at `tokens`, keeping its place in the parent.
    fn splice(&mut self, tokens: &[String], node: FieldNode) {
        if let Some(slot) = self.root.find_mut(tokens) {
            *slot = node;
        }
    }

    fn switch_variant(&mut self, tokens: &[String]) {
        let Some(node) = self.root.find(tokens) else {
            return;
        };
        tracing::debug!(path = %node.path, "variant selection changed");
        let rebuilt = self.rebuild(tokens, node, &node.value());
        self.splice(tokens, rebuilt);
        self.commit(tokens);
    }

    fn commit(&mut self, tokens: &[String]) {
        for _ in 0..MAX_SETTLE_PASSES {
            if !self.settle(tokens) {
                break;
            }
        }
        let root = &self.root;
        self.cleared
            .retain(|path| root.node(path).is_some_and(FieldNode::is_unset));
        self.revalidate();
    }

    /// Rebuild the outermost node on the path to `tokens` whose effective
    /// schema no longer matches its current value. Returns whether a node
    /// was rebuilt.
    fn settle(&mut self, tokens: &[String]) -> bool {
        for depth in 0..=tokens.len() {
            let prefix = &tokens[..depth];
            let rebuilt = {
                let Some(node) = self.root.find(prefix) else {
                    return false;
                };
                let value = node.value();
                let effective = self.builder().effective_within(
                    &node.source,
                    Some(&value),
                    &node.path,
                    &self.inherited_at(prefix),
                );
                if effective == node.schema {
                    continue;
                }
                tracing::debug!(path = %node.path, "effective schema changed, rebuilding subtree");
                self.rebuild(prefix, node, &value)
            };
            self.splice(prefix, rebuilt);
            return true;
        }
        false
    }

    fn revalidate(&mut self) {
        let value = self.root.value();
        self.errors = self.validator.validate_with(self.draft, &self.schema, &value);
        self.error_map = group_by_path(&self.errors);
    }
}

fn check_range(variant: &Variant, path: &str, index: usize) -> Result<(), MutationError> {
    let count = variant.labels.len();
    if index >= count {
        return Err(MutationError::VariantOutOfRange {
            path: path.to_string(),
            index,
            count,
        });
    }
    Ok(())
}

/// What a child added to `parent` inherits. The parent holds a value, so the
/// child opens one level of a recursive definition.
fn added_child_scope(parent: &FieldNode) -> Inherited {
    Inherited {
        disabled: parent.disabled,
        refs: Vec::new(),
    }
}

/// True when `path` is `ancestor` or lies below it.
fn is_within(path: &str, ancestor: &str) -> bool {
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Re-key a selection after item `removed` of the list at `list` is removed.
/// Selections under the removed item are dropped; later items move down.
fn shift_index(key: &str, list: &str, removed: usize) -> Option<String> {
    let Some(rest) = key.strip_prefix(list).and_then(|r| r.strip_prefix('/')) else {
        return Some(key.to_string());
    };
    let (head, tail) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let Ok(index) = head.parse::<usize>() else {
        return Some(key.to_string());
    };

    match index.cmp(&removed) {
        std::cmp::Ordering::Less => Some(key.to_string()),
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(format!("{list}/{}{tail}", index - 1)),
    }
}
