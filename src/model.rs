//! The field-node tree handed to the rendering layer.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::pointer::parse_pointer;
use crate::types::SchemaType;

/// Variant selections keyed by node path.
pub type Selections = HashMap<String, Selection>;

/// Current choice of a variant selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "selected", rename_all = "lowercase")]
pub enum Selection {
    /// `oneOf`: exactly one branch.
    One(usize),
    /// `anyOf`: any subset of branches.
    Any(BTreeSet<usize>),
}

impl Selection {
    pub fn contains(&self, index: usize) -> bool {
        match self {
            Selection::One(i) => *i == index,
            Selection::Any(set) => set.contains(&index),
        }
    }
}

/// Selector state of a node whose schema offers `oneOf` or `anyOf` branches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    /// One label per branch, in declaration order.
    pub labels: Vec<String>,
    pub selection: Selection,
}

impl Variant {
    pub fn is_one_of(&self) -> bool {
        matches!(self.selection, Selection::One(_))
    }
}

/// A property of a container node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub key: String,
    /// True when the key came from the value rather than `properties`.
    pub dynamic: bool,
    pub node: FieldNode,
}

/// Shape of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "lowercase")]
pub enum NodeKind {
    /// Object-shaped: declared properties first, then dynamic keys.
    Container(Vec<Property>),
    /// Array-shaped: tuple slots first, then homogeneous slots.
    List(Vec<FieldNode>),
    /// Scalar (or enumerated) value.
    Leaf(Value),
}

/// State a node inherits from its ancestors.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Inherited {
    pub disabled: bool,
    /// `$ref`s met below the nearest ancestor holding an object or array.
    pub refs: Vec<String>,
}

/// A bindable field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldNode {
    /// JSON Pointer of this node in the value.
    pub path: String,
    /// Effective schema the node was built from.
    pub schema: Value,
    /// Schema as handed down by the parent, before normalization.
    #[serde(skip)]
    pub(crate) source: Value,
    /// `$ref`s followed on the way to this node, including its own.
    #[serde(skip)]
    pub(crate) refs: Vec<String>,
    pub required: bool,
    pub disabled: bool,
    pub field_type: SchemaType,
    pub variant: Option<Variant>,
    pub kind: NodeKind,
}

impl FieldNode {
    /// Current value of the subtree. Disabled nodes contribute their value.
    ///
    /// A declared property whose leaf is unset (`null` on a non-null field) is
    /// left out of its container so it reads as absent to `required` and
    /// dependencies. Dynamic properties are always kept.
    pub fn value(&self) -> Value {
        match &self.kind {
            NodeKind::Container(properties) => {
                let map: Map<String, Value> = properties
                    .iter()
                    .filter(|p| p.dynamic || !p.node.is_unset())
                    .map(|p| (p.key.clone(), p.node.value()))
                    .collect();
                Value::Object(map)
            }
            NodeKind::List(items) => Value::Array(items.iter().map(FieldNode::value).collect()),
            NodeKind::Leaf(value) => value.clone(),
        }
    }

    /// True for a `null` leaf whose field type is not `null`.
    pub fn is_unset(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(Value::Null)) && self.field_type != SchemaType::Null
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::List(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn properties(&self) -> Option<&[Property]> {
        match &self.kind {
            NodeKind::Container(properties) => Some(properties),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[FieldNode]> {
        match &self.kind {
            NodeKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Property keys in order.
    pub fn keys(&self) -> Vec<&str> {
        self.properties()
            .map(|props| props.iter().map(|p| p.key.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn child(&self, key: &str) -> Option<&FieldNode> {
        self.properties()?
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.node)
    }

    pub fn item(&self, index: usize) -> Option<&FieldNode> {
        self.items()?.get(index)
    }

    /// Descend by unescaped pointer tokens.
    pub fn find<S: AsRef<str>>(&self, tokens: &[S]) -> Option<&FieldNode> {
        let Some((first, rest)) = tokens.split_first() else {
            return Some(self);
        };
        let next = match &self.kind {
            NodeKind::Container(properties) => properties
                .iter()
                .find(|p| p.key == first.as_ref())
                .map(|p| &p.node)?,
            NodeKind::List(items) => items.get(first.as_ref().parse::<usize>().ok()?)?,
            NodeKind::Leaf(_) => return None,
        };
        next.find(rest)
    }

    pub fn find_mut<S: AsRef<str>>(&mut self, tokens: &[S]) -> Option<&mut FieldNode> {
        let Some((first, rest)) = tokens.split_first() else {
            return Some(self);
        };
        let next = match &mut self.kind {
            NodeKind::Container(properties) => properties
                .iter_mut()
                .find(|p| p.key == first.as_ref())
                .map(|p| &mut p.node)?,
            NodeKind::List(items) => items.get_mut(first.as_ref().parse::<usize>().ok()?)?,
            NodeKind::Leaf(_) => return None,
        };
        next.find_mut(rest)
    }

    /// Look up a descendant by absolute JSON Pointer. A non-empty path
    /// without a leading `/` finds nothing.
    pub fn node(&self, path: &str) -> Option<&FieldNode> {
        self.find(&parse_pointer(path)?)
    }

    /// What the children of this node inherit.
    pub(crate) fn inherited(&self) -> Inherited {
        Inherited {
            disabled: self.disabled,
            refs: self.refs.clone(),
        }
    }

    /// Depth-first, pre-order iteration over the subtree.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }
}

/// Iterator returned by [`FieldNode::iter`].
pub struct Iter<'a> {
    stack: Vec<&'a FieldNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a FieldNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        match &node.kind {
            NodeKind::Container(properties) => {
                self.stack.extend(properties.iter().rev().map(|p| &p.node));
            }
            NodeKind::List(items) => self.stack.extend(items.iter().rev()),
            NodeKind::Leaf(_) => {}
        }
        Some(node)
    }
}
