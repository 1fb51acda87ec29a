//! Schema Form
//!
//! Turns a JSON Schema document (drafts 4, 6, 7, 2019-09, 2020-12) and an
//! optional value into a tree of bindable fields with live validation.
//!
//! The pipeline runs in dependency order:
//!
//! 1. [`resolve_refs`] expands internal and external `$ref`s once per session.
//! 2. [`Normalizer`] computes each node's effective schema from its current
//!    value: `allOf` folding, `if`/`then`/`else`, dependencies and the
//!    selected `oneOf`/`anyOf` variant.
//! 3. [`ModelBuilder`] synthesizes [`FieldNode`]s from effective schemas.
//! 4. [`FormEngine`] owns the tree, applies edits, rebuilds subtrees whose
//!    schema changed shape and revalidates with [`SchemaValidator`].
//!
//! # Example
//!
//! ```
//! use schema_form::{FormEngine, FormOptions};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "name": { "type": "string" },
//!         "delivery": { "enum": ["ship", "pickup"] }
//!     },
//!     "required": ["name"],
//!     "if": { "properties": { "delivery": { "const": "ship" } } },
//!     "then": {
//!         "properties": { "address": { "type": "string" } },
//!         "required": ["address"]
//!     }
//! });
//!
//! let mut form = FormEngine::from_resolved(schema, None, &FormOptions::new());
//!
//! // The first enum entry is the initial value, so the `then` branch applies
//! assert!(form.node("/address").is_some());
//! assert!(!form.is_valid());
//!
//! form.set_value("/delivery", json!("pickup")).unwrap();
//! assert!(form.node("/address").is_none());
//!
//! form.set_value("/name", json!("Ada")).unwrap();
//! assert!(form.is_valid());
//! assert_eq!(form.value(), json!({ "name": "Ada", "delivery": "pickup" }));
//! ```
//!
//! # Node kinds
//!
//! | Effective type | Node kind | Children |
//! |----------------|-----------|----------|
//! | `object` | [`NodeKind::Container`] | declared properties, then dynamic keys |
//! | `array` | [`NodeKind::List`] | tuple slots, then homogeneous slots |
//! | anything else | [`NodeKind::Leaf`] | none |
//!
//! A node whose schema offers `oneOf`/`anyOf` branches carries a
//! [`Variant`] selector; its kind is the shape of the active branch.

mod builder;
mod engine;
mod error;
mod loader;
mod model;
mod normalize;
mod pointer;
mod resolver;
mod types;
mod validator;

pub use builder::{dynamic_schema, initial_value, resolve_type, slot_schema, ModelBuilder};
pub use engine::FormEngine;
pub use error::{FetchError, MutationError, ValidationError};
pub use loader::{load_schema, load_schema_str, Fetch, NoFetch, StaticFetcher, UrlFetcher};
pub use model::{FieldNode, Iter, NodeKind, Property, Selection, Selections, Variant};
pub use normalize::{branch_label, merge_all, merge_schemas, subschema, Normalizer};
pub use pointer::{child_path, escape_token, format_pointer, parse_pointer, unescape_token};
pub use resolver::resolve_refs;
pub use types::{json_type_name, Draft, FormOptions, SchemaType};
pub use validator::{detect_draft, group_by_path, ErrorMap, SchemaValidator};

/// Resolve a JSON Pointer (optionally `#`-prefixed) against a document.
pub use pointer::resolve as resolve_pointer;
