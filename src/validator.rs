//! Dialect detection and validation of values against schemas.
//!
//! Validation is delegated to the `jsonschema` engine. One set of engine
//! options per draft is built lazily and reused; the schema itself is compiled
//! on every call because it differs per node and per selected variant.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use jsonschema::{Retrieve, Uri, ValidationOptions};
use serde_json::{json, Value};

use crate::error::ValidationError;
use crate::types::Draft;

/// Validation errors grouped by instance path.
pub type ErrorMap = BTreeMap<String, Vec<String>>;

/// Infer the draft a schema is written against.
///
/// `$schema` is matched first, in draft order. Without a recognised
/// `$schema`, `$defs` implies 2020-12 and `definitions` implies draft 7.
pub fn detect_draft(schema: &Value) -> Draft {
    let schema_id = schema.get("$schema").and_then(Value::as_str).unwrap_or("");

    const MARKERS: &[(&str, Draft)] = &[
        ("draft-04", Draft::Draft4),
        ("draft-06", Draft::Draft6),
        ("draft-07", Draft::Draft7),
        ("2019-09", Draft::Draft2019),
        ("2020-12", Draft::Draft2020),
    ];
    if let Some((_, draft)) = MARKERS.iter().find(|(marker, _)| schema_id.contains(marker)) {
        return *draft;
    }

    if schema.get("$defs").is_some() {
        return Draft::Draft2020;
    }
    if schema.get("definitions").is_some() {
        return Draft::Draft7;
    }
    Draft::Draft2020
}

/// Group errors by instance path, keeping message order within a path.
pub fn group_by_path(errors: &[ValidationError]) -> ErrorMap {
    let mut map = ErrorMap::new();
    for error in errors {
        map.entry(error.instance_path.clone())
            .or_default()
            .push(error.message.clone());
    }
    map
}

/// Resolves every remote URI to an empty schema.
///
/// External references are dereferenced before validation; anything still
/// pointing outside the document failed to resolve and is treated as `{}`.
struct EmptySchemaRetriever;

impl Retrieve for EmptySchemaRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(uri = uri.as_str(), "unresolved remote reference validated as {{}}");
        Ok(json!({}))
    }
}

/// Per-draft validator registry.
pub struct SchemaValidator {
    validate_formats: bool,
    options: Mutex<HashMap<Draft, ValidationOptions>>,
}

impl SchemaValidator {
    /// Create a registry that asserts `format`.
    pub fn new() -> Self {
        Self::with_formats(true)
    }

    /// Create a registry, choosing whether `format` is asserted.
    pub fn with_formats(validate_formats: bool) -> Self {
        Self {
            validate_formats,
            options: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `value` against `schema` under its detected draft.
    pub fn validate(&self, schema: &Value, value: &Value) -> Vec<ValidationError> {
        self.validate_with(detect_draft(schema), schema, value)
    }

    /// Validate `value` against `schema` under `draft`.
    ///
    /// A schema the engine cannot compile yields a single root error
    /// describing the failure.
    pub fn validate_with(&self, draft: Draft, schema: &Value, value: &Value) -> Vec<ValidationError> {
        // Held for the whole compile-and-validate call.
        let mut registry = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        let options = registry
            .entry(draft)
            .or_insert_with(|| self.build_options(draft));

        let validator = match options.build(schema) {
            Ok(validator) => validator,
            Err(e) => {
                tracing::warn!(?draft, error = %e, "schema failed to compile");
                return vec![ValidationError {
                    instance_path: String::new(),
                    message: format!("invalid schema: {e}"),
                }];
            }
        };

        validator
            .iter_errors(value)
            .map(|e| ValidationError {
                instance_path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect()
    }

    /// Whether `value` satisfies `schema` under `draft`.
    pub fn is_valid_with(&self, draft: Draft, schema: &Value, value: &Value) -> bool {
        self.validate_with(draft, schema, value).is_empty()
    }

    fn build_options(&self, draft: Draft) -> ValidationOptions {
        tracing::debug!(?draft, "building validator options");
        let mut opts = jsonschema::options();
        opts.with_draft(draft.engine_draft())
            .should_validate_formats(self.validate_formats)
            .with_retriever(EmptySchemaRetriever);
        opts
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("validate_formats", &self.validate_formats)
            .finish_non_exhaustive()
    }
}
