//! Core types: drafts, schema type tags and session options.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Keywords whose value is a single subschema.
pub const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "additionalItems",
    "unevaluatedProperties",
    "unevaluatedItems",
    "contains",
    "propertyNames",
    "not",
    "if",
    "then",
    "else",
];

/// Keywords whose value is an array of subschemas.
pub const SCHEMA_LIST_KEYWORDS: &[&str] = &["prefixItems", "allOf", "anyOf", "oneOf"];

/// Keywords whose value maps names to subschemas.
pub const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "dependentSchemas",
    "dependencies",
];

/// Keywords holding reusable definitions.
pub const DEFINITION_KEYWORDS: &[&str] = &["$defs", "definitions"];

/// Returns the JSON type name for log and error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON Schema dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Draft {
    Draft4,
    Draft6,
    Draft7,
    Draft2019,
    Draft2020,
}

impl Draft {
    /// The matching dialect of the validation engine.
    pub fn engine_draft(&self) -> jsonschema::Draft {
        match self {
            Draft::Draft4 => jsonschema::Draft::Draft4,
            Draft::Draft6 => jsonschema::Draft::Draft6,
            Draft::Draft7 => jsonschema::Draft::Draft7,
            Draft::Draft2019 => jsonschema::Draft::Draft201909,
            Draft::Draft2020 => jsonschema::Draft::Draft202012,
        }
    }
}

/// The type a field is edited as.
///
/// `Enum` wins over any declared `type`: an enumerated field is always a
/// choice among fixed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Enum,
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    /// Parse a `type` keyword entry. Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(SchemaType::String),
            "number" => Some(SchemaType::Number),
            "integer" => Some(SchemaType::Integer),
            "boolean" => Some(SchemaType::Boolean),
            "object" => Some(SchemaType::Object),
            "array" => Some(SchemaType::Array),
            "null" => Some(SchemaType::Null),
            _ => None,
        }
    }
}

/// Options for a form session.
#[derive(Debug, Clone)]
pub struct FormOptions {
    /// Base for relative external `$ref`s. Falls back to the root `$id`.
    pub base_uri: Option<Url>,
    /// Whether `format` is asserted during validation. Defaults to true.
    pub validate_formats: bool,
}

impl FormOptions {
    /// Create options with no base URI and format assertion enabled.
    pub fn new() -> Self {
        Self {
            base_uri: None,
            validate_formats: true,
        }
    }

    /// Set the base URI used for relative external references.
    pub fn base_uri(mut self, base_uri: Url) -> Self {
        self.base_uri = Some(base_uri);
        self
    }

    /// Enable or disable `format` assertion.
    pub fn validate_formats(mut self, validate_formats: bool) -> Self {
        self.validate_formats = validate_formats;
        self
    }
}

impl Default for FormOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_type_parse_valid() {
        assert_eq!(SchemaType::parse("object"), Some(SchemaType::Object));
        assert_eq!(SchemaType::parse("integer"), Some(SchemaType::Integer));
        assert_eq!(SchemaType::parse("null"), Some(SchemaType::Null));
    }

    #[test]
    fn schema_type_parse_invalid() {
        assert_eq!(SchemaType::parse("enum"), None);
        assert_eq!(SchemaType::parse("Object"), None);
        assert_eq!(SchemaType::parse(""), None);
    }

    #[test]
    fn draft_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Draft::Draft2019).unwrap(),
            serde_json::json!("draft2019")
        );
    }

    #[test]
    fn form_options_builder() {
        let base = Url::parse("https://example.com/schemas/").unwrap();
        let opts = FormOptions::new()
            .base_uri(base.clone())
            .validate_formats(false);
        assert_eq!(opts.base_uri, Some(base));
        assert!(!opts.validate_formats);
        assert!(FormOptions::default().validate_formats);
    }
}
