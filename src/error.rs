//! Error types for schema fetching, validation results and field mutations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while fetching an external schema document.
///
/// These never escape reference resolution: the resolver logs them and
/// leaves the referencing `$ref` in place.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported URL scheme for {url}")]
    UnsupportedScheme { url: String },

    #[error("no document registered for {url}")]
    NotFound { url: String },
}

/// Single validation error bound to a location in the value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationError {
    /// JSON Pointer (RFC 6901) into the value; empty for the root.
    pub instance_path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.instance_path, self.message)
    }
}

/// A mutation the engine declined. The tree is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("no field at {path}")]
    NodeNotFound { path: String },

    #[error("{path} is not an array field")]
    NotAList { path: String },

    #[error("{path} is not an object field")]
    NotAContainer { path: String },

    #[error("{path} is read-only")]
    ReadOnly { path: String },

    #[error("schema does not allow an item at index {index} of {path}")]
    ItemNotAllowed { path: String, index: usize },

    #[error("index {index} is out of bounds for {path} (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("property name is required")]
    EmptyPropertyName,

    #[error("property \"{key}\" already exists")]
    PropertyExists { key: String },

    #[error("property name \"{key}\" does not match schema constraints")]
    InvalidPropertyName { key: String },

    #[error("property \"{key}\" is not allowed by the schema")]
    PropertyNotAllowed { key: String },

    #[error("property \"{key}\" is declared by the schema and cannot be removed")]
    DeclaredProperty { key: String },

    #[error("no property \"{key}\" in {path}")]
    PropertyNotFound { path: String, key: String },

    #[error("{path} has no oneOf choice")]
    NotOneOf { path: String },

    #[error("{path} has no anyOf choice")]
    NotAnyOf { path: String },

    #[error("variant {index} is out of range for {path} ({count} branches)")]
    VariantOutOfRange {
        path: String,
        index: usize,
        count: usize,
    },
}

impl MutationError {
    /// Reason string suitable for showing next to the control that issued the mutation.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
