//! Error types for specification assembly and per-call validation.

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

use crate::types::{ParamLocation, PrimitiveType};

/// Errors raised while assembling a specification.
///
/// All of these are fatal: a specification that fails to build is never
/// partially published.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unresolved schema reference at {path}: schema object was never registered")]
    UnresolvedReference { path: String },

    #[error("duplicate operation identifier \"{operation_id}\"")]
    DuplicateOperation { operation_id: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    // IO errors (exit code 3)
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
}

impl SpecError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpecError::FileNotFound { .. } | SpecError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            SpecError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Single validation error with path context.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// An instance failed structural or custom-keyword validation.
#[derive(Debug, Clone, Error)]
#[error("validation failed with {} error(s)", errors.len())]
pub struct JsonValidationError {
    /// The instance that was checked.
    pub instance: Value,
    pub errors: Vec<SchemaError>,
}

impl JsonValidationError {
    pub fn new(instance: Value, errors: Vec<SchemaError>) -> Self {
        Self { instance, errors }
    }

    /// Individual messages, one per sub-error.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Body sent to the client for a rejected request.
    pub fn to_body(&self) -> Value {
        json!({
            "message": self.to_string(),
            "errors": self.errors,
        })
    }
}

/// A raw parameter string could not be converted to its declared type.
#[derive(Debug, Clone, Error)]
#[error("{location} parameter \"{name}\": cannot convert {value:?} to {expected}")]
pub struct ParameterTypeError {
    pub location: ParamLocation,
    pub name: String,
    pub value: String,
    pub expected: PrimitiveType,
}

impl ParameterTypeError {
    /// JSON Pointer of the parameter inside the composite request instance.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.location.instance_key(), self.name)
    }

    /// Re-express the conversion failure as a request validation error.
    pub fn into_validation_error(self) -> JsonValidationError {
        let error = SchemaError {
            path: self.path(),
            message: self.to_string(),
        };
        JsonValidationError::new(Value::String(self.value), vec![error])
    }
}

/// Failure observed while running one call through the pipeline.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    ParameterType(#[from] ParameterTypeError),

    #[error("request {0}")]
    Request(JsonValidationError),

    #[error("response {0}")]
    Response(JsonValidationError),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl CallError {
    /// True for faults that map to a 500 outcome.
    pub fn is_internal(&self) -> bool {
        matches!(self, CallError::Internal(_))
    }
}
