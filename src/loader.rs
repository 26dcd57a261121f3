//! Document loading from files, strings and HTTP URLs.

use std::path::Path;

use serde_json::Value;

use crate::error::SpecError;
use crate::schema::{Schema, SchemaRef};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `SpecError::FileNotFound` if the file doesn't exist,
/// or `SpecError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, SpecError> {
    if !path.exists() {
        return Err(SpecError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| SpecError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_document_str(&content)
}

/// Load a JSON document from a string.
pub fn load_document_str(content: &str) -> Result<Value, SpecError> {
    serde_json::from_str(content).map_err(|source| SpecError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `SpecError::NetworkError` if the request fails, returns an error
/// status, or the body isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, SpecError> {
    let network = |source| SpecError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .and_then(reqwest::blocking::Response::json)
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document from a file path or URL.
pub fn load_document_auto(source: &str) -> Result<Value, SpecError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(SpecError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Navigate a local fragment (`#/components/schemas/Pet`) within `document`.
///
/// Segments are JSON-Pointer unescaped. Returns `None` if any step is missing.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(document);
    }

    path.split('/').try_fold(document, |current, part| {
        let key = part.replace("~1", "/").replace("~0", "~");
        match current {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(&key),
        }
    })
}

/// Interpret a document as a set of named schemas: a top-level object of
/// name to schema, or an OpenAPI document's `components.schemas`.
///
/// Cross-references between them must already be `{Name}` tokens; loaded
/// documents carry no object identity.
///
/// # Errors
///
/// Returns `SpecError::InvalidSchema` if no schema object is found.
pub fn load_named_schemas(document: &Value) -> Result<Vec<(String, SchemaRef)>, SpecError> {
    let schemas = navigate_fragment(document, "#/components/schemas")
        .filter(|_| document.get("openapi").is_some())
        .unwrap_or(document);

    let map = schemas.as_object().ok_or_else(|| SpecError::InvalidSchema {
        message: "expected an object of named schemas".to_string(),
    })?;

    Ok(map
        .iter()
        .map(|(name, schema)| (name.clone(), Schema::from(schema.clone()).shared()))
        .collect())
}
