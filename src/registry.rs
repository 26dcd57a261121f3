//! Reference registry: maps schema object identities to symbolic names.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::SpecError;
use crate::schema::{Schema, SchemaRef};

/// Symbolic token for a named schema (`Pet` -> `{Pet}`).
pub fn token(name: &str) -> String {
    format!("{{{}}}", name)
}

/// Extract the name from a `{Name}` token.
///
/// Returns `None` for anything that is not a single, non-empty token.
pub fn parse_token(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}']) {
        None
    } else {
        Some(inner)
    }
}

fn identity(schema: &SchemaRef) -> usize {
    Arc::as_ptr(schema) as *const () as usize
}

/// Identity-based name lookup for every top-level named schema.
///
/// Populated once while the owning specification is built, read-only
/// afterwards. Holds a handle to each schema so identities stay valid.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    by_identity: HashMap<usize, String>,
    schemas: IndexMap<String, SchemaRef>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidConfiguration` if the name is taken or the
    /// same schema object is already registered under another name.
    pub fn register(&mut self, name: impl Into<String>, schema: &SchemaRef) -> Result<(), SpecError> {
        let name = name.into();
        if self.schemas.contains_key(&name) {
            return Err(SpecError::InvalidConfiguration {
                message: format!("schema name \"{}\" registered twice", name),
            });
        }
        if let Some(existing) = self.by_identity.get(&identity(schema)) {
            return Err(SpecError::InvalidConfiguration {
                message: format!(
                    "schema \"{}\" is the same object as already registered \"{}\"",
                    name, existing
                ),
            });
        }
        self.by_identity.insert(identity(schema), name.clone());
        self.schemas.insert(name, Arc::clone(schema));
        Ok(())
    }

    /// Name registered for this schema object, if any.
    pub fn name_of(&self, schema: &SchemaRef) -> Option<&str> {
        self.by_identity.get(&identity(schema)).map(String::as_str)
    }

    /// Resolve a schema object to its `{Name}` token.
    ///
    /// `context` describes where the reference was found and is only used
    /// in the error.
    pub fn resolve(&self, schema: &SchemaRef, context: &str) -> Result<String, SpecError> {
        self.name_of(schema)
            .map(token)
            .ok_or_else(|| SpecError::UnresolvedReference {
                path: describe(schema, context),
            })
    }

    pub fn get(&self, name: &str) -> Option<&SchemaRef> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Registered schemas in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaRef)> {
        self.schemas.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn describe(schema: &Schema, context: &str) -> String {
    let context = if context.is_empty() { "/" } else { context };
    match schema.get("title") {
        Some(Schema::String(title)) => format!("{} (schema titled \"{}\")", context, title),
        _ => context.to_string(),
    }
}
