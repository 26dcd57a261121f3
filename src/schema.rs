//! Authoring model for schemas.
//!
//! A [`Schema`] is an owned JSON-like tree that can additionally hold
//! identity links to other schemas ([`Schema::Link`]) and inline custom
//! validator functions ([`Schema::Function`]). Plain JSON converts with
//! `Schema::from(value)`.

use std::panic::RefUnwindSafe;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::keyword::{AsyncValidator, CheckContext, CustomValidation, ValidatorFn};
use crate::registry::token;
use crate::types::{VendorKeyword, REF_KEY};

/// Shared handle to a named schema. Identity is the allocation, not the content.
pub type SchemaRef = Arc<Schema>;

/// A schema as authored, before compilation into a dialect.
#[derive(Debug, Clone)]
pub enum Schema {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Schema>),
    Object(IndexMap<String, Schema>),
    /// Identity reference to another registered schema.
    Link(SchemaRef),
    /// Inline custom validator.
    Function(ValidatorFn),
}

impl Schema {
    /// Empty object schema.
    pub fn object() -> Self {
        Schema::Object(IndexMap::new())
    }

    /// Reference node pointing at `target` by identity.
    pub fn reference(target: &SchemaRef) -> Self {
        Schema::object().with(REF_KEY, Schema::Link(Arc::clone(target)))
    }

    /// Reference node using a pre-resolved `{Name}` token.
    pub fn token(name: &str) -> Self {
        Schema::object().with(REF_KEY, Schema::String(token(name)))
    }

    /// Wrap `inner` so that `null` is also accepted.
    pub fn nullable(inner: impl Into<Schema>) -> Self {
        Schema::object().with(VendorKeyword::Nullable.key(), inner)
    }

    /// Inline custom validator function.
    pub fn validator<F>(f: F) -> Self
    where
        F: Fn(&mut CustomValidation, &CheckContext<'_>) -> Option<String>
            + Send
            + Sync
            + RefUnwindSafe
            + 'static,
    {
        Schema::Function(ValidatorFn::new(f))
    }

    /// Inline custom validator that awaits.
    pub fn async_validator<V>(validator: V) -> Self
    where
        V: AsyncValidator + RefUnwindSafe + 'static,
    {
        Schema::Function(ValidatorFn::from_async(validator))
    }

    /// Set `key` on an object schema. A non-object schema is replaced by an
    /// object holding only `key`.
    pub fn with(self, key: impl Into<String>, value: impl Into<Schema>) -> Self {
        let mut map = match self {
            Schema::Object(map) => map,
            _ => IndexMap::new(),
        };
        map.insert(key.into(), value.into());
        Schema::Object(map)
    }

    pub fn get(&self, key: &str) -> Option<&Schema> {
        match self {
            Schema::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Schema>> {
        match self {
            Schema::Object(map) => Some(map),
            _ => None,
        }
    }

    /// True for `{"$ref": ...}` nodes and bare links.
    pub fn is_reference(&self) -> bool {
        match self {
            Schema::Link(_) => true,
            Schema::Object(map) => map.contains_key(REF_KEY),
            _ => false,
        }
    }

    /// Move into a shared handle so other schemas can link to it.
    pub fn shared(self) -> SchemaRef {
        Arc::new(self)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Schema::Null, Schema::Null) => true,
            (Schema::Bool(a), Schema::Bool(b)) => a == b,
            (Schema::Number(a), Schema::Number(b)) => a == b,
            (Schema::String(a), Schema::String(b)) => a == b,
            (Schema::Array(a), Schema::Array(b)) => a == b,
            (Schema::Object(a), Schema::Object(b)) => a == b,
            // Identity, not structure.
            (Schema::Link(a), Schema::Link(b)) => Arc::ptr_eq(a, b),
            (Schema::Function(a), Schema::Function(b)) => a.same(b),
            _ => false,
        }
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Schema::Null,
            Value::Bool(b) => Schema::Bool(b),
            Value::Number(n) => Schema::Number(n),
            Value::String(s) => Schema::String(s),
            Value::Array(arr) => Schema::Array(arr.into_iter().map(Schema::from).collect()),
            Value::Object(map) => Schema::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Schema::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&SchemaRef> for Schema {
    fn from(target: &SchemaRef) -> Self {
        Schema::reference(target)
    }
}

impl From<ValidatorFn> for Schema {
    fn from(f: ValidatorFn) -> Self {
        Schema::Function(f)
    }
}

impl From<&str> for Schema {
    fn from(s: &str) -> Self {
        Schema::String(s.to_string())
    }
}

impl From<String> for Schema {
    fn from(s: String) -> Self {
        Schema::String(s)
    }
}

impl From<bool> for Schema {
    fn from(b: bool) -> Self {
        Schema::Bool(b)
    }
}

impl From<Vec<Schema>> for Schema {
    fn from(items: Vec<Schema>) -> Self {
        Schema::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_preserves_structure() {
        let schema = Schema::from(json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        }));
        let props = schema.get("properties").unwrap();
        assert!(props.get("id").is_some());
        assert_eq!(schema.get("type"), Some(&Schema::from("object")));
    }

    #[test]
    fn links_compare_by_identity() {
        let a = Schema::from(json!({ "type": "string" })).shared();
        let b = Schema::from(json!({ "type": "string" })).shared();
        assert_eq!(*a, *b);
        assert_eq!(Schema::reference(&a), Schema::reference(&a));
        assert_ne!(Schema::reference(&a), Schema::reference(&b));
    }

    #[test]
    fn builders_produce_vendor_nodes() {
        let inner = Schema::from(json!({ "type": "string" }));
        let wrapped = Schema::nullable(inner.clone());
        assert_eq!(wrapped.get("x-nullable"), Some(&inner));

        let tokenized = Schema::token("Pet");
        assert_eq!(tokenized.get("$ref"), Some(&Schema::from("{Pet}")));
        assert!(tokenized.is_reference());
    }

    #[test]
    fn with_replaces_non_object() {
        let schema = Schema::from("oops").with("type", "string");
        assert_eq!(schema.as_object().unwrap().len(), 1);
    }
}
