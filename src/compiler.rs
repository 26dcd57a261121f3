//! Schema compilation into the documentation and validation dialects.
//!
//! Compilation works on an independent copy of the source schema:
//!
//! 1. The source tree is detached into plain JSON. Identity links are
//!    resolved to `{Name}` tokens through the registry, and inline functions
//!    are moved into a [`FunctionTable`], leaving `{"$function": id}`
//!    placeholders in their place.
//! 2. Reference nodes are rewritten to the dialect's pointer syntax. The
//!    walk never descends past a reference.
//! 3. Vendor keywords are lowered, one handler per [`VendorKeyword`].

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::SpecError;
use crate::keyword::ValidatorFn;
use crate::registry::{parse_token, ReferenceRegistry};
use crate::schema::Schema;
use crate::types::{
    Dialect, VendorKeyword, FUNCTION_PLACEHOLDER_KEY, REF_KEY, SCHEMA_KEYWORDS, SCHEMA_MAP_KEYWORDS,
};

/// Side table of functions detached from a schema, keyed by placeholder id.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable(BTreeMap<String, ValidatorFn>);

impl FunctionTable {
    /// Store `f` and return its placeholder id.
    pub fn insert(&mut self, f: &ValidatorFn) -> String {
        let id = f.id();
        self.0.entry(id.clone()).or_insert_with(|| f.clone());
        id
    }

    pub fn get(&self, id: &str) -> Option<&ValidatorFn> {
        self.0.get(id)
    }

    /// Add every function from `other`.
    pub fn extend(&mut self, other: &FunctionTable) {
        for (id, f) in &other.0 {
            self.0.entry(id.clone()).or_insert_with(|| f.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Placeholder id if `value` is a function placeholder.
pub(crate) fn placeholder_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => {
            map.get(FUNCTION_PLACEHOLDER_KEY).and_then(Value::as_str)
        }
        _ => None,
    }
}

/// A schema lowered into one dialect.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub value: Value,
    /// Functions referenced by placeholders in `value`. Always empty for the
    /// documentation dialect.
    pub functions: FunctionTable,
}

/// Both dialect forms of one source schema.
#[derive(Debug, Clone)]
pub struct CompiledPair {
    pub documentation: Value,
    pub validation: CompiledSchema,
}

/// Compile a schema into `dialect`.
///
/// The source is never modified; the result shares nothing with it.
///
/// # Errors
///
/// Returns `SpecError::UnresolvedReference` if the schema links to an
/// object missing from `registry`.
pub fn compile(
    schema: &Schema,
    dialect: Dialect,
    registry: &ReferenceRegistry,
) -> Result<CompiledSchema, SpecError> {
    let mut functions = FunctionTable::default();
    let mut value = detach(schema, registry, "", &mut functions)?;

    rewrite_refs(&mut value, dialect);
    lower(&mut value, dialect);

    if dialect == Dialect::Documentation {
        strip_functions(&mut value);
        functions = FunctionTable::default();
    }

    debug!(?dialect, functions = functions.len(), "compiled schema");
    Ok(CompiledSchema { value, functions })
}

/// Compile a schema into both dialects.
pub fn compile_pair(schema: &Schema, registry: &ReferenceRegistry) -> Result<CompiledPair, SpecError> {
    let documentation = compile(schema, Dialect::Documentation, registry)?.value;
    let validation = compile(schema, Dialect::Validation, registry)?;
    Ok(CompiledPair {
        documentation,
        validation,
    })
}

// --- Step 1: detach ---

fn detach(
    schema: &Schema,
    registry: &ReferenceRegistry,
    path: &str,
    functions: &mut FunctionTable,
) -> Result<Value, SpecError> {
    match schema {
        Schema::Null => Ok(Value::Null),
        Schema::Bool(b) => Ok(Value::Bool(*b)),
        Schema::Number(n) => Ok(Value::Number(n.clone())),
        Schema::String(s) => Ok(Value::String(s.clone())),
        Schema::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}/{}", path, i);
                result.push(detach(item, registry, &item_path, functions)?);
            }
            Ok(Value::Array(result))
        }
        Schema::Object(map) => {
            let mut result = Map::new();
            for (key, value) in map {
                let child_path = format!("{}/{}", path, key);
                let detached = match (key.as_str(), value) {
                    // Reference boundary: resolve the link, never walk into it.
                    (REF_KEY, Schema::Link(target)) => {
                        Value::String(registry.resolve(target, path)?)
                    }
                    _ => detach(value, registry, &child_path, functions)?,
                };
                result.insert(key.clone(), detached);
            }
            Ok(Value::Object(result))
        }
        Schema::Link(target) => Ok(json!({ REF_KEY: registry.resolve(target, path)? })),
        Schema::Function(f) => Ok(json!({ FUNCTION_PLACEHOLDER_KEY: functions.insert(f) })),
    }
}

// --- Step 2: reference rewriting ---

fn rewrite_refs(value: &mut Value, dialect: Dialect) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut(REF_KEY) {
                let pointer = parse_token(reference).map(|name| dialect.pointer(name));
                if let Some(pointer) = pointer {
                    *reference = pointer;
                }
                return;
            }
            for child in map.values_mut() {
                rewrite_refs(child, dialect);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, dialect);
            }
        }
        _ => {}
    }
}

// --- Step 3: keyword lowering ---

fn lower(value: &mut Value, dialect: Dialect) {
    let Value::Object(map) = value else {
        return;
    };

    for keyword in VendorKeyword::ALL {
        if map.contains_key(keyword.key()) {
            lower_keyword(keyword, map, dialect);
        }
    }

    for (key, child) in map.iter_mut() {
        if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
            if let Value::Object(children) = child {
                for schema in children.values_mut() {
                    lower(schema, dialect);
                }
            }
        } else if SCHEMA_KEYWORDS.contains(&key.as_str()) {
            match child {
                Value::Array(branches) => {
                    for branch in branches {
                        lower(branch, dialect);
                    }
                }
                other => lower(other, dialect),
            }
        }
        // Literal data and annotations are left alone.
    }
}

fn lower_keyword(keyword: VendorKeyword, map: &mut Map<String, Value>, dialect: Dialect) {
    match keyword {
        VendorKeyword::Nullable => lower_nullable(map, dialect),
        VendorKeyword::CustomValidator => {
            if dialect == Dialect::Documentation {
                map.shift_remove(keyword.key());
            }
        }
        VendorKeyword::PatternProperties => {
            if dialect == Dialect::Documentation {
                flatten_pattern_properties(map);
            }
        }
        VendorKeyword::Dependencies => match dialect {
            Dialect::Documentation => {
                map.shift_remove(keyword.key());
            }
            Dialect::Validation => split_dependencies(map),
        },
        VendorKeyword::Const => {
            if dialect == Dialect::Documentation {
                if let Some(value) = map.shift_remove(keyword.key()) {
                    map.insert("enum".to_string(), Value::Array(vec![value]));
                }
            }
        }
    }
}

/// `x-nullable: <schema>` wraps `<schema>`; `x-nullable: true` wraps the
/// node's remaining keywords.
fn lower_nullable(map: &mut Map<String, Value>, dialect: Dialect) {
    let Some(marker) = map.shift_remove(VendorKeyword::Nullable.key()) else {
        return;
    };
    let wrapped = match marker {
        Value::Bool(false) => return,
        Value::Bool(true) => None,
        other => Some(other),
    };

    match dialect {
        Dialect::Documentation => {
            // `$ref` siblings are ignored by OpenAPI 3.0, so the flag form
            // moves the node under `allOf` too.
            let inner = match wrapped {
                Some(inner) => inner,
                None => Value::Object(std::mem::take(map)),
            };
            let inner_description = inner
                .get("description")
                .and_then(Value::as_str)
                .map(String::from);
            match map.get_mut("allOf") {
                Some(Value::Array(all)) => all.push(inner),
                _ => {
                    map.insert("allOf".to_string(), Value::Array(vec![inner]));
                }
            }
            map.insert("nullable".to_string(), Value::Bool(true));

            let description = map
                .get("description")
                .and_then(Value::as_str)
                .map(String::from)
                .or(inner_description);
            let marked = match description {
                Some(text) if !text.is_empty() => format!("{} (nullable)", text),
                _ => "(nullable)".to_string(),
            };
            map.insert("description".to_string(), Value::String(marked));
        }
        Dialect::Validation => {
            let inner = match wrapped {
                Some(inner) => inner,
                None => Value::Object(std::mem::take(map)),
            };
            add_composite(map, "anyOf", json!([inner, { "type": "null" }]));
        }
    }
}

/// Insert `key: branches`, moving it under `allOf` if `key` is taken.
fn add_composite(map: &mut Map<String, Value>, key: &str, branches: Value) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), branches);
        return;
    }
    let mut constraint = Map::new();
    constraint.insert(key.to_string(), branches);
    match map.get_mut("allOf") {
        Some(Value::Array(all)) => all.push(Value::Object(constraint)),
        _ => {
            map.insert("allOf".to_string(), json!([constraint]));
        }
    }
}

fn flatten_pattern_properties(map: &mut Map<String, Value>) {
    let Some(Value::Object(patterns)) = map.shift_remove(VendorKeyword::PatternProperties.key())
    else {
        return;
    };
    let properties = map
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(properties) = properties {
        for (pattern, schema) in patterns {
            // Explicitly named properties win over pattern entries.
            properties.entry(pattern).or_insert(schema);
        }
    }
}

/// Draft-07 `dependencies` into `dependentRequired` / `dependentSchemas`.
fn split_dependencies(map: &mut Map<String, Value>) {
    let Some(Value::Object(dependencies)) = map.shift_remove(VendorKeyword::Dependencies.key())
    else {
        return;
    };
    let mut required = Map::new();
    let mut schemas = Map::new();
    for (property, dependency) in dependencies {
        match dependency {
            Value::Array(_) => {
                required.insert(property, dependency);
            }
            other => {
                schemas.insert(property, other);
            }
        }
    }
    merge_entries(map, "dependentRequired", required);
    merge_entries(map, "dependentSchemas", schemas);
}

fn merge_entries(map: &mut Map<String, Value>, key: &str, entries: Map<String, Value>) {
    if entries.is_empty() {
        return;
    }
    let target = map
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(target) = target {
        for (k, v) in entries {
            target.entry(k).or_insert(v);
        }
    }
}

fn strip_functions(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| placeholder_id(v).is_none());
            for child in map.values_mut() {
                strip_functions(child);
            }
        }
        Value::Array(items) => {
            items.retain(|v| placeholder_id(v).is_none());
            for item in items {
                strip_functions(item);
            }
        }
        _ => {}
    }
}
