//! Core types shared by the compiler, endpoints and the call pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SpecError;

/// Key holding a JSON reference.
pub const REF_KEY: &str = "$ref";

/// Key marking a function placeholder inside a compiled schema.
pub const FUNCTION_PLACEHOLDER_KEY: &str = "$function";

/// Keywords whose value maps names to sub-schemas.
pub(crate) const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
];

/// Keywords whose value is a sub-schema or a list of sub-schemas.
pub(crate) const SCHEMA_KEYWORDS: &[&str] = &[
    "items",
    "prefixItems",
    "allOf",
    "anyOf",
    "oneOf",
    "additionalProperties",
    "additionalItems",
    "not",
    "if",
    "then",
    "else",
    "contains",
    "propertyNames",
    "unevaluatedProperties",
    "unevaluatedItems",
];

/// Direct sub-schemas of a schema object, with their pointer suffixes.
/// Everything else (literal data, annotations, unknown keys) is skipped.
pub(crate) fn subschemas(map: &Map<String, Value>) -> Vec<(String, &Value)> {
    let mut found = Vec::new();
    for (key, child) in map {
        if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
            if let Value::Object(children) = child {
                for (name, schema) in children {
                    found.push((format!("{}/{}", key, name), schema));
                }
            }
        } else if SCHEMA_KEYWORDS.contains(&key.as_str()) {
            match child {
                Value::Array(branches) => {
                    for (i, branch) in branches.iter().enumerate() {
                        found.push((format!("{}/{}", key, i), branch));
                    }
                }
                other => found.push((key.clone(), other)),
            }
        }
    }
    found
}

/// Returns the JSON type name for error messages.
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

/// Escape a name for use as a JSON Pointer (RFC 6901) segment.
pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Target vocabulary a source schema is lowered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAPI-compatible schema for the published document.
    Documentation,
    /// JSON Schema (draft 2020-12) consumed by the runtime validator.
    Validation,
}

impl Dialect {
    /// Pointer to the named schema in this dialect.
    pub fn pointer(&self, name: &str) -> String {
        match self {
            Dialect::Documentation => format!("#/components/schemas/{}", escape_pointer(name)),
            Dialect::Validation => format!("#/$defs/{}", escape_pointer(name)),
        }
    }
}

impl FromStr for Dialect {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "documentation" | "doc" | "docs" => Ok(Dialect::Documentation),
            "validation" => Ok(Dialect::Validation),
            other => Err(SpecError::InvalidConfiguration {
                message: format!(
                    "unknown dialect \"{}\": expected documentation or validation",
                    other
                ),
            }),
        }
    }
}

/// Where a parameter is read from on the incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Path,
    Header,
}

impl ParamLocation {
    /// Name used for the `in` field of the documentation parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Path => "path",
            ParamLocation::Header => "header",
        }
    }

    /// Top-level key of the composite request instance holding this location.
    pub fn instance_key(&self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Path => "params",
            ParamLocation::Header => "headers",
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamLocation {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(ParamLocation::Query),
            "path" => Ok(ParamLocation::Path),
            "header" => Ok(ParamLocation::Header),
            other => Err(SpecError::InvalidConfiguration {
                message: format!(
                    "invalid parameter location \"{}\": expected query, path, or header",
                    other
                ),
            }),
        }
    }
}

/// Primitive type a raw parameter string is converted to before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Number,
    Boolean,
}

impl PrimitiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::String => "string",
            PrimitiveType::Number => "number",
            PrimitiveType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimitiveType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(PrimitiveType::String),
            "number" => Ok(PrimitiveType::Number),
            "boolean" | "bool" => Ok(PrimitiveType::Boolean),
            other => Err(SpecError::InvalidConfiguration {
                message: format!(
                    "invalid primitive parameter type \"{}\": expected string, number, or boolean",
                    other
                ),
            }),
        }
    }
}

/// Non-standard keywords the compiler lowers per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorKeyword {
    /// Wraps a schema (or flags the current one) as accepting `null`.
    Nullable,
    /// Runtime callables checked by the custom keyword extension.
    CustomValidator,
    /// Sub-schemas keyed by property-name pattern.
    PatternProperties,
    /// Property dependencies (draft-07 form).
    Dependencies,
    /// Single allowed value.
    Const,
}

impl VendorKeyword {
    /// Application order during lowering. `Nullable` runs first so the
    /// keywords it wraps are lowered inside the new branch.
    pub const ALL: [VendorKeyword; 5] = [
        VendorKeyword::Nullable,
        VendorKeyword::CustomValidator,
        VendorKeyword::PatternProperties,
        VendorKeyword::Dependencies,
        VendorKeyword::Const,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            VendorKeyword::Nullable => "x-nullable",
            VendorKeyword::CustomValidator => "x-validator",
            VendorKeyword::PatternProperties => "patternProperties",
            VendorKeyword::Dependencies => "dependencies",
            VendorKeyword::Const => "const",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}
