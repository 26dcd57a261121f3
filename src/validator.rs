//! Runtime validation against compiled validation-dialect schemas.

use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::error::ValidationErrorKind;
use jsonschema::Draft;
use serde_json::{json, Map, Value};

use crate::compiler::{CompiledSchema, FunctionTable};
use crate::error::{JsonValidationError, SchemaError, SpecError};
use crate::keyword::{
    check_references, collect_deferred, decode_messages, CustomValidatorKeyword, NamedValidators,
};
use crate::types::VendorKeyword;

/// Per-validation settings.
#[derive(Debug, Clone, Default)]
pub struct ValidatorOptions {
    /// When true, sets `additionalProperties: false` on all object schemas
    /// to reject unknown fields.
    pub strict: bool,
    /// Passed to custom validators as `CheckContext::options`.
    pub context: Value,
}

impl ValidatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strict mode (additionalProperties: false on all objects).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Supplies validator options for each call.
#[async_trait]
pub trait OptionsProvider: Send + Sync {
    async fn options(&self) -> ValidatorOptions;
}

/// Everything shared by the validators of one specification: the
/// validation-dialect component schemas and the functions they use.
#[derive(Debug, Default)]
pub struct ValidationEnv {
    definitions: Map<String, Value>,
    functions: FunctionTable,
    named: Arc<NamedValidators>,
}

impl ValidationEnv {
    pub fn new(named: NamedValidators) -> Self {
        Self {
            definitions: Map::new(),
            functions: FunctionTable::default(),
            named: Arc::new(named),
        }
    }

    /// Add a named component schema, compiled into the validation dialect.
    pub fn add_definition(&mut self, name: impl Into<String>, schema: CompiledSchema) {
        self.functions.extend(&schema.functions);
        self.definitions.insert(name.into(), schema.value);
    }

    pub fn definitions(&self) -> &Map<String, Value> {
        &self.definitions
    }

    pub fn named(&self) -> &NamedValidators {
        &self.named
    }
}

/// A built validator for one compiled schema.
pub struct SchemaValidator {
    inner: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Build a validator for `schema` with the component definitions of `env`
    /// and the `x-validator` keyword installed.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidConfiguration` for malformed `x-validator`
    /// values and `SpecError::InvalidSchema` if the validator rejects the schema.
    pub fn build(
        schema: &CompiledSchema,
        env: &ValidationEnv,
        options: &ValidatorOptions,
    ) -> Result<Self, SpecError> {
        let mut root = json!({
            "$defs": env.definitions,
            "allOf": [schema.value],
        });
        if options.strict {
            close_additional_properties(&mut root);
        }

        let mut functions = env.functions.clone();
        functions.extend(&schema.functions);
        check_references(&root, &functions)?;

        let functions = Arc::new(functions);
        let named = Arc::clone(&env.named);
        let context = Arc::new(options.context.clone());

        let inner = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .with_keyword(
                VendorKeyword::CustomValidator.key(),
                move |parent, value, path| {
                    CustomValidatorKeyword::compile(parent, value, path, &functions, &named, &context)
                },
            )
            .build(&root)
            .map_err(|e| SpecError::InvalidSchema {
                message: e.to_string(),
            })?;

        Ok(Self { inner })
    }

    /// Validate an instance, collecting every error.
    ///
    /// Asynchronous custom validators cannot run here; each one reached is
    /// reported as an error. Use [`SchemaValidator::validate_async`] when the
    /// schema may contain them.
    ///
    /// # Errors
    ///
    /// Returns `JsonValidationError` carrying the instance and one
    /// `SchemaError` per failure.
    pub fn validate(&self, instance: &Value) -> Result<(), JsonValidationError> {
        let (mut errors, deferred) = collect_deferred(|| self.collect_errors(instance));
        for check in deferred {
            errors.push(SchemaError {
                path: check.location().to_string(),
                message: "asynchronous custom validator requires asynchronous validation"
                    .to_string(),
            });
        }
        Self::outcome(instance, errors)
    }

    /// Validate an instance, awaiting asynchronous custom validators.
    ///
    /// The synchronous pass runs first; asynchronous validators reached on
    /// its error-reporting path are then awaited in order and their messages
    /// appended. Validators only reachable through `anyOf`, `oneOf` or `not`
    /// branches are evaluated as booleans by the synchronous pass and are not
    /// awaited.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaValidator::validate`].
    pub async fn validate_async(&self, instance: &Value) -> Result<(), JsonValidationError> {
        let (mut errors, deferred) = collect_deferred(|| self.collect_errors(instance));
        for check in &deferred {
            for message in check.run().await {
                errors.push(SchemaError {
                    path: check.location().to_string(),
                    message,
                });
            }
        }
        Self::outcome(instance, errors)
    }

    fn collect_errors(&self, instance: &Value) -> Vec<SchemaError> {
        self.inner
            .iter_errors(instance)
            .flat_map(|e| {
                let path = e.instance_path.to_string();
                let messages = match &e.kind {
                    ValidationErrorKind::Custom { message } => decode_messages(message),
                    _ => vec![e.to_string()],
                };
                messages
                    .into_iter()
                    .map(move |message| SchemaError {
                        path: path.clone(),
                        message,
                    })
            })
            .collect()
    }

    fn outcome(instance: &Value, errors: Vec<SchemaError>) -> Result<(), JsonValidationError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(JsonValidationError::new(instance.clone(), errors))
        }
    }

    /// Boolean check. Asynchronous custom validators are not consulted.
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.inner.is_valid(instance)
    }
}

/// Recursively set `additionalProperties: false` on all object schemas.
///
/// Only sets the value if `additionalProperties` is missing or explicitly `true`.
/// A custom schema (object) is left untouched.
pub fn close_additional_properties(value: &mut Value) {
    if let Value::Object(map) = value {
        let is_object_schema = map
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t == "object")
            .unwrap_or(false)
            || map.contains_key("properties");

        if is_object_schema {
            match map.get("additionalProperties") {
                None | Some(Value::Bool(true)) => {
                    map.insert("additionalProperties".to_string(), Value::Bool(false));
                }
                _ => {}
            }
        }

        for (key, child) in map.iter_mut() {
            match key.as_str() {
                "properties" | "$defs" | "definitions" | "patternProperties" => {
                    if let Value::Object(children) = child {
                        for schema in children.values_mut() {
                            close_additional_properties(schema);
                        }
                    }
                }
                "items" | "additionalProperties" => {
                    close_additional_properties(child);
                }
                "allOf" | "anyOf" | "oneOf" => {
                    if let Value::Array(branches) = child {
                        for branch in branches {
                            close_additional_properties(branch);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
