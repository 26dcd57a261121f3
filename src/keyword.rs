//! The `x-validator` keyword: custom validation functions on the runtime validator.
//!
//! A keyword value is a validator name, an inline function (a placeholder
//! produced by the compiler), or an ordered list of either. Every entry is
//! evaluated; each returned message becomes a separate validation error.
//!
//! Asynchronous validators cannot run inside the synchronous evaluator. They
//! are recorded as [`DeferredCheck`]s while the synchronous pass walks the
//! instance and awaited afterwards by `SchemaValidator::validate_async`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::RefUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::paths::{LazyLocation, Location};
use jsonschema::{Keyword, ValidationError};
use serde_json::{Map, Value};

use crate::compiler::{placeholder_id, FunctionTable};
use crate::error::SpecError;
use crate::types::{json_type_name, subschemas, VendorKeyword};

/// Signature of a custom validator.
///
/// Receives the accumulator for the keyword being checked plus the check
/// context. A returned non-empty message is recorded as an error.
pub type ValidatorCallback = dyn Fn(&mut CustomValidation, &CheckContext<'_>) -> Option<String>
    + Send
    + Sync
    + RefUnwindSafe;

/// Custom validator that awaits external work (lookups, remote checks).
///
/// Same contract as [`ValidatorCallback`]: messages added to `result` and a
/// returned non-empty message are both recorded as errors.
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn check(&self, result: &mut CustomValidation, ctx: &CheckContext<'_>)
        -> Option<String>;
}

pub type AsyncCallback = dyn AsyncValidator + RefUnwindSafe;

/// Shareable custom validator function, synchronous or asynchronous.
#[derive(Clone)]
pub struct ValidatorFn(Callback);

#[derive(Clone)]
enum Callback {
    Sync(Arc<ValidatorCallback>),
    Async(Arc<AsyncCallback>),
}

impl ValidatorFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut CustomValidation, &CheckContext<'_>) -> Option<String>
            + Send
            + Sync
            + RefUnwindSafe
            + 'static,
    {
        Self(Callback::Sync(Arc::new(f)))
    }

    pub fn from_async<V>(validator: V) -> Self
    where
        V: AsyncValidator + RefUnwindSafe + 'static,
    {
        Self(Callback::Async(Arc::new(validator)))
    }

    pub fn is_async(&self) -> bool {
        matches!(self.0, Callback::Async(_))
    }

    /// Run a synchronous validator. Asynchronous validators are not run
    /// here and report nothing.
    pub fn call(&self, result: &mut CustomValidation, ctx: &CheckContext<'_>) -> Option<String> {
        match &self.0 {
            Callback::Sync(f) => f(result, ctx),
            Callback::Async(_) => None,
        }
    }

    /// Run either kind of validator to completion.
    pub async fn call_async(
        &self,
        result: &mut CustomValidation,
        ctx: &CheckContext<'_>,
    ) -> Option<String> {
        match &self.0 {
            Callback::Sync(f) => f(result, ctx),
            Callback::Async(v) => v.check(result, ctx).await,
        }
    }

    /// True if both handles point at the same function.
    pub fn same(&self, other: &ValidatorFn) -> bool {
        match (&self.0, &other.0) {
            (Callback::Sync(a), Callback::Sync(b)) => Arc::ptr_eq(a, b),
            (Callback::Async(a), Callback::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Stable identifier derived from the function's allocation.
    pub fn id(&self) -> String {
        let address = match &self.0 {
            Callback::Sync(f) => Arc::as_ptr(f) as *const () as usize,
            Callback::Async(v) => Arc::as_ptr(v) as *const () as usize,
        };
        format!("fn-{:x}", address)
    }
}

impl fmt::Debug for ValidatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValidatorFn")
            .field(&self.id())
            .field(&if self.is_async() { "async" } else { "sync" })
            .finish()
    }
}

/// What a custom validator sees when it runs.
#[derive(Debug)]
pub struct CheckContext<'a> {
    /// Value being validated.
    pub instance: &'a Value,
    /// Schema object carrying the keyword.
    pub schema: &'a Map<String, Value>,
    /// Caller-supplied options (see `ValidatorOptions::context`).
    pub options: &'a Value,
    /// JSON Pointer of `instance` within the validated document.
    pub location: &'a str,
}

/// Error accumulator for one evaluation of the keyword.
#[derive(Debug, Default, Clone)]
pub struct CustomValidation {
    errors: Vec<String>,
}

impl CustomValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validators resolvable by name from `x-validator` values.
#[derive(Debug, Clone, Default)]
pub struct NamedValidators(HashMap<String, ValidatorFn>);

impl NamedValidators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, f: ValidatorFn) -> Option<ValidatorFn> {
        self.0.insert(name.into(), f)
    }

    pub fn get(&self, name: &str) -> Option<&ValidatorFn> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Named(String),
    Inline(ValidatorFn),
}

/// Wrap a bare entry into a list; `null` entries count as absent.
fn normalize(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn parse_entry(entry: &Value, functions: &FunctionTable) -> Result<Entry, String> {
    if let Value::String(name) = entry {
        return Ok(Entry::Named(name.clone()));
    }
    match placeholder_id(entry) {
        Some(id) => functions
            .get(id)
            .cloned()
            .map(Entry::Inline)
            .ok_or_else(|| format!("custom validator function {} is not available", id)),
        None => Err(format!(
            "invalid custom validator reference: expected name or function, got {}",
            json_type_name(entry)
        )),
    }
}

/// Check every `x-validator` value in `schema` has a usable shape.
///
/// # Errors
///
/// Returns `SpecError::InvalidConfiguration` naming the offending location.
pub fn check_references(schema: &Value, functions: &FunctionTable) -> Result<(), SpecError> {
    check_references_at(schema, functions, "")
}

/// Only schema positions are visited: property names, literal data and
/// annotations never carry the keyword.
fn check_references_at(value: &Value, functions: &FunctionTable, path: &str) -> Result<(), SpecError> {
    let Value::Object(map) = value else {
        return Ok(());
    };
    if let Some(keyword) = map.get(VendorKeyword::CustomValidator.key()) {
        for entry in normalize(keyword) {
            parse_entry(entry, functions).map_err(|message| SpecError::InvalidConfiguration {
                message: format!("{} at {}", message, path),
            })?;
        }
    }
    for (suffix, child) in subschemas(map) {
        check_references_at(child, functions, &format!("{}/{}", path, suffix))?;
    }
    Ok(())
}

/// An asynchronous validator invocation recorded during a synchronous pass.
pub(crate) struct DeferredCheck {
    validator: ValidatorFn,
    instance: Value,
    schema: Map<String, Value>,
    options: Arc<Value>,
    location: String,
}

impl DeferredCheck {
    pub(crate) fn location(&self) -> &str {
        &self.location
    }

    pub(crate) async fn run(&self) -> Vec<String> {
        let mut result = CustomValidation::new();
        let ctx = CheckContext {
            instance: &self.instance,
            schema: &self.schema,
            options: &self.options,
            location: &self.location,
        };
        if let Some(message) = self.validator.call_async(&mut result, &ctx).await {
            if !message.is_empty() {
                result.add_error(message);
            }
        }
        result.errors
    }
}

thread_local! {
    static DEFERRED: RefCell<Option<Vec<DeferredCheck>>> = const { RefCell::new(None) };
}

/// Run `f` with deferral enabled on this thread, returning what it recorded.
///
/// `f` must not await; the evaluator it drives is synchronous.
pub(crate) fn collect_deferred<R>(f: impl FnOnce() -> R) -> (R, Vec<DeferredCheck>) {
    let previous = DEFERRED.with(|cell| cell.replace(Some(Vec::new())));
    let output = f();
    let recorded = DEFERRED.with(|cell| cell.replace(previous)).unwrap_or_default();
    (output, recorded)
}

/// Record a deferred check; false when no collection is active.
fn defer(check: DeferredCheck) -> bool {
    DEFERRED.with(|cell| match cell.borrow_mut().as_mut() {
        Some(pending) => {
            pending.push(check);
            true
        }
        None => false,
    })
}

/// Custom keyword messages travel inside one `ValidationError` as a JSON
/// array so that messages containing newlines survive intact.
pub(crate) fn encode_messages(messages: &[String]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| messages.join("; "))
}

pub(crate) fn decode_messages(encoded: &str) -> Vec<String> {
    serde_json::from_str(encoded).unwrap_or_else(|_| vec![encoded.to_string()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Error-reporting evaluation: asynchronous validators are deferred.
    Report,
    /// Boolean evaluation: asynchronous validators are not consulted.
    Boolean,
}

/// Compiled keyword instance for one schema object.
pub(crate) struct CustomValidatorKeyword {
    entries: Vec<Entry>,
    schema: Map<String, Value>,
    named: Arc<NamedValidators>,
    options: Arc<Value>,
    schema_path: Location,
}

impl CustomValidatorKeyword {
    /// Keyword factory installed on the runtime validator.
    pub(crate) fn compile<'a>(
        parent: &'a Map<String, Value>,
        value: &'a Value,
        path: Location,
        functions: &FunctionTable,
        named: &Arc<NamedValidators>,
        options: &Arc<Value>,
    ) -> Result<Box<dyn Keyword>, ValidationError<'a>> {
        let mut entries = Vec::new();
        for entry in normalize(value) {
            match parse_entry(entry, functions) {
                Ok(parsed) => entries.push(parsed),
                Err(message) => {
                    return Err(ValidationError::custom(Location::new(), path, value, message));
                }
            }
        }
        Ok(Box::new(CustomValidatorKeyword {
            entries,
            schema: parent.clone(),
            named: Arc::clone(named),
            options: Arc::clone(options),
            schema_path: path,
        }))
    }

    fn run(&self, instance: &Value, location: &str, pass: Pass) -> CustomValidation {
        let mut result = CustomValidation::new();
        for entry in &self.entries {
            let f = match entry {
                Entry::Inline(f) => f,
                Entry::Named(name) => match self.named.get(name) {
                    Some(f) => f,
                    None => {
                        result.add_error(format!("undefined custom validator name \"{}\"", name));
                        continue;
                    }
                },
            };
            if f.is_async() {
                if pass == Pass::Report {
                    let recorded = defer(DeferredCheck {
                        validator: f.clone(),
                        instance: instance.clone(),
                        schema: self.schema.clone(),
                        options: Arc::clone(&self.options),
                        location: location.to_string(),
                    });
                    if !recorded {
                        result.add_error(
                            "asynchronous custom validator requires asynchronous validation",
                        );
                    }
                }
                continue;
            }
            let ctx = CheckContext {
                instance,
                schema: &self.schema,
                options: &self.options,
                location,
            };
            if let Some(message) = f.call(&mut result, &ctx) {
                if !message.is_empty() {
                    result.add_error(message);
                }
            }
        }
        result
    }
}

impl Keyword for CustomValidatorKeyword {
    fn validate<'i>(
        &self,
        instance: &'i Value,
        location: &LazyLocation,
    ) -> Result<(), ValidationError<'i>> {
        let instance_path: Location = location.into();
        let outcome = self.run(instance, &instance_path.to_string(), Pass::Report);
        if outcome.is_valid() {
            Ok(())
        } else {
            Err(ValidationError::custom(
                self.schema_path.clone(),
                instance_path,
                instance,
                encode_messages(outcome.errors()),
            ))
        }
    }

    fn is_valid(&self, instance: &Value) -> bool {
        self.run(instance, "", Pass::Boolean).is_valid()
    }
}
