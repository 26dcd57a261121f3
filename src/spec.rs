//! Specification container: named schemas, endpoints and the published
//! OpenAPI document.

use std::collections::HashSet;
use std::fmt;
use std::panic::RefUnwindSafe;
use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::compiler::{compile, compile_pair, CompiledSchema};
use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::error::SpecError;
use crate::keyword::{
    AsyncValidator, CheckContext, CustomValidation, NamedValidators, ValidatorFn,
};
use crate::loader::{is_url, navigate_fragment};
use crate::pipeline::{CallHooks, ErrorSink, TracingSink};
use crate::registry::ReferenceRegistry;
use crate::router::{Route, RouteRegistrar};
use crate::schema::{Schema, SchemaRef};
use crate::types::{Dialect, REF_KEY};
use crate::validator::{OptionsProvider, ValidationEnv, ValidatorOptions};

/// OpenAPI version written into generated documents.
pub const OPENAPI_VERSION: &str = "3.0.3";

const META_SCHEMA: &str = include_str!("meta/openapi-3.0.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of checking a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpecReport {
    pub valid: bool,
    /// `$ref` targets that do not resolve within the document.
    pub missing_refs: Vec<String>,
    /// Structural problems found against the OpenAPI 3.0 meta-schema.
    pub errors: Vec<String>,
}

/// Configuration for a [`Specification`].
pub struct SpecificationBuilder {
    info: Info,
    servers: Vec<Server>,
    tags: Vec<Tag>,
    security_schemes: Map<String, Value>,
    schemas: Vec<(String, SchemaRef)>,
    validators: NamedValidators,
    validator_options: ValidatorOptions,
    sink: Option<Arc<dyn ErrorSink>>,
    options_provider: Option<Arc<dyn OptionsProvider>>,
    router: Option<Arc<dyn RouteRegistrar>>,
}

impl fmt::Debug for SpecificationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecificationBuilder")
            .field("info", &self.info)
            .field("schemas", &self.schemas.len())
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

impl SpecificationBuilder {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Info {
                title: title.into(),
                version: version.into(),
                description: None,
            },
            servers: Vec::new(),
            tags: Vec::new(),
            security_schemes: Map::new(),
            schemas: Vec::new(),
            validators: NamedValidators::new(),
            validator_options: ValidatorOptions::default(),
            sink: None,
            options_provider: None,
            router: None,
        }
    }

    /// Seed info, servers, tags and security schemes from an existing
    /// OpenAPI document.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidConfiguration` if `info` is missing or
    /// malformed.
    pub fn from_document(document: &Value) -> Result<Self, SpecError> {
        let invalid = |what: &str, e: serde_json::Error| SpecError::InvalidConfiguration {
            message: format!("base document {}: {}", what, e),
        };

        let info: Info = serde_json::from_value(document.get("info").cloned().unwrap_or(Value::Null))
            .map_err(|e| invalid("info", e))?;
        let mut builder = Self::new(info.title.clone(), info.version.clone());
        builder.info = info;

        if let Some(servers) = document.get("servers") {
            builder.servers =
                serde_json::from_value(servers.clone()).map_err(|e| invalid("servers", e))?;
        }
        if let Some(tags) = document.get("tags") {
            builder.tags = serde_json::from_value(tags.clone()).map_err(|e| invalid("tags", e))?;
        }
        if let Some(Value::Object(schemes)) = navigate_fragment(document, "#/components/securitySchemes") {
            builder.security_schemes = schemes.clone();
        }
        Ok(builder)
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.info.description = Some(text.into());
        self
    }

    pub fn server(mut self, url: impl Into<String>, description: Option<&str>) -> Self {
        self.servers.push(Server {
            url: url.into(),
            description: description.map(str::to_string),
        });
        self
    }

    pub fn tag(mut self, name: impl Into<String>, description: Option<&str>) -> Self {
        self.tags.push(Tag {
            name: name.into(),
            description: description.map(str::to_string),
        });
        self
    }

    pub fn security_scheme(mut self, name: impl Into<String>, scheme: Value) -> Self {
        self.security_schemes.insert(name.into(), scheme);
        self
    }

    /// Register a named component schema. Other schemas link to it by
    /// passing the same handle to [`Schema::reference`].
    pub fn schema(mut self, name: impl Into<String>, schema: &SchemaRef) -> Self {
        self.schemas.push((name.into(), Arc::clone(schema)));
        self
    }

    /// Register a custom validator usable by name from `x-validator`.
    pub fn validator<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CustomValidation, &CheckContext<'_>) -> Option<String>
            + Send
            + Sync
            + RefUnwindSafe
            + 'static,
    {
        self.validators.insert(name, ValidatorFn::new(f));
        self
    }

    /// Register an asynchronous custom validator usable by name.
    pub fn async_validator<V>(mut self, name: impl Into<String>, validator: V) -> Self
    where
        V: AsyncValidator + RefUnwindSafe + 'static,
    {
        self.validators.insert(name, ValidatorFn::from_async(validator));
        self
    }

    /// Options used by validators built at definition time.
    pub fn validator_options(mut self, options: ValidatorOptions) -> Self {
        self.validator_options = options;
        self
    }

    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Supply validator options per call instead of once at definition.
    pub fn options_provider(mut self, provider: Arc<dyn OptionsProvider>) -> Self {
        self.options_provider = Some(provider);
        self
    }

    pub fn router(mut self, router: Arc<dyn RouteRegistrar>) -> Self {
        self.router = Some(router);
        self
    }

    /// Register every named schema, compile them into both dialects and
    /// assemble the base document.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidConfiguration` for duplicate schema names or
    /// objects, and `SpecError::UnresolvedReference` if a named schema links
    /// to an unregistered one.
    pub fn build(self) -> Result<Specification, SpecError> {
        let mut registry = ReferenceRegistry::new();
        for (name, schema) in &self.schemas {
            registry.register(name.clone(), schema)?;
        }

        let mut env = ValidationEnv::new(self.validators);
        let mut documentation = Map::new();
        for (name, schema) in registry.iter() {
            let pair = compile_pair(schema, &registry)?;
            documentation.insert(name.to_string(), pair.documentation);
            env.add_definition(name, pair.validation);
        }

        let mut document = Map::new();
        document.insert("openapi".into(), json!(OPENAPI_VERSION));
        document.insert("info".into(), json!(self.info));
        if !self.servers.is_empty() {
            document.insert("servers".into(), json!(self.servers));
        }
        if !self.tags.is_empty() {
            document.insert("tags".into(), json!(self.tags));
        }
        document.insert("paths".into(), json!({}));

        let mut components = Map::new();
        components.insert("schemas".into(), Value::Object(documentation));
        if !self.security_schemes.is_empty() {
            components.insert(
                "securitySchemes".into(),
                Value::Object(self.security_schemes),
            );
        }
        document.insert("components".into(), Value::Object(components));

        info!(
            title = %self.info.title,
            schemas = registry.len(),
            "specification built"
        );

        Ok(Specification {
            document: Value::Object(document),
            registry,
            env: Arc::new(env),
            endpoints: Vec::new(),
            operation_ids: HashSet::new(),
            validator_options: self.validator_options,
            hooks: Arc::new(CallHooks {
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
                options_provider: self.options_provider,
            }),
            router: self.router,
        })
    }
}

/// A built specification: owns the document and every defined endpoint.
pub struct Specification {
    document: Value,
    registry: ReferenceRegistry,
    env: Arc<ValidationEnv>,
    endpoints: Vec<Arc<Endpoint>>,
    operation_ids: HashSet<String>,
    validator_options: ValidatorOptions,
    hooks: Arc<CallHooks>,
    router: Option<Arc<dyn RouteRegistrar>>,
}

impl fmt::Debug for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("schemas", &self.registry.len())
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Specification {
    pub fn builder(title: impl Into<String>, version: impl Into<String>) -> SpecificationBuilder {
        SpecificationBuilder::new(title, version)
    }

    /// Start declaring an operation.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::DuplicateOperation` if `operation_id` was used
    /// before, even by a builder that was never defined.
    pub fn endpoint(
        &mut self,
        operation_id: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> Result<EndpointBuilder<'_>, SpecError> {
        let operation_id = operation_id.into();
        self.reserve_operation(&operation_id)?;
        Ok(EndpointBuilder::new(self, operation_id, method, path.into()))
    }

    pub fn get(&mut self, operation_id: impl Into<String>, path: impl Into<String>) -> Result<EndpointBuilder<'_>, SpecError> {
        self.endpoint(operation_id, Method::GET, path)
    }

    pub fn post(&mut self, operation_id: impl Into<String>, path: impl Into<String>) -> Result<EndpointBuilder<'_>, SpecError> {
        self.endpoint(operation_id, Method::POST, path)
    }

    pub fn put(&mut self, operation_id: impl Into<String>, path: impl Into<String>) -> Result<EndpointBuilder<'_>, SpecError> {
        self.endpoint(operation_id, Method::PUT, path)
    }

    pub fn patch(&mut self, operation_id: impl Into<String>, path: impl Into<String>) -> Result<EndpointBuilder<'_>, SpecError> {
        self.endpoint(operation_id, Method::PATCH, path)
    }

    pub fn delete(&mut self, operation_id: impl Into<String>, path: impl Into<String>) -> Result<EndpointBuilder<'_>, SpecError> {
        self.endpoint(operation_id, Method::DELETE, path)
    }

    /// The published OpenAPI document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn find_endpoint(&self, operation_id: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.operation_id() == operation_id)
    }

    /// Compile an arbitrary schema against this specification's registry.
    pub fn compile(&self, schema: &Schema, dialect: Dialect) -> Result<CompiledSchema, SpecError> {
        compile(schema, dialect, &self.registry)
    }

    /// Check the published document for dangling references and structural
    /// problems.
    pub fn validate_spec(&self) -> SpecReport {
        validate_document(&self.document)
    }

    fn reserve_operation(&mut self, operation_id: &str) -> Result<(), SpecError> {
        if !self.operation_ids.insert(operation_id.to_string()) {
            return Err(SpecError::DuplicateOperation {
                operation_id: operation_id.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn rename_operation(&mut self, from: &str, to: &str) -> Result<(), SpecError> {
        self.reserve_operation(to)?;
        self.operation_ids.remove(from);
        Ok(())
    }

    pub(crate) fn has_operation(&self, path: &str, method: &Method) -> bool {
        self.document
            .get("paths")
            .and_then(|paths| paths.get(path))
            .and_then(|item| item.get(method.as_str().to_ascii_lowercase()))
            .is_some()
    }

    pub(crate) fn insert_operation(&mut self, path: &str, method: &Method, operation: Value) {
        let Some(Value::Object(paths)) = self.document.get_mut("paths") else {
            return;
        };
        let item = paths
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(item) = item {
            item.insert(method.as_str().to_ascii_lowercase(), operation);
        }
    }

    pub(crate) fn register_endpoint(&mut self, endpoint: Arc<Endpoint>) {
        if let Some(router) = &self.router {
            router.register(Route {
                method: endpoint.method().clone(),
                path: endpoint.transport_path(),
                endpoint: Arc::clone(&endpoint),
            });
        }
        self.endpoints.push(endpoint);
    }

    pub(crate) fn env(&self) -> &Arc<ValidationEnv> {
        &self.env
    }

    pub(crate) fn validator_options(&self) -> &ValidatorOptions {
        &self.validator_options
    }

    pub(crate) fn hooks(&self) -> &Arc<CallHooks> {
        &self.hooks
    }
}

/// Check any OpenAPI 3.0 document: every local `$ref` must resolve and the
/// document must satisfy the structural meta-schema.
pub fn validate_document(document: &Value) -> SpecReport {
    let mut missing_refs = Vec::new();
    collect_missing_refs(document, document, &mut missing_refs);

    let errors = match meta_validator() {
        Ok(validator) => validator
            .iter_errors(document)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect(),
        Err(message) => vec![message],
    };

    debug!(
        missing_refs = missing_refs.len(),
        errors = errors.len(),
        "document checked"
    );
    SpecReport {
        valid: missing_refs.is_empty() && errors.is_empty(),
        missing_refs,
        errors,
    }
}

fn meta_validator() -> Result<jsonschema::Validator, String> {
    let meta: Value = serde_json::from_str(META_SCHEMA)
        .map_err(|e| format!("embedded meta-schema is not valid JSON: {}", e))?;
    jsonschema::validator_for(&meta).map_err(|e| format!("embedded meta-schema rejected: {}", e))
}

fn collect_missing_refs(node: &Value, root: &Value, missing: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get(REF_KEY) {
                // Remote references are not fetched.
                let resolvable = if reference.starts_with('#') {
                    navigate_fragment(root, reference).is_some()
                } else {
                    is_url(reference)
                };
                if !resolvable && !missing.contains(reference) {
                    missing.push(reference.clone());
                }
            }
            for child in map.values() {
                collect_missing_refs(child, root, missing);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_missing_refs(item, root, missing);
            }
        }
        _ => {}
    }
}
