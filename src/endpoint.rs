//! Endpoint declaration.
//!
//! An [`EndpointBuilder`] accumulates one operation's parameters, body,
//! responses and security requirements. [`EndpointBuilder::define`] consumes
//! the builder, publishes the operation into the specification document and
//! returns the immutable [`Endpoint`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::compiler::{compile_pair, CompiledPair, CompiledSchema, FunctionTable};
use crate::error::SpecError;
use crate::pipeline::{CallContext, CallHooks, Reply};
use crate::router::to_transport_path;
use crate::schema::Schema;
use crate::spec::Specification;
use crate::types::{ParamLocation, PrimitiveType};
use crate::validator::{SchemaValidator, ValidationEnv};

const JSON_MEDIA_TYPE: &str = "application/json";

/// One alternative security requirement: scheme name to required scopes.
pub type SecurityRequirement = IndexMap<String, Vec<String>>;

/// User logic behind an endpoint.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: CallContext) -> anyhow::Result<Reply>;
}

struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
{
    async fn handle(&self, ctx: CallContext) -> anyhow::Result<Reply> {
        (self.0)(ctx).await
    }
}

/// A declared query, path or header parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub location: ParamLocation,
    pub name: String,
    pub description: String,
    pub required: bool,
    pub kind: PrimitiveType,
    pub schema: CompiledPair,
}

impl Parameter {
    /// Key of this parameter inside its bucket of the request instance.
    /// Header names are case-insensitive and stored lower-cased.
    pub fn instance_name(&self) -> String {
        match self.location {
            ParamLocation::Header => self.name.to_ascii_lowercase(),
            _ => self.name.clone(),
        }
    }

    fn documentation(&self) -> Value {
        json!({
            "name": self.name,
            "in": self.location.as_str(),
            "description": self.description,
            "required": self.required,
            "schema": self.schema.documentation,
        })
    }
}

/// Declared JSON request body.
#[derive(Debug, Clone)]
pub struct RequestBody {
    pub description: String,
    pub required: bool,
    pub schema: CompiledPair,
}

/// Declared response for one status code.
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: StatusCode,
    pub description: String,
    /// `None` for responses without a body (204, 304, ...).
    pub schema: Option<CompiledPair>,
}

#[derive(Debug)]
struct EndpointDraft {
    operation_id: String,
    method: Method,
    path: String,
    summary: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    parameters: Vec<Parameter>,
    request_body: Option<RequestBody>,
    responses: BTreeMap<u16, ResponseSpec>,
    security: Vec<SecurityRequirement>,
    deprecated: bool,
    version: Option<u32>,
}

impl EndpointDraft {
    /// Composite schema over `{query, params, headers, body}`.
    fn request_schema(&self) -> CompiledSchema {
        let mut functions = FunctionTable::default();
        let mut properties = Map::new();

        for location in [ParamLocation::Query, ParamLocation::Path, ParamLocation::Header] {
            let mut bucket = Map::new();
            let mut required = Vec::new();
            for param in self.parameters.iter().filter(|p| p.location == location) {
                let name = param.instance_name();
                bucket.insert(name.clone(), param.schema.validation.value.clone());
                functions.extend(&param.schema.validation.functions);
                if param.required {
                    required.push(Value::String(name));
                }
            }
            properties.insert(
                location.instance_key().to_string(),
                json!({ "type": "object", "properties": bucket, "required": required }),
            );
        }

        let mut required = vec![json!("query"), json!("params"), json!("headers")];
        if let Some(body) = &self.request_body {
            properties.insert("body".to_string(), body.schema.validation.value.clone());
            functions.extend(&body.schema.validation.functions);
            if body.required {
                required.push(json!("body"));
            }
        }

        CompiledSchema {
            value: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
            functions,
        }
    }

    /// Operation object for the document's path table.
    fn documentation(&self) -> Value {
        let mut operation = Map::new();
        operation.insert("operationId".into(), json!(self.operation_id));
        if let Some(summary) = &self.summary {
            operation.insert("summary".into(), json!(summary));
        }
        if let Some(description) = &self.description {
            operation.insert("description".into(), json!(description));
        }
        if !self.tags.is_empty() {
            operation.insert("tags".into(), json!(self.tags));
        }
        if !self.parameters.is_empty() {
            let parameters: Vec<Value> = self.parameters.iter().map(Parameter::documentation).collect();
            operation.insert("parameters".into(), Value::Array(parameters));
        }
        if let Some(body) = &self.request_body {
            operation.insert(
                "requestBody".into(),
                json!({
                    "description": body.description,
                    "required": body.required,
                    "content": { JSON_MEDIA_TYPE: { "schema": body.schema.documentation } },
                }),
            );
        }

        let mut responses = Map::new();
        for (status, response) in &self.responses {
            let mut entry = Map::new();
            entry.insert("description".into(), json!(response.description));
            if let Some(schema) = &response.schema {
                entry.insert(
                    "content".into(),
                    json!({ JSON_MEDIA_TYPE: { "schema": schema.documentation } }),
                );
            }
            responses.insert(status.to_string(), Value::Object(entry));
        }
        operation.insert("responses".into(), Value::Object(responses));

        if !self.security.is_empty() {
            operation.insert("security".into(), json!(self.security));
        }
        if self.deprecated {
            operation.insert("deprecated".into(), Value::Bool(true));
        }
        Value::Object(operation)
    }
}

/// Fluent declaration of one operation.
///
/// The operation identifier is reserved when the builder is created; a
/// builder dropped without `define` keeps its reservation.
pub struct EndpointBuilder<'s> {
    spec: &'s mut Specification,
    draft: EndpointDraft,
}

impl fmt::Debug for EndpointBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("draft", &self.draft)
            .finish_non_exhaustive()
    }
}

impl<'s> EndpointBuilder<'s> {
    pub(crate) fn new(
        spec: &'s mut Specification,
        operation_id: String,
        method: Method,
        path: String,
    ) -> Self {
        Self {
            spec,
            draft: EndpointDraft {
                operation_id,
                method,
                path,
                summary: None,
                description: None,
                tags: Vec::new(),
                parameters: Vec::new(),
                request_body: None,
                responses: BTreeMap::new(),
                security: Vec::new(),
                deprecated: false,
                version: None,
            },
        }
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.draft.summary = Some(text.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.draft.description = Some(text.into());
        self
    }

    pub fn tag(mut self, name: impl Into<String>) -> Self {
        self.draft.tags.push(name.into());
        self
    }

    /// Declare a query, path or header parameter.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::UnresolvedReference` if `schema` links to an
    /// unregistered schema.
    pub fn parameter(
        mut self,
        location: ParamLocation,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        schema: impl Into<Schema>,
        kind: PrimitiveType,
    ) -> Result<Self, SpecError> {
        let schema = compile_pair(&schema.into(), self.spec.registry())?;
        self.draft.parameters.push(Parameter {
            location,
            name: name.into(),
            description: description.into(),
            required,
            kind,
            schema,
        });
        Ok(self)
    }

    /// Declare a JSON request body.
    pub fn request_body(
        mut self,
        description: impl Into<String>,
        required: bool,
        schema: impl Into<Schema>,
    ) -> Result<Self, SpecError> {
        let schema = compile_pair(&schema.into(), self.spec.registry())?;
        self.draft.request_body = Some(RequestBody {
            description: description.into(),
            required,
            schema,
        });
        Ok(self)
    }

    /// Declare a response. `schema` is `None` for responses without a body.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::InvalidConfiguration` for status codes outside
    /// 100..=599.
    pub fn response(
        mut self,
        status: u16,
        description: impl Into<String>,
        schema: Option<Schema>,
    ) -> Result<Self, SpecError> {
        let code = StatusCode::from_u16(status)
            .ok()
            .filter(|code| (100..600).contains(&code.as_u16()))
            .ok_or_else(|| SpecError::InvalidConfiguration {
                message: format!("invalid response status code {}", status),
            })?;
        if self.draft.responses.contains_key(&status) {
            return Err(SpecError::InvalidConfiguration {
                message: format!(
                    "response {} is already declared for {}",
                    status, self.draft.operation_id
                ),
            });
        }
        let schema = match schema {
            Some(schema) => Some(compile_pair(&schema, self.spec.registry())?),
            None => None,
        };
        self.draft.responses.insert(
            status,
            ResponseSpec {
                status: code,
                description: description.into(),
                schema,
            },
        );
        Ok(self)
    }

    /// Mark the operation deprecated, appending `comment` to its description.
    pub fn deprecate(mut self, comment: Option<&str>) -> Self {
        self.draft.deprecated = true;
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            self.draft.description = Some(match self.draft.description.take() {
                Some(existing) if !existing.is_empty() => format!("{}\n\n{}", existing, comment),
                _ => comment.to_string(),
            });
        }
        self
    }

    /// Add one alternative security requirement. Alternatives from separate
    /// calls are OR-ed; schemes within one call are AND-ed.
    pub fn security<I, K>(mut self, requirement: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<String>)>,
        K: Into<String>,
    {
        let requirement: SecurityRequirement = requirement
            .into_iter()
            .map(|(scheme, scopes)| (scheme.into(), scopes))
            .collect();
        self.draft.security.push(requirement);
        self
    }

    /// Prefix the path with `/v<v>` and the operation id with `v<v>_`.
    ///
    /// Only the first call with a positive version has an effect.
    ///
    /// # Errors
    ///
    /// Returns `SpecError::DuplicateOperation` if the versioned identifier
    /// is already taken.
    pub fn version(mut self, v: u32) -> Result<Self, SpecError> {
        if v == 0 || self.draft.version.is_some() {
            return Ok(self);
        }
        let versioned = format!("v{}_{}", v, self.draft.operation_id);
        self.spec
            .rename_operation(&self.draft.operation_id, &versioned)?;
        self.draft.operation_id = versioned;

        let path = self.draft.path.trim_start_matches('/');
        self.draft.path = format!("/v{}/{}", v, path);
        self.draft.version = Some(v);
        Ok(self)
    }

    /// Register the operation with a closure handler.
    pub fn define<F, Fut>(self, handler: F) -> Result<Arc<Endpoint>, SpecError>
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.define_handler(Arc::new(HandlerFn(handler)))
    }

    /// Register the operation: build its validators, publish its document
    /// fragment and notify the route registrar.
    ///
    /// # Errors
    ///
    /// Fails before touching the document if a validator cannot be built or
    /// the path already has an operation for this method.
    pub fn define_handler(self, handler: Arc<dyn Handler>) -> Result<Arc<Endpoint>, SpecError> {
        let EndpointBuilder { spec, draft } = self;

        if spec.has_operation(&draft.path, &draft.method) {
            return Err(SpecError::InvalidConfiguration {
                message: format!(
                    "{} {} already has an operation",
                    draft.method, draft.path
                ),
            });
        }

        let env = Arc::clone(spec.env());
        let options = spec.validator_options().clone();
        let request_schema = draft.request_schema();
        let request_validator = SchemaValidator::build(&request_schema, &env, &options)?;

        let mut response_validators = BTreeMap::new();
        for (status, response) in &draft.responses {
            if let Some(schema) = &response.schema {
                let validator = SchemaValidator::build(&schema.validation, &env, &options)?;
                response_validators.insert(*status, validator);
            }
        }

        spec.insert_operation(&draft.path, &draft.method, draft.documentation());

        let endpoint = Arc::new(Endpoint {
            operation_id: draft.operation_id,
            method: draft.method,
            path: draft.path,
            parameters: draft.parameters,
            request_body: draft.request_body,
            responses: draft.responses,
            security: draft.security,
            deprecated: draft.deprecated,
            request_schema,
            request_validator,
            response_validators,
            handler,
            env,
            hooks: Arc::clone(spec.hooks()),
        });

        info!(
            operation_id = %endpoint.operation_id,
            method = %endpoint.method,
            path = %endpoint.path,
            "endpoint defined"
        );
        spec.register_endpoint(Arc::clone(&endpoint));
        Ok(endpoint)
    }
}

/// A registered, immutable operation.
pub struct Endpoint {
    pub(crate) operation_id: String,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) request_body: Option<RequestBody>,
    pub(crate) responses: BTreeMap<u16, ResponseSpec>,
    pub(crate) security: Vec<SecurityRequirement>,
    pub(crate) deprecated: bool,
    pub(crate) request_schema: CompiledSchema,
    pub(crate) request_validator: SchemaValidator,
    pub(crate) response_validators: BTreeMap<u16, SchemaValidator>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) env: Arc<ValidationEnv>,
    pub(crate) hooks: Arc<CallHooks>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("operation_id", &self.operation_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path template with `{name}` placeholders.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path with `:name` placeholders for the transport's router.
    pub fn transport_path(&self) -> String {
        to_transport_path(&self.path)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn request_body(&self) -> Option<&RequestBody> {
        self.request_body.as_ref()
    }

    pub fn responses(&self) -> impl Iterator<Item = &ResponseSpec> {
        self.responses.values()
    }

    pub fn security(&self) -> &[SecurityRequirement] {
        &self.security
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    /// Composite validation schema for `{query, params, headers, body}`.
    pub fn request_schema(&self) -> &Value {
        &self.request_schema.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(location: ParamLocation, name: &str, required: bool) -> Parameter {
        let schema = compile_pair(
            &Schema::from(json!({ "type": "string" })),
            &crate::registry::ReferenceRegistry::new(),
        )
        .unwrap();
        Parameter {
            location,
            name: name.into(),
            description: String::new(),
            required,
            kind: PrimitiveType::String,
            schema,
        }
    }

    fn draft() -> EndpointDraft {
        EndpointDraft {
            operation_id: "listThings".into(),
            method: Method::GET,
            path: "/things".into(),
            summary: None,
            description: None,
            tags: Vec::new(),
            parameters: Vec::new(),
            request_body: None,
            responses: BTreeMap::new(),
            security: Vec::new(),
            deprecated: false,
            version: None,
        }
    }

    #[test]
    fn request_schema_buckets_parameters() {
        let mut draft = draft();
        draft.parameters.push(param(ParamLocation::Query, "limit", false));
        draft.parameters.push(param(ParamLocation::Header, "X-Trace", true));

        let schema = draft.request_schema().value;
        assert_eq!(schema["required"], json!(["query", "params", "headers"]));
        assert!(schema["properties"]["query"]["properties"].get("limit").is_some());
        assert_eq!(schema["properties"]["query"]["required"], json!([]));
        assert_eq!(schema["properties"]["headers"]["required"], json!(["x-trace"]));
        assert!(schema["properties"].get("body").is_none());
    }

    #[test]
    fn request_schema_requires_body_only_when_declared_required() {
        let body_schema = compile_pair(
            &Schema::from(json!({ "type": "object" })),
            &crate::registry::ReferenceRegistry::new(),
        )
        .unwrap();
        let mut draft = draft();
        draft.request_body = Some(RequestBody {
            description: "payload".into(),
            required: false,
            schema: body_schema,
        });
        let schema = draft.request_schema().value;
        assert!(schema["properties"].get("body").is_some());
        assert_eq!(schema["required"], json!(["query", "params", "headers"]));

        if let Some(body) = draft.request_body.as_mut() {
            body.required = true;
        }
        let schema = draft.request_schema().value;
        assert_eq!(schema["required"], json!(["query", "params", "headers", "body"]));
    }

    #[test]
    fn documentation_fragment() {
        let mut draft = draft();
        draft.parameters.push(param(ParamLocation::Query, "limit", false));
        draft.responses.insert(
            204,
            ResponseSpec {
                status: StatusCode::NO_CONTENT,
                description: "Nothing".into(),
                schema: None,
            },
        );
        draft.deprecated = true;

        let doc = draft.documentation();
        assert_eq!(doc["operationId"], "listThings");
        assert_eq!(doc["parameters"][0]["in"], "query");
        assert_eq!(doc["responses"]["204"], json!({ "description": "Nothing" }));
        assert_eq!(doc["deprecated"], true);
        assert!(doc.get("security").is_none());
    }

    #[test]
    fn duplicate_response_status_is_rejected() {
        let mut spec = crate::spec::SpecificationBuilder::new("Things", "1.0.0")
            .build()
            .unwrap();
        let err = spec
            .get("listThings", "/things")
            .unwrap()
            .response(200, "First", None)
            .unwrap()
            .response(200, "Second", None)
            .unwrap_err();
        assert!(matches!(
            err,
            SpecError::InvalidConfiguration { ref message } if message.contains("200")
        ));
    }
}
