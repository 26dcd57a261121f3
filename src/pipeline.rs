//! Per-call pipeline: parse, validate request, execute, validate response,
//! report.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::compiler::CompiledSchema;
use crate::endpoint::Endpoint;
use crate::error::{CallError, JsonValidationError, ParameterTypeError};
use crate::params::convert;
use crate::types::ParamLocation;
use crate::validator::{OptionsProvider, SchemaValidator};

/// Raw request as handed over by the transport.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl IncomingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            path_params: HashMap::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Add a header. Names or values that are not valid HTTP are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "dropping invalid request header"),
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn raw(&self, location: ParamLocation, name: &str) -> Option<String> {
        match location {
            ParamLocation::Query => self.query.get(name).cloned(),
            ParamLocation::Path => self.path_params.get(name).cloned(),
            ParamLocation::Header => self
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// Converted request values handed to the handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub operation_id: String,
    pub query: Map<String, Value>,
    pub params: Map<String, Value>,
    /// Keyed by lower-cased header name.
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
    pub request: Arc<IncomingRequest>,
}

impl CallContext {
    fn new(operation_id: &str, request: Arc<IncomingRequest>) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            query: Map::new(),
            params: Map::new(),
            headers: Map::new(),
            body: request.body.clone(),
            request,
        }
    }

    pub fn query_value(&self, name: &str) -> Option<&Value> {
        self.query.get(name)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    fn bucket_mut(&mut self, location: ParamLocation) -> &mut Map<String, Value> {
        match location {
            ParamLocation::Query => &mut self.query,
            ParamLocation::Path => &mut self.params,
            ParamLocation::Header => &mut self.headers,
        }
    }

    /// Composite instance validated against the endpoint's request schema.
    pub fn instance(&self) -> Value {
        let mut instance = json!({
            "query": self.query,
            "params": self.params,
            "headers": self.headers,
        });
        if let (Some(body), Value::Object(map)) = (&self.body, &mut instance) {
            map.insert("body".to_string(), body.clone());
        }
        instance
    }
}

/// Response record produced by a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    /// Set when the handler already wrote to the transport itself.
    pub handled: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            headers: HeaderMap::new(),
            handled: false,
        }
    }

    pub fn json(status: StatusCode, body: Value) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = Some(body);
        response
    }

    pub fn ok(body: Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// Marker for a handler that produced the transport response itself.
    pub fn handled(status: StatusCode) -> Self {
        Self {
            handled: true,
            ..Self::new(status)
        }
    }

    pub fn internal_error() -> Self {
        Self::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "message": "internal server error" }),
        )
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn for_error(error: &CallError) -> Self {
        match error {
            CallError::ParameterType(e) => Self::json(
                StatusCode::BAD_REQUEST,
                e.clone().into_validation_error().to_body(),
            ),
            CallError::Request(e) => Self::json(StatusCode::BAD_REQUEST, e.to_body()),
            CallError::Response(_) | CallError::Internal(_) => Self::internal_error(),
        }
    }
}

/// What a handler returns: a JSON body for a 200, or a full response.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Response(Response),
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

/// Transport side of a call.
#[async_trait]
pub trait ResponseWriter: Send {
    async fn write(&mut self, response: &Response) -> anyhow::Result<()>;
}

/// Writer that keeps responses in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub written: Vec<Response>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Response> {
        self.written.last()
    }
}

#[async_trait]
impl ResponseWriter for MemoryWriter {
    async fn write(&mut self, response: &Response) -> anyhow::Result<()> {
        self.written.push(response.clone());
        Ok(())
    }
}

/// Identifies the call an outcome belongs to.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub operation_id: String,
    pub method: Method,
    pub path: String,
}

/// Receives the outcome of every call, once, after the response is sent.
/// `error` is the first failure the pipeline observed, if any.
pub trait ErrorSink: Send + Sync {
    fn report(&self, call: &CallSummary, response: &Response, error: Option<&CallError>);
}

/// Default sink: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, call: &CallSummary, response: &Response, error: Option<&CallError>) {
        let Some(error) = error else {
            debug!(
                operation_id = %call.operation_id,
                method = %call.method,
                path = %call.path,
                status = response.status.as_u16(),
                "call completed"
            );
            return;
        };
        match error {
            CallError::Internal(e) => error!(
                operation_id = %call.operation_id,
                status = response.status.as_u16(),
                "handler failed: {:#}",
                e
            ),
            CallError::Response(e) => warn!(
                operation_id = %call.operation_id,
                status = response.status.as_u16(),
                errors = ?e.messages(),
                "response failed validation"
            ),
            other => debug!(
                operation_id = %call.operation_id,
                status = response.status.as_u16(),
                "request rejected: {}",
                other
            ),
        }
    }
}

/// Hooks shared by every endpoint of one specification.
pub(crate) struct CallHooks {
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) options_provider: Option<Arc<dyn OptionsProvider>>,
}

/// Map a handler failure to the pipeline's error taxonomy.
fn classify(err: anyhow::Error) -> CallError {
    match err.downcast::<JsonValidationError>() {
        Ok(e) => CallError::Request(e),
        Err(err) => match err.downcast::<ParameterTypeError>() {
            Ok(e) => CallError::ParameterType(e),
            Err(err) => CallError::Internal(err),
        },
    }
}

impl Endpoint {
    /// Run one request through the full pipeline and hand the response to
    /// `writer`. Never fails: every fault becomes a response.
    pub async fn call(&self, request: IncomingRequest, writer: &mut dyn ResponseWriter) -> Response {
        let summary = CallSummary {
            operation_id: self.operation_id.clone(),
            method: request.method.clone(),
            path: request.path.clone(),
        };

        let (mut response, mut failure) = match self.process(Arc::new(request)).await {
            Ok(response) => (response, None),
            Err(error) => (Response::for_error(&error), Some(error)),
        };

        if !response.handled {
            if let Err(error) = self.check_response(&response).await {
                if failure.is_none() {
                    failure = Some(error);
                }
            }

            if let Err(e) = writer.write(&response).await {
                error!(operation_id = %self.operation_id, "failed to write response: {:#}", e);
                let fallback = Response::internal_error();
                if let Err(e) = writer.write(&fallback).await {
                    error!(operation_id = %self.operation_id, "failed to write fallback response: {:#}", e);
                }
                response = fallback;
                if failure.is_none() {
                    failure = Some(CallError::Internal(e));
                }
            }
        }

        self.hooks.sink.report(&summary, &response, failure.as_ref());
        response
    }

    async fn process(&self, request: Arc<IncomingRequest>) -> Result<Response, CallError> {
        let ctx = self.parse(request)?;
        self.validate_with(&self.request_schema, &self.request_validator, &ctx.instance())
            .await
            .map_err(|e| e.into_call_error(CallError::Request))?;

        match self.handler.handle(ctx).await {
            Ok(Reply::Json(body)) => Ok(Response::ok(body)),
            Ok(Reply::Response(response)) => Ok(response),
            Err(err) => Err(classify(err)),
        }
    }

    /// Convert raw parameter strings into their declared primitive types.
    fn parse(&self, request: Arc<IncomingRequest>) -> Result<CallContext, ParameterTypeError> {
        let mut ctx = CallContext::new(&self.operation_id, Arc::clone(&request));
        for param in &self.parameters {
            let name = param.instance_name();
            let raw = request.raw(param.location, &name);
            let value = convert(param.kind, raw.as_deref()).map_err(|e| ParameterTypeError {
                location: param.location,
                name: name.clone(),
                value: e.value,
                expected: e.expected,
            })?;
            if let Some(value) = value {
                ctx.bucket_mut(param.location).insert(name, value);
            }
        }
        Ok(ctx)
    }

    /// Validate the response body when a schema is declared for its status.
    async fn check_response(&self, response: &Response) -> Result<(), CallError> {
        let status = response.status.as_u16();
        let (Some(declared), Some(prebuilt)) = (
            self.responses.get(&status).and_then(|r| r.schema.as_ref()),
            self.response_validators.get(&status),
        ) else {
            return Ok(());
        };
        let body = response.body.clone().unwrap_or(Value::Null);
        self.validate_with(&declared.validation, prebuilt, &body)
            .await
            .map_err(|e| e.into_call_error(CallError::Response))
    }

    /// Validate with the prebuilt validator, or with one built from the
    /// options provider's per-call options when a provider is configured.
    async fn validate_with(
        &self,
        schema: &CompiledSchema,
        prebuilt: &SchemaValidator,
        instance: &Value,
    ) -> Result<(), Rejection> {
        let per_call;
        let validator = match &self.hooks.options_provider {
            Some(provider) => {
                let options = provider.options().await;
                per_call = SchemaValidator::build(schema, &self.env, &options)
                    .map_err(|e| Rejection::Build(e.into()))?;
                &per_call
            }
            None => prebuilt,
        };
        validator
            .validate_async(instance)
            .await
            .map_err(Rejection::Invalid)
    }
}

enum Rejection {
    Invalid(JsonValidationError),
    Build(anyhow::Error),
}

impl Rejection {
    fn into_call_error(self, invalid: fn(JsonValidationError) -> CallError) -> CallError {
        match self {
            Rejection::Invalid(e) => invalid(e),
            Rejection::Build(e) => CallError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::types::PrimitiveType;

    #[test]
    fn instance_omits_absent_body() {
        let request = Arc::new(IncomingRequest::new(Method::GET, "/things"));
        let ctx = CallContext::new("listThings", request);
        assert_eq!(
            ctx.instance(),
            json!({ "query": {}, "params": {}, "headers": {} })
        );
    }

    #[test]
    fn raw_header_lookup_is_case_insensitive() {
        let request = IncomingRequest::new(Method::GET, "/").with_header("X-Trace", "abc");
        assert_eq!(request.raw(ParamLocation::Header, "x-trace").as_deref(), Some("abc"));
    }

    #[test]
    fn invalid_header_is_dropped() {
        let request = IncomingRequest::new(Method::GET, "/").with_header("bad header", "x");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn classify_validation_errors_as_bad_request() {
        let err = anyhow::Error::new(JsonValidationError::new(
            json!(1),
            vec![SchemaError {
                path: "/body".into(),
                message: "nope".into(),
            }],
        ));
        let call_error = classify(err);
        assert!(matches!(call_error, CallError::Request(_)));
        assert_eq!(Response::for_error(&call_error).status, StatusCode::BAD_REQUEST);

        let err = anyhow::Error::new(ParameterTypeError {
            location: ParamLocation::Query,
            name: "limit".into(),
            value: "x".into(),
            expected: PrimitiveType::Number,
        });
        assert!(matches!(classify(err), CallError::ParameterType(_)));
    }

    #[test]
    fn other_handler_errors_are_internal() {
        let call_error = classify(anyhow::anyhow!("database down"));
        assert!(call_error.is_internal());
        let response = Response::for_error(&call_error);
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, Some(json!({ "message": "internal server error" })));
    }

    #[test]
    fn parameter_error_body_points_at_parameter() {
        let error = CallError::ParameterType(ParameterTypeError {
            location: ParamLocation::Path,
            name: "id".into(),
            value: "abc".into(),
            expected: PrimitiveType::Number,
        });
        let response = Response::for_error(&error);
        let body = response.body.unwrap();
        assert_eq!(body["errors"][0]["path"], "/params/id");
    }
}
