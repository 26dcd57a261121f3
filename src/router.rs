//! Route registration glue between endpoints and a transport.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use http::Method;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::pipeline::{IncomingRequest, Response, ResponseWriter};

/// One registered operation in transport form.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    /// Path with `:name` placeholders.
    pub path: String,
    pub endpoint: Arc<Endpoint>,
}

/// Receives each endpoint as soon as it is defined.
pub trait RouteRegistrar: Send + Sync {
    fn register(&self, route: Route);
}

/// Convert a `{name}` path template into `:name` form.
pub fn to_transport_path(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
        out.push(':');
        out.push_str(&name);
    }
    out
}

/// Minimal in-process router: matches method and `:name` path segments.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the endpoint for a concrete request path, with captured path
    /// parameters.
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<Endpoint>, HashMap<String, String>)> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                match_path(&route.path, path).map(|params| (Arc::clone(&route.endpoint), params))
            })
    }

    /// Route a request to its endpoint and run it. Returns `None` when no
    /// route matches; the transport decides what a miss looks like.
    pub async fn dispatch(
        &self,
        mut request: IncomingRequest,
        writer: &mut dyn ResponseWriter,
    ) -> Option<Response> {
        let (endpoint, params) = self.find(&request.method, &request.path)?;
        request.path_params.extend(params);
        Some(endpoint.call(request, writer).await)
    }
}

impl RouteRegistrar for RouteTable {
    fn register(&self, route: Route) {
        debug!(method = %route.method, path = %route.path, "route registered");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route);
    }
}

fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pattern.len() != path.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (expected, actual) in pattern.iter().zip(&path) {
        match expected.strip_prefix(':') {
            Some(name) if !actual.is_empty() => {
                params.insert(name.to_string(), actual.to_string());
            }
            Some(_) => return None,
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}
