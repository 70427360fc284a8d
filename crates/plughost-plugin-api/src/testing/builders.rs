//! Builder utilities for constructing test contexts

use crate::context::EndpointContext;
use crate::scope::{BoundaryScope, BoxTask, ContextId, ScopeAnchor, TaskSpawner};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use std::sync::Arc;

/// Anchor that is not attached to any host boundary
#[derive(Debug)]
pub struct DetachedAnchor {
    id: ContextId,
}

impl DetachedAnchor {
    /// Create a detached anchor with a fresh identity
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
        })
    }
}

impl ScopeAnchor for DetachedAnchor {
    fn context_id(&self) -> ContextId {
        self.id
    }

    fn is_unloading(&self) -> bool {
        false
    }
}

/// Spawner that runs tasks on the ambient Tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxTask, anchor: Arc<dyn ScopeAnchor>) {
        tokio::spawn(async move {
            task.await;
            drop(anchor);
        });
    }
}

/// Builder for test endpoint contexts
#[derive(Debug)]
pub struct ContextBuilder {
    request_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    anchor: Option<Arc<dyn ScopeAnchor>>,
}

impl ContextBuilder {
    /// Create a new builder for `GET /`
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            anchor: None,
        }
    }

    /// Create a GET request builder
    pub fn get(uri: &str) -> Self {
        Self::new().method(Method::GET).uri(uri)
    }

    /// Create a POST request builder
    pub fn post(uri: &str) -> Self {
        Self::new().method(Method::POST).uri(uri)
    }

    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the URI
    ///
    /// # Panics
    ///
    /// Panics if `uri` is not a valid URI.
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.parse().expect("invalid test URI");
        self
    }

    /// Add a header
    ///
    /// # Panics
    ///
    /// Panics if the name or value is invalid.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("invalid test header name"),
            HeaderValue::from_str(value).expect("invalid test header value"),
        );
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    /// Anchor the context to `anchor` instead of a fresh detached one
    pub fn anchor(mut self, anchor: Arc<dyn ScopeAnchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Build the context
    pub fn build(self) -> EndpointContext {
        let anchor = self
            .anchor
            .unwrap_or_else(|| DetachedAnchor::new() as Arc<dyn ScopeAnchor>);
        let scope = BoundaryScope::new(anchor, Arc::new(TokioSpawner));
        EndpointContext::new(
            self.request_id,
            self.method,
            self.uri,
            self.headers,
            self.body,
            scope,
        )
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
