//! Request context and utilities

use http::Request;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Context attached to each request as an `http` extension
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID for tracing
    pub request_id: String,

    /// Remote client address, when the transport knows it
    pub remote_addr: Option<SocketAddr>,

    /// Request start time
    pub start_time: Instant,

    /// Custom metadata that middleware can attach
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    /// Create a new request context
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            remote_addr: None,
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a request context for a known client address
    pub fn with_remote_addr(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            ..Self::new()
        }
    }

    /// Get elapsed time since request start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get metadata value
    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Set metadata value
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Request ID of `req`, attaching a fresh context if none is present
    pub fn ensure_request_id<B>(req: &mut Request<B>) -> String {
        if let Some(ctx) = req.extensions().get::<RequestContext>() {
            return ctx.request_id.clone();
        }
        let ctx = RequestContext::new();
        let request_id = ctx.request_id.clone();
        req.extensions_mut().insert(ctx);
        request_id
    }

    /// Request ID attached to `req`, if any
    pub fn request_id_of<B>(req: &Request<B>) -> Option<&str> {
        req.extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.as_str())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
