//! # plughost Core
//!
//! Core types, traits, and error handling shared by the plughost host crates.
//!
//! This crate provides the host pipeline abstractions the plugin runtime plugs into:
//! - Request context
//! - Middleware trait and the `Next` continuation
//! - Error types and their HTTP status mapping
//! - Response helpers

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod middleware;
pub mod request;
pub mod response;

pub use error::{Error, Result};
pub use middleware::{Body, Middleware, Next};
pub use request::RequestContext;
pub use response::{responses, ResponseBuilder};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::middleware::{Body, Middleware, Next};
    pub use crate::request::RequestContext;
    pub use crate::response::{responses, ResponseBuilder};
}
