//! # plughost Plugin API
//!
//! This crate is the SDK compiled into every plughost endpoint module.
//!
//! A module is a `cdylib` that exports one [`ModuleDeclaration`] (see
//! [`export_module!`]) listing its entry types. Each entry type implements
//! [`Endpoint`] and declares the single route it serves as a type-level
//! constant on [`EndpointType`]. The host loads the module into a fresh
//! isolation boundary per request, reads the route without instantiating the
//! type, and only on a match default-constructs it and calls
//! [`Endpoint::execute`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use plughost_plugin_api::prelude::*;
//!
//! #[derive(Debug, Default)]
//! pub struct Hello;
//!
//! #[async_trait]
//! impl Endpoint for Hello {
//!     async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
//!         ctx.response().write_str("hello");
//!         Ok(())
//!     }
//! }
//!
//! impl EndpointType for Hello {
//!     const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("get", "/hello"));
//! }
//!
//! plughost_plugin_api::export_module! {
//!     "hello::Hello" => Hello,
//! }
//! ```
//!
//! ## Isolation contract
//!
//! Everything an endpoint creates lives inside its boundary. The boundary is
//! released once the host drops every anchor into it; a [`BoundaryScope`]
//! (or a task spawned through one) is such an anchor. Keeping one alive past
//! the request keeps the module loaded and is reported by the host as a leak.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod endpoint;
pub mod error;
pub mod module;
pub mod scope;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types
pub use context::{EndpointContext, ResponseWriter};
pub use endpoint::{entry, Endpoint, EndpointType, EntryType, RouteSpec};
pub use error::PluginError;
pub use module::{
    EntryRegistrar, ModuleDeclaration, API_VERSION, MODULE_DECLARATION_SYMBOL,
};
pub use scope::{BoundaryScope, BoxTask, ContextId, ScopeAnchor, TaskSpawner};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::context::{EndpointContext, ResponseWriter};
    pub use crate::endpoint::{Endpoint, EndpointType, RouteSpec};
    pub use crate::error::PluginError;
    pub use crate::scope::BoundaryScope;
    pub use async_trait::async_trait;
}
