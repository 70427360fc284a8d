//! # plughost Runtime
//!
//! Runs plugin endpoints in per-request isolation boundaries.
//!
//! For every request a [`PluginMiddleware`] resolves its [`PluginSource`],
//! loads the module into a fresh boundary, reads the entry type's route,
//! dispatches one instance on a match, unloads the boundary, and hands
//! verification of the unload to a background task. A boundary that is still
//! referenced after the verifier's last attempt is reported as a leak.
//!
//! ## Example
//!
//! ```rust,no_run
//! use plughost_runtime::{PluginHost, PluginMiddleware, PluginSource};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Arc::new(PluginHost::builder().root("/srv/plugins").build()?);
//! let middleware = PluginMiddleware::new(
//!     host,
//!     PluginSource::new(
//!         "test",
//!         "{dll_prefix}test_endpoint{dll_suffix}",
//!         "test_endpoint::AnEndpoint",
//!     ),
//! );
//! # let _ = middleware;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod dispatcher;
pub mod error;
pub mod host;
pub mod isolation;
pub mod loader;
pub mod matcher;
pub mod middleware;
pub mod resolver;
pub mod verifier;

pub use dispatcher::Dispatcher;
pub use error::{ExecutionError, LoadError, ResolutionError, Result, RuntimeError};
pub use host::{HostSpawner, Inspection, PluginHost, PluginHostBuilder, Processed};
pub use isolation::{
    EntryInstance, EntryTypeHandle, IsolationContext, IsolationManager, IsolationStats,
    ReclaimState, UnloadHandle,
};
pub use loader::{DynamicLoader, LoadedModule, ModuleLoader, StaticLoader};
pub use matcher::RouteMatcher;
pub use middleware::PluginMiddleware;
pub use resolver::{DescriptorResolver, PluginDescriptor, PluginSource};
pub use verifier::{
    ChannelObserver, LoggingObserver, UnloadObserver, UnloadOutcome, UnloadVerifier,
    DEFAULT_MAX_ATTEMPTS,
};
