//! Endpoint capability trait and route metadata

use crate::context::EndpointContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// Route an entry type serves: one method and one exact path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteSpec {
    /// HTTP method token (compared case-insensitively)
    pub method: Cow<'static, str>,

    /// Exact request path (compared case-insensitively)
    pub path: Cow<'static, str>,
}

impl RouteSpec {
    /// Route over static strings, usable in `const` position
    pub const fn new(method: &'static str, path: &'static str) -> Self {
        Self {
            method: Cow::Borrowed(method),
            path: Cow::Borrowed(path),
        }
    }

    /// Route over owned strings
    pub fn owned(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Cow::Owned(method.into()),
            path: Cow::Owned(path.into()),
        }
    }

    /// Copy into freshly allocated strings
    ///
    /// A route declared in a module borrows the module's static data; the
    /// host detaches it before the module can be closed.
    pub fn detach(&self) -> Self {
        Self::owned(self.method.as_ref(), self.path.as_ref())
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.to_uppercase(), self.path)
    }
}

/// The single capability an entry type exposes
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Handle the request
    ///
    /// The endpoint writes its response through [`EndpointContext::response`].
    /// Returning without writing leaves the request to the rest of the host
    /// pipeline.
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<()>;
}

/// A default-constructible endpoint with type-level route metadata
pub trait EndpointType: Endpoint + Default + 'static {
    /// Route this type serves. `None` never matches.
    const ROUTE: Option<RouteSpec> = None;
}

/// Host-facing view of an entry type
///
/// Object safe, so the host can hold entry types from any module behind one
/// table without knowing their concrete types.
pub trait EntryType: Send + Sync {
    /// Declared route, read without instantiating
    fn route(&self) -> Option<RouteSpec>;

    /// Default-construct one instance
    fn instantiate(&self) -> Box<dyn Endpoint>;
}

struct TypedEntry<T>(PhantomData<fn() -> T>);

impl<T: EndpointType> EntryType for TypedEntry<T> {
    fn route(&self) -> Option<RouteSpec> {
        T::ROUTE
    }

    fn instantiate(&self) -> Box<dyn Endpoint> {
        Box::new(T::default())
    }
}

/// Entry type table record for `T`
pub fn entry<T: EndpointType>() -> Box<dyn EntryType> {
    Box::new(TypedEntry::<T>(PhantomData))
}
