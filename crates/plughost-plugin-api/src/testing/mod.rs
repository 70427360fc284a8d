//! Testing utilities for plugin developers
//!
//! Lets an endpoint be exercised without a host: build an [`EndpointContext`]
//! around a detached boundary scope, run the endpoint, inspect the response.

pub mod builders;

pub use builders::{ContextBuilder, DetachedAnchor, TokioSpawner};

use crate::context::EndpointContext;
use crate::endpoint::EndpointType;
use crate::error::Result;

/// Default-construct `T` and execute it against `ctx`, the way the host does
pub async fn execute<T: EndpointType>(ctx: &mut EndpointContext) -> Result<()> {
    let endpoint = T::default();
    endpoint.execute(ctx).await
}
