//! Pipeline middleware running one plugin per request

use crate::host::{PluginHost, Processed};
use crate::resolver::PluginSource;
use async_trait::async_trait;
use http::{Request, Response};
use plughost_core::{Body, Middleware, Next, Result};
use std::sync::Arc;
use tracing::warn;

/// Runs `source` in a fresh boundary for every request
///
/// If the endpoint started a response, that response is returned and the
/// rest of the pipeline is skipped, even when the endpoint failed afterwards.
/// If it failed without starting one, the failure is returned. Otherwise the
/// request continues down the pipeline, exactly once.
#[derive(Debug, Clone)]
pub struct PluginMiddleware {
    host: Arc<PluginHost>,
    source: PluginSource,
}

impl PluginMiddleware {
    /// Create a middleware serving `source` through `host`
    pub fn new(host: Arc<PluginHost>, source: PluginSource) -> Self {
        Self { host, source }
    }

    /// Plugin this middleware serves
    pub fn source(&self) -> &PluginSource {
        &self.source
    }
}

#[async_trait]
impl Middleware for PluginMiddleware {
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
        let Processed {
            request,
            response,
            error,
            unload,
            ..
        } = self
            .host
            .process(&self.source, req)
            .await
            .map_err(|e| e.into_core(&self.source.name))?;

        self.host.verify_in_background(unload);

        match (response, error) {
            (Some(written), error) if written.has_started() => {
                if let Some(error) = error {
                    warn!(
                        plugin = %self.source.name,
                        error = %error,
                        "Endpoint failed after starting its response"
                    );
                }
                Ok(written.into_http())
            }
            (_, Some(error)) => Err(error.into()),
            _ => next.run(request).await,
        }
    }
}
