//! The per-request plugin pipeline
//!
//! `resolve -> load -> match -> dispatch -> unload`, then verification in the
//! background.

use crate::dispatcher::Dispatcher;
use crate::error::{ExecutionError, Result, RuntimeError};
use crate::isolation::{IsolationManager, IsolationStats, UnloadHandle};
use crate::loader::{DynamicLoader, ModuleLoader};
use crate::matcher::RouteMatcher;
use crate::resolver::{DescriptorResolver, PluginDescriptor, PluginSource};
use crate::verifier::{LoggingObserver, UnloadObserver, UnloadOutcome, UnloadVerifier};
use http::Request;
use http_body_util::BodyExt;
use plughost_core::{Body, RequestContext};
use plughost_plugin_api::{
    BoxTask, EndpointContext, ResponseWriter, RouteSpec, ScopeAnchor, TaskSpawner,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

/// Spawns endpoint background work on the host's Tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSpawner;

impl TaskSpawner for HostSpawner {
    fn spawn(&self, task: BoxTask, anchor: Arc<dyn ScopeAnchor>) {
        tokio::spawn(async move {
            task.await;
            drop(anchor);
        });
    }
}

/// What one pass through the pipeline produced
#[derive(Debug)]
pub struct Processed {
    /// The request, handed back for the rest of the pipeline
    pub request: Request<Body>,

    /// Route the entry type matched, `None` if it did not match
    pub route: Option<RouteSpec>,

    /// Whatever the endpoint wrote, present only if it was dispatched
    pub response: Option<ResponseWriter>,

    /// Failure raised by the endpoint
    pub error: Option<ExecutionError>,

    /// Handle on the already unloaded boundary
    pub unload: UnloadHandle,
}

impl Processed {
    /// Whether an endpoint instance ran
    pub fn dispatched(&self) -> bool {
        self.route.is_some()
    }

    /// Whether the endpoint started a response
    pub fn response_started(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(ResponseWriter::has_started)
    }
}

/// Result of loading a plugin without serving a request
#[derive(Debug, Clone, serde::Serialize)]
pub struct Inspection {
    /// Resolved descriptor
    pub descriptor: PluginDescriptor,

    /// Route the entry type declares
    pub route: Option<RouteSpec>,

    /// Verified unload of the inspection boundary
    pub outcome: UnloadOutcome,
}

/// Runs plugins in fresh isolation boundaries
#[derive(Debug)]
pub struct PluginHost {
    resolver: DescriptorResolver,
    isolation: IsolationManager,
    matcher: RouteMatcher,
    dispatcher: Dispatcher,
    verifier: UnloadVerifier,
    observer: Arc<dyn UnloadObserver>,
}

impl PluginHost {
    /// Create a builder
    pub fn builder() -> PluginHostBuilder {
        PluginHostBuilder::default()
    }

    /// Resolver used for plugin sources
    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    /// Run `source` against `req`
    ///
    /// The boundary is unloaded before this returns, whatever the outcome of
    /// dispatch. Resolution, load, and type resolution failures are returned
    /// as errors; endpoint failures are reported in [`Processed::error`].
    pub async fn process(&self, source: &PluginSource, req: Request<Body>) -> Result<Processed> {
        let descriptor = self.resolver.resolve(source)?;
        let mut context = self.isolation.load(&descriptor).await?;

        let span = info_span!("plugin", plugin = %descriptor.plugin, context_id = %context.id());

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        let (route, response, error) = {
            let entry = context
                .entry()
                .ok_or_else(|| RuntimeError::invalid_state("context unloaded before dispatch"))?;

            match self
                .matcher
                .matches(&entry, parts.method.as_str(), parts.uri.path())
            {
                None => {
                    debug!(
                        parent: &span,
                        method = %parts.method,
                        path = %parts.uri.path(),
                        "Request did not match plugin route"
                    );
                    (None, None, None)
                }
                Some(route) => {
                    let request_id = parts
                        .extensions
                        .get::<RequestContext>()
                        .map(|ctx| ctx.request_id.clone())
                        .unwrap_or_else(|| context.id().to_string());
                    let mut ctx = EndpointContext::new(
                        request_id,
                        parts.method.clone(),
                        parts.uri.clone(),
                        parts.headers.clone(),
                        body.clone(),
                        entry.scope(),
                    );
                    let result = self
                        .dispatcher
                        .dispatch(&entry, &mut ctx)
                        .instrument(span.clone())
                        .await;
                    (Some(route), Some(ctx.into_response().detach()), result.err())
                }
            }
        };

        let unload = context.unload();
        drop(context);

        Ok(Processed {
            request: Request::from_parts(parts, Body::new(body)),
            route,
            response,
            error,
            unload,
        })
    }

    /// Verify `unload` on a background task and report to the observer
    pub fn verify_in_background(&self, unload: UnloadHandle) -> JoinHandle<UnloadOutcome> {
        let verifier = self.verifier;
        let observer = Arc::clone(&self.observer);
        tokio::spawn(async move {
            let outcome = verifier.verify(unload).await;
            observer.observe(&outcome);
            outcome
        })
    }

    /// Load `source`, read its route, and verify its unload inline
    pub async fn inspect(&self, source: &PluginSource) -> Result<Inspection> {
        let descriptor = self.resolver.resolve(source)?;
        let mut context = self.isolation.load(&descriptor).await?;
        let route = context.entry().and_then(|entry| entry.route());
        let unload = context.unload();
        drop(context);

        let outcome = self.verifier.verify(unload).await;
        self.observer.observe(&outcome);

        Ok(Inspection {
            descriptor,
            route,
            outcome,
        })
    }

    /// Load and unload activity so far
    pub fn stats(&self) -> IsolationStats {
        self.isolation.stats()
    }

    /// Close every library released so far
    pub fn shutdown(&self) -> usize {
        self.isolation.reclaim_all()
    }
}

/// Builder for [`PluginHost`]
#[derive(Default)]
pub struct PluginHostBuilder {
    root: Option<PathBuf>,
    loader: Option<Arc<dyn ModuleLoader>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
    observer: Option<Arc<dyn UnloadObserver>>,
    verifier: UnloadVerifier,
}

impl PluginHostBuilder {
    /// Root relative module paths resolve against (default: working directory)
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Module loader (default: [`DynamicLoader`])
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Spawner handed to endpoint code (default: [`HostSpawner`])
    pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Receiver of unload outcomes (default: [`LoggingObserver`])
    pub fn observer(mut self, observer: Arc<dyn UnloadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reclamation cycles before an unload is reported as a leak
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.verifier = UnloadVerifier::new(max_attempts);
        self
    }

    /// Build the host
    pub fn build(self) -> Result<PluginHost> {
        let resolver = match self.root {
            Some(root) => DescriptorResolver::new(root),
            None => DescriptorResolver::from_current_dir()?,
        };
        let loader = self.loader.unwrap_or_else(|| Arc::new(DynamicLoader::new()));
        let spawner = self.spawner.unwrap_or_else(|| Arc::new(HostSpawner));

        Ok(PluginHost {
            resolver,
            isolation: IsolationManager::new(loader, spawner),
            matcher: RouteMatcher::new(),
            dispatcher: Dispatcher::new(),
            verifier: self.verifier,
            observer: self.observer.unwrap_or_else(|| Arc::new(LoggingObserver)),
        })
    }
}

impl fmt::Debug for PluginHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHostBuilder")
            .field("root", &self.root)
            .field("custom_loader", &self.loader.is_some())
            .field("spawner", &self.spawner)
            .field("observer", &self.observer)
            .field("verifier", &self.verifier)
            .finish()
    }
}
