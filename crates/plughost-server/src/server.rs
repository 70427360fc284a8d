//! HTTP server implementation

use crate::handler::RequestHandler;
use crate::shutdown::ShutdownSignal;
use crate::RuntimeState;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use plughost_config::Config;
use plughost_core::{Error, Middleware, Result};
use plughost_runtime::{
    ModuleLoader, PluginHost, PluginMiddleware, PluginSource, UnloadObserver,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// HTTP server
pub struct Server {
    config: Config,
    host: Arc<PluginHost>,
    handler: RequestHandler,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.config.server.listen)
            .field("routes", &self.config.routes.len())
            .field("handler", &self.handler)
            .finish()
    }
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Get listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.server.listen
    }

    /// Plugin host serving the configured routes
    pub fn host(&self) -> &Arc<PluginHost> {
        &self.host
    }

    /// Request handler
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.listen).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        *self.state.write().await = RuntimeState::Running;

        let local_addr = listener.local_addr()?;
        tracing::info!(
            listen = %local_addr,
            routes = self.config.routes.len(),
            "Server listening"
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::trace!(remote = %addr, "Accepted connection");

                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let handler = handler.clone();
                                    async move { handler.handle(req, Some(addr)).await }
                                });

                                let io = TokioIo::new(stream);
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    tracing::error!(error = %e, "HTTP connection error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        *self.state.write().await = RuntimeState::ShuttingDown;
        self.drain().await;

        let closed = self.host.shutdown();
        let stats = self.host.stats();
        tracing::info!(
            loaded = stats.loaded,
            unloaded = stats.unloaded,
            libraries_closed = closed,
            "Plugin host stopped"
        );

        *self.state.write().await = RuntimeState::Stopped;
        tracing::info!("Server stopped");

        Ok(())
    }

    /// Wait for in-flight requests, up to the shutdown timeout
    async fn drain(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start = std::time::Instant::now();

        tracing::info!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );

        loop {
            let active = self.handler.in_flight();
            if active == 0 {
                tracing::info!("All requests completed, shutting down cleanly");
                break;
            }

            if start.elapsed() >= shutdown_timeout {
                tracing::warn!(
                    active_requests = active,
                    "Shutdown timeout reached, forcing shutdown"
                );
                break;
            }

            tracing::debug!(
                active_requests = active,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for active requests to complete"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Server builder
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    loader: Option<Arc<dyn ModuleLoader>>,
    observer: Option<Arc<dyn UnloadObserver>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("custom_loader", &self.loader.is_some())
            .field("observer", &self.observer)
            .finish()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load modules through `loader` instead of the dynamic loader
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Report unload outcomes to `observer` instead of the log
    pub fn observer(mut self, observer: Arc<dyn UnloadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("Configuration is required".to_string()))?;
        plughost_config::validate_config(&config)?;

        let mut host = PluginHost::builder().max_attempts(config.plugins.verify.max_attempts);
        if let Some(root) = &config.plugins.root {
            host = host.root(root.clone());
        }
        if let Some(loader) = self.loader {
            host = host.loader(loader);
        }
        if let Some(observer) = self.observer {
            host = host.observer(observer);
        }
        let host = Arc::new(
            host.build()
                .map_err(|e| Error::Runtime(format!("Failed to create plugin host: {e}")))?,
        );

        let middleware_chain: Vec<Arc<dyn Middleware>> = config
            .routes
            .iter()
            .map(|route| {
                tracing::info!(
                    plugin = %route.name,
                    module_path = %route.module_path,
                    entry_type = %route.entry_type,
                    "Registered plugin route"
                );
                Arc::new(PluginMiddleware::new(
                    Arc::clone(&host),
                    PluginSource::new(&route.name, &route.module_path, &route.entry_type),
                )) as Arc<dyn Middleware>
            })
            .collect();

        Ok(Server {
            config,
            host,
            handler: RequestHandler::new(middleware_chain),
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: ShutdownSignal::new(),
        })
    }
}
