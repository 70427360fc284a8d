//! Configuration builder

use crate::types::{
    Config, LogFormat, ObservabilityConfig, PluginsConfig, RouteConfig, ServerConfig,
};
use plughost_core::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    listen: Option<SocketAddr>,
    shutdown_timeout: Option<Duration>,
    plugins: PluginsConfig,
    routes: Vec<RouteConfig>,
    observability: ObservabilityConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Set graceful shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set plugin root
    pub fn plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugins.root = Some(root.into());
        self
    }

    /// Set unload verification attempts
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.plugins.verify.max_attempts = max_attempts;
        self
    }

    /// Add a plugin route
    pub fn route(
        mut self,
        name: impl Into<String>,
        module_path: impl Into<String>,
        entry_type: impl Into<String>,
    ) -> Self {
        self.routes.push(RouteConfig {
            name: name.into(),
            module_path: module_path.into(),
            entry_type: entry_type.into(),
        });
        self
    }

    /// Set log format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.observability.logging.format = format;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let listen = self
            .listen
            .ok_or_else(|| Error::Config("listen address is required".to_string()))?;

        let config = Config {
            server: ServerConfig {
                listen,
                shutdown_timeout: self.shutdown_timeout.unwrap_or(Duration::from_secs(30)),
            },
            plugins: self.plugins,
            routes: self.routes,
            observability: self.observability,
        };
        crate::validator::validate_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        let config = ConfigBuilder::new()
            .listen(addr)
            .plugin_root("/opt/plughost")
            .max_attempts(3)
            .route("test", "{dll_prefix}test_endpoint{dll_suffix}", "test_endpoint::AnEndpoint")
            .build()
            .unwrap();

        assert_eq!(config.server.listen, addr);
        assert_eq!(config.plugins.verify.max_attempts, 3);
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_builder_missing_listen() {
        assert!(ConfigBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_validates() {
        let result = ConfigBuilder::new()
            .listen("127.0.0.1:8080".parse().unwrap())
            .route("dup", "a", "A")
            .route("dup", "b", "B")
            .build();
        assert!(result.is_err());
    }
}
