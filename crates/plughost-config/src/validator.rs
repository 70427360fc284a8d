//! Configuration validation

use crate::Config;
use plughost_core::{Error, Result};
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_plugins(config)?;
    validate_routes(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    if config.server.shutdown_timeout.as_secs() > 300 {
        tracing::warn!("shutdown_timeout is very high (>5 minutes)");
    }
    Ok(())
}

fn validate_plugins(config: &Config) -> Result<()> {
    let verify = &config.plugins.verify;
    if verify.max_attempts == 0 {
        return Err(Error::Config(
            "plugins.verify.max_attempts must be > 0".to_string(),
        ));
    }
    if verify.max_attempts > 1_000 {
        tracing::warn!(
            max_attempts = verify.max_attempts,
            "Unload verification attempts are very high"
        );
    }

    if let Some(root) = &config.plugins.root {
        if !root.is_absolute() {
            tracing::warn!(
                root = %root.display(),
                "Plugin root is relative; resolving against the working directory"
            );
        }
    }

    Ok(())
}

fn validate_routes(config: &Config) -> Result<()> {
    let mut names = HashSet::new();

    for route in &config.routes {
        if route.name.trim().is_empty() {
            return Err(Error::Config("route name cannot be empty".to_string()));
        }

        if !names.insert(route.name.as_str()) {
            return Err(Error::Config(format!(
                "Duplicate route name: {}",
                route.name
            )));
        }

        if route.module_path.trim().is_empty() {
            return Err(Error::Config(format!(
                "Route '{}' has an empty module_path",
                route.name
            )));
        }

        if route.entry_type.trim().is_empty() {
            return Err(Error::Config(format!(
                "Route '{}' has an empty entry_type",
                route.name
            )));
        }
    }

    if config.routes.is_empty() {
        tracing::warn!("No plugin routes configured");
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    if config.observability.logging.level.trim().is_empty() {
        return Err(Error::Config("logging level cannot be empty".to_string()));
    }
    Ok(())
}
