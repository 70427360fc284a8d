//! Runtime error types

use plughost_core::Error as CoreError;
use plughost_plugin_api::ContextId;
use std::fmt;
use std::path::{Path, PathBuf};

/// Descriptor could not be derived from a plugin source
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// Module path is empty
    #[error("Plugin '{plugin}' has an empty module path")]
    EmptyModulePath {
        /// Plugin name
        plugin: String,
    },

    /// Entry type name is empty
    #[error("Plugin '{plugin}' has an empty entry type name")]
    EmptyEntryType {
        /// Plugin name
        plugin: String,
    },

    /// Resolved path is not absolute
    #[error("Plugin '{plugin}' resolved to a relative path: {}", .path.display())]
    NotAbsolute {
        /// Plugin name
        plugin: String,
        /// Offending path
        path: PathBuf,
    },

    /// `..` segments climb above the filesystem root
    #[error("Plugin '{plugin}' module path escapes the filesystem root: {path}")]
    EscapesRoot {
        /// Plugin name
        plugin: String,
        /// Module path as configured
        path: String,
    },

    /// Working directory could not be determined
    #[error("Cannot determine plugin root: {0}")]
    CurrentDir(#[source] std::io::Error),
}

/// Module could not be loaded into a boundary
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No module at the resolved path
    #[error("Module not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The dynamic loader rejected the file
    #[error("Failed to open module {}: {message}", .path.display())]
    Open {
        /// Module path
        path: PathBuf,
        /// Loader message
        message: String,
    },

    /// The module does not export a declaration
    #[error("Module {} has no plugin declaration: {message}", .path.display())]
    MissingDeclaration {
        /// Module path
        path: PathBuf,
        /// Loader message
        message: String,
    },

    /// The module was built against an incompatible SDK
    #[error(
        "Module {} was built against plugin API {module_version}, host provides {host_version}",
        .path.display()
    )]
    Incompatible {
        /// Module path
        path: PathBuf,
        /// SDK version declared by the module
        module_version: String,
        /// SDK version of the host
        host_version: String,
    },

    /// The blocking load task did not complete
    #[error("Module load task failed: {0}")]
    Worker(String),
}

impl LoadError {
    /// Create a new open error
    pub fn open(path: &Path, msg: impl fmt::Display) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            message: msg.to_string(),
        }
    }

    /// Create a new missing declaration error
    pub fn missing_declaration(path: &Path, msg: impl fmt::Display) -> Self {
        Self::MissingDeclaration {
            path: path.to_path_buf(),
            message: msg.to_string(),
        }
    }
}

/// An endpoint failed or panicked while executing
#[derive(Debug, thiserror::Error)]
#[error("Plugin '{plugin}' failed in {entry_type}: {message}")]
pub struct ExecutionError {
    /// Plugin name
    pub plugin: String,

    /// Entry type that was executing
    pub entry_type: String,

    /// Boundary the endpoint ran in
    pub context_id: ContextId,

    /// Failure description
    pub message: String,

    /// Whether the endpoint panicked rather than returning an error
    pub panicked: bool,
}

/// Runtime error type
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Resolution error
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Load error
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The module loaded but does not define the requested entry type
    #[error("Entry type '{entry_type}' not found in module {}", .module_path.display())]
    TypeResolution {
        /// Requested entry type
        entry_type: String,
        /// Module that was searched
        module_path: PathBuf,
        /// Entry types the module does define
        available: Vec<String>,
    },

    /// Execution error
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a new invalid state error
    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    /// Convert into a pipeline error attributed to `plugin`
    pub fn into_core(self, plugin: &str) -> CoreError {
        match self {
            Self::Execution(err) => err.into(),
            other => CoreError::plugin(plugin, other.to_string()),
        }
    }
}

impl From<ExecutionError> for CoreError {
    fn from(err: ExecutionError) -> Self {
        CoreError::plugin(err.plugin.clone(), err.to_string())
    }
}
