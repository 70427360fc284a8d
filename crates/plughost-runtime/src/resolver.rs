//! Plugin source to descriptor resolution

use crate::error::ResolutionError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Placeholder expanded to the platform's shared library prefix (`lib` on Unix)
pub const DLL_PREFIX_PLACEHOLDER: &str = "{dll_prefix}";

/// Placeholder expanded to the platform's shared library suffix (`.so`, `.dylib`, `.dll`)
pub const DLL_SUFFIX_PLACEHOLDER: &str = "{dll_suffix}";

/// Raw routing configuration for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSource {
    /// Name used in logs and errors
    pub name: String,

    /// Module path, relative to the plugin root or absolute
    pub module_path: String,

    /// Fully qualified entry type name inside the module
    pub entry_type: String,
}

impl PluginSource {
    /// Create a new plugin source
    pub fn new(
        name: impl Into<String>,
        module_path: impl Into<String>,
        entry_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module_path: module_path.into(),
            entry_type: entry_type.into(),
        }
    }
}

/// Resolved, loadable description of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Name used in logs and errors
    pub plugin: String,

    /// Absolute, normalized module path
    pub module_path: PathBuf,

    /// Entry type to look up in the module
    pub entry_type_name: String,
}

/// Turns plugin sources into descriptors against a fixed root
///
/// Pure path arithmetic: the filesystem is never touched, so a missing
/// module surfaces later as a load error.
#[derive(Debug, Clone)]
pub struct DescriptorResolver {
    root: PathBuf,
}

impl DescriptorResolver {
    /// Create a resolver anchored at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a resolver anchored at the current working directory
    pub fn from_current_dir() -> Result<Self, ResolutionError> {
        std::env::current_dir()
            .map(Self::new)
            .map_err(ResolutionError::CurrentDir)
    }

    /// Root relative module paths are joined onto
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `source` into a descriptor
    pub fn resolve(&self, source: &PluginSource) -> Result<PluginDescriptor, ResolutionError> {
        if source.module_path.trim().is_empty() {
            return Err(ResolutionError::EmptyModulePath {
                plugin: source.name.clone(),
            });
        }
        if source.entry_type.trim().is_empty() {
            return Err(ResolutionError::EmptyEntryType {
                plugin: source.name.clone(),
            });
        }

        let expanded = expand_module_path(&source.module_path);
        let joined = self.root.join(&expanded);
        let module_path = normalize(&joined).ok_or_else(|| ResolutionError::EscapesRoot {
            plugin: source.name.clone(),
            path: source.module_path.clone(),
        })?;

        if !module_path.is_absolute() {
            return Err(ResolutionError::NotAbsolute {
                plugin: source.name.clone(),
                path: module_path,
            });
        }

        Ok(PluginDescriptor {
            plugin: source.name.clone(),
            module_path,
            entry_type_name: source.entry_type.trim().to_string(),
        })
    }
}

/// Expand library placeholders and unify separators
pub fn expand_module_path(raw: &str) -> String {
    raw.replace(DLL_PREFIX_PLACEHOLDER, std::env::consts::DLL_PREFIX)
        .replace(DLL_SUFFIX_PLACEHOLDER, std::env::consts::DLL_SUFFIX)
        .chars()
        .map(|c| if c == '\\' || c == '/' { MAIN_SEPARATOR } else { c })
        .collect()
}

/// Lexically resolve `.` and `..`; `None` if `..` climbs above the root
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    if out.has_root() {
                        return None;
                    }
                    out.push("..");
                } else {
                    out.pop();
                    depth -= 1;
                }
            }
            Component::Normal(segment) => {
                out.push(segment);
                depth += 1;
            }
        }
    }
    Some(out)
}
