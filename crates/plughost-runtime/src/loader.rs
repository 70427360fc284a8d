//! Module loaders
//!
//! A loader turns a module path into a [`LoadedModule`]: the entry type table
//! the module registered plus, for dynamic modules, the library that keeps
//! their code mapped. Loaders never run endpoint code.

use crate::error::LoadError;
use dashmap::DashMap;
use libloading::Library;
use plughost_plugin_api::{
    EntryRegistrar, EntryType, ModuleDeclaration, API_VERSION, MODULE_DECLARATION_SYMBOL,
};
use semver::{Version, VersionReq};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Loads modules from module paths
#[cfg_attr(test, mockall::automock)]
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path`
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError>;
}

/// Entry types of one module together with the code backing them
pub struct LoadedModule {
    // Dropped before `library`.
    pub(crate) entries: HashMap<String, Box<dyn EntryType>>,
    pub(crate) library: Option<Library>,
}

impl LoadedModule {
    /// Register the entry types of `declaration`
    ///
    /// `library` must be the library `declaration` was read from, or `None`
    /// for modules linked into the host.
    pub fn from_declaration(
        path: &Path,
        declaration: &ModuleDeclaration,
        library: Option<Library>,
    ) -> Result<Self, LoadError> {
        check_api_version(path, declaration.api_version)?;

        let mut table = EntryTable::default();
        (declaration.register)(&mut table);
        debug!(
            module_path = %path.display(),
            entries = table.0.len(),
            "Registered module entry types"
        );

        Ok(Self {
            entries: table.0,
            library,
        })
    }

    /// Names of the entry types the module defines
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the module is backed by a dynamically loaded library
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("entries", &self.entry_names())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

#[derive(Default)]
struct EntryTable(HashMap<String, Box<dyn EntryType>>);

impl EntryRegistrar for EntryTable {
    fn register(&mut self, name: &str, entry: Box<dyn EntryType>) {
        self.0.insert(name.to_string(), entry);
    }
}

/// Accept modules whose SDK version is caret-compatible with the host's
fn check_api_version(path: &Path, module_version: &str) -> Result<(), LoadError> {
    let incompatible = || LoadError::Incompatible {
        path: path.to_path_buf(),
        module_version: module_version.to_string(),
        host_version: API_VERSION.to_string(),
    };

    let requirement = VersionReq::parse(&format!("^{API_VERSION}")).map_err(|_| incompatible())?;
    let version = Version::parse(module_version).map_err(|_| incompatible())?;
    if requirement.matches(&version) {
        Ok(())
    } else {
        Err(incompatible())
    }
}

/// Loads `cdylib` modules with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl DynamicLoader {
    /// Create a new dynamic loader
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for DynamicLoader {
    #[allow(unsafe_code)]
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // SAFETY: Loading a module runs its initializers; modules are trusted
        // host extensions built against this SDK.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::open(path, e))?;

        let declaration = {
            // SAFETY: `export_module!` exports the symbol as a `ModuleDeclaration`
            // static. The copy only holds `'static` data and fn pointers into
            // `library`, which outlives every use through `LoadedModule`.
            let symbol = unsafe {
                library.get::<*const ModuleDeclaration>(MODULE_DECLARATION_SYMBOL.as_bytes())
            }
            .map_err(|e| LoadError::missing_declaration(path, e))?;
            if symbol.is_null() {
                return Err(LoadError::missing_declaration(path, "null declaration"));
            }
            // SAFETY: Non-null and points at the exported static.
            unsafe { **symbol }
        };

        LoadedModule::from_declaration(path, &declaration, Some(library))
    }
}

/// Serves declarations of modules linked into the host binary
///
/// Lets built-in endpoints, and tests, go through the same isolation
/// pipeline as dynamic modules.
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    modules: Arc<DashMap<PathBuf, ModuleDeclaration>>,
}

impl StaticLoader {
    /// Create an empty static loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `declaration` for loads of `path`
    pub fn register(&self, path: impl Into<PathBuf>, declaration: ModuleDeclaration) {
        self.modules.insert(path.into(), declaration);
    }

    /// Stop serving `path`
    pub fn unregister(&self, path: &Path) -> bool {
        self.modules.remove(path).is_some()
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        let declaration = self
            .modules
            .get(path)
            .map(|entry| *entry.value())
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))?;
        LoadedModule::from_declaration(path, &declaration, None)
    }
}
