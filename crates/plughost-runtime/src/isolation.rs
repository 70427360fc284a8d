//! Per-request isolation boundaries
//!
//! Each load creates a fresh [`Boundary`] owning one module's entry types
//! (and its library, for dynamic modules). The boundary lives exactly as long
//! as the strong references into it:
//!
//! - the [`IsolationContext`] that loaded it, until `unload()`,
//! - every [`EntryInstance`] instantiated from it,
//! - every [`BoundaryScope`] handed to endpoint code, and every task spawned
//!   through one.
//!
//! When the last one goes away the boundary's entry table is dropped and its
//! library queued on the [`Reaper`]. Libraries are closed by reclamation
//! cycles, never from the drop that released them, since that drop may run on
//! a stack that still has frames in the library. A boundary counts as
//! reclaimed once its library is closed, or as soon as it is dropped if the
//! module has no library.

use crate::error::{LoadError, Result, RuntimeError};
use crate::loader::ModuleLoader;
use crate::resolver::PluginDescriptor;
use libloading::Library;
use parking_lot::Mutex;
use plughost_plugin_api::{
    BoundaryScope, ContextId, Endpoint, EntryType, RouteSpec, ScopeAnchor, TaskSpawner,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Load and unload counters
#[derive(Debug, Default)]
struct Counters {
    loaded: AtomicU64,
    unloaded: AtomicU64,
}

/// Snapshot of isolation activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IsolationStats {
    /// Boundaries created
    pub loaded: u64,
    /// Unloads requested
    pub unloaded: u64,
    /// Libraries released but not yet closed
    pub pending_libraries: usize,
}

/// How far a boundary has been torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimState {
    /// Still referenced
    Live,
    /// Dropped, library waiting for a reclamation cycle
    Deferred,
    /// Dropped and its library closed
    Released,
}

/// Reclamation progress shared by a boundary and its unload handles
#[derive(Debug, Default)]
struct Reclamation(AtomicU8);

impl Reclamation {
    const LIVE: u8 = 0;
    const DEFERRED: u8 = 1;
    const RELEASED: u8 = 2;

    fn set(&self, state: ReclaimState) {
        let value = match state {
            ReclaimState::Live => Self::LIVE,
            ReclaimState::Deferred => Self::DEFERRED,
            ReclaimState::Released => Self::RELEASED,
        };
        self.0.store(value, Ordering::Release);
    }

    fn get(&self) -> ReclaimState {
        match self.0.load(Ordering::Acquire) {
            Self::LIVE => ReclaimState::Live,
            Self::DEFERRED => ReclaimState::Deferred,
            _ => ReclaimState::Released,
        }
    }
}

struct DeferredLibrary {
    context_id: ContextId,
    epoch: u64,
    library: Library,
    reclamation: Arc<Reclamation>,
}

/// Closes libraries of reclaimed boundaries
///
/// A library released during epoch `n` is closed by the first cycle that
/// starts after epoch `n` has ended, so at least one full cycle separates the
/// release from the close.
#[derive(Default)]
pub(crate) struct Reaper {
    epoch: AtomicU64,
    pending: Mutex<Vec<DeferredLibrary>>,
}

impl Reaper {
    fn defer(&self, context_id: ContextId, library: Library, reclamation: Arc<Reclamation>) {
        let epoch = self.epoch.load(Ordering::Acquire);
        let mut pending = self.pending.lock();
        // Marked before it becomes visible to a cycle that would release it.
        reclamation.set(ReclaimState::Deferred);
        pending.push(DeferredLibrary {
            context_id,
            epoch,
            library,
            reclamation,
        });
    }

    /// Run one reclamation cycle, returning how many libraries were closed
    pub(crate) fn collect(&self) -> usize {
        let current = self.epoch.fetch_add(1, Ordering::AcqRel);
        let ready: Vec<DeferredLibrary> = {
            let mut pending = self.pending.lock();
            let (ready, keep) = pending.drain(..).partition(|d| d.epoch < current);
            *pending = keep;
            ready
        };
        Self::close_all(ready)
    }

    /// Close every pending library regardless of epoch
    pub(crate) fn drain(&self) -> usize {
        let all = std::mem::take(&mut *self.pending.lock());
        Self::close_all(all)
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn close_all(libraries: Vec<DeferredLibrary>) -> usize {
        let count = libraries.len();
        for deferred in libraries {
            match deferred.library.close() {
                Ok(()) => debug!(context_id = %deferred.context_id, "Closed module library"),
                Err(e) => warn!(
                    context_id = %deferred.context_id,
                    error = %e,
                    "Failed to close module library"
                ),
            }
            deferred.reclamation.set(ReclaimState::Released);
        }
        count
    }
}

impl fmt::Debug for Reaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaper")
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("pending", &self.pending())
            .finish()
    }
}

/// One isolation boundary
pub(crate) struct Boundary {
    id: ContextId,
    plugin: String,
    unloading: AtomicBool,
    entries: HashMap<String, Box<dyn EntryType>>,
    library: Option<Library>,
    reaper: Arc<Reaper>,
    reclamation: Arc<Reclamation>,
}

impl ScopeAnchor for Boundary {
    fn context_id(&self) -> ContextId {
        self.id
    }

    fn is_unloading(&self) -> bool {
        self.unloading.load(Ordering::Acquire)
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        // Entry vtables live in the library.
        self.entries.clear();
        match self.library.take() {
            Some(library) => {
                self.reaper.defer(self.id, library, Arc::clone(&self.reclamation));
                debug!(
                    plugin = %self.plugin,
                    context_id = %self.id,
                    "Boundary dropped, library deferred"
                );
            }
            None => {
                self.reclamation.set(ReclaimState::Released);
                debug!(plugin = %self.plugin, context_id = %self.id, "Boundary reclaimed");
            }
        }
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("unloading", &self.is_unloading())
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Creates isolation boundaries
pub struct IsolationManager {
    loader: Arc<dyn ModuleLoader>,
    spawner: Arc<dyn TaskSpawner>,
    reaper: Arc<Reaper>,
    counters: Arc<Counters>,
}

impl IsolationManager {
    /// Create a manager loading through `loader` and spawning through `spawner`
    pub fn new(loader: Arc<dyn ModuleLoader>, spawner: Arc<dyn TaskSpawner>) -> Self {
        Self {
            loader,
            spawner,
            reaper: Arc::new(Reaper::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Load `descriptor` into a fresh boundary
    ///
    /// The module is loaded on a blocking thread. If the entry type is
    /// missing the partially created boundary is unloaded before the error
    /// is returned.
    pub async fn load(&self, descriptor: &PluginDescriptor) -> Result<IsolationContext> {
        let loader = Arc::clone(&self.loader);
        let path = descriptor.module_path.clone();
        let module = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))??;

        let available = (!module.entries.contains_key(&descriptor.entry_type_name))
            .then(|| module.entry_names());

        let boundary = Arc::new(Boundary {
            id: ContextId::new(),
            plugin: descriptor.plugin.clone(),
            unloading: AtomicBool::new(false),
            entries: module.entries,
            library: module.library,
            reaper: Arc::clone(&self.reaper),
            reclamation: Arc::new(Reclamation::default()),
        });
        self.counters.loaded.fetch_add(1, Ordering::Relaxed);

        let mut context = IsolationContext {
            id: boundary.id,
            plugin: descriptor.plugin.clone(),
            entry_type: descriptor.entry_type_name.clone(),
            observer: Arc::downgrade(&boundary),
            reclamation: Arc::clone(&boundary.reclamation),
            boundary: Some(boundary),
            spawner: Arc::clone(&self.spawner),
            reaper: Arc::clone(&self.reaper),
            counters: Arc::clone(&self.counters),
        };

        debug!(
            plugin = %descriptor.plugin,
            context_id = %context.id,
            module_path = %descriptor.module_path.display(),
            "Module loaded into isolation boundary"
        );

        if let Some(available) = available {
            context.unload();
            return Err(RuntimeError::TypeResolution {
                entry_type: descriptor.entry_type_name.clone(),
                module_path: descriptor.module_path.clone(),
                available,
            });
        }

        Ok(context)
    }

    /// Run one reclamation cycle
    pub fn collect(&self) -> usize {
        self.reaper.collect()
    }

    /// Close every library released so far
    pub fn reclaim_all(&self) -> usize {
        self.reaper.drain()
    }

    /// Snapshot of load and unload activity
    pub fn stats(&self) -> IsolationStats {
        IsolationStats {
            loaded: self.counters.loaded.load(Ordering::Relaxed),
            unloaded: self.counters.unloaded.load(Ordering::Relaxed),
            pending_libraries: self.reaper.pending(),
        }
    }
}

impl fmt::Debug for IsolationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationManager")
            .field("reaper", &self.reaper)
            .field("spawner", &self.spawner)
            .finish_non_exhaustive()
    }
}

/// Loaded plugin inside its own boundary
///
/// Dropping the context unloads it.
pub struct IsolationContext {
    id: ContextId,
    plugin: String,
    entry_type: String,
    boundary: Option<Arc<Boundary>>,
    observer: Weak<Boundary>,
    reclamation: Arc<Reclamation>,
    spawner: Arc<dyn TaskSpawner>,
    reaper: Arc<Reaper>,
    counters: Arc<Counters>,
}

impl IsolationContext {
    /// Boundary identity
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Plugin name
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Whether `unload()` has been called
    pub fn is_unloaded(&self) -> bool {
        self.boundary.is_none()
    }

    /// Handle to the requested entry type, `None` once unloaded
    pub fn entry(&self) -> Option<EntryTypeHandle<'_>> {
        let boundary = self.boundary.as_ref()?;
        let entry = boundary.entries.get(&self.entry_type)?;
        Some(EntryTypeHandle {
            boundary,
            name: &self.entry_type,
            entry: entry.as_ref(),
            spawner: &self.spawner,
        })
    }

    /// Request unload of the boundary
    ///
    /// Releases the context's own reference. Reclamation happens once every
    /// other reference is gone too; poll the returned handle to find out.
    /// Calling this again only returns another handle.
    pub fn unload(&mut self) -> UnloadHandle {
        if let Some(boundary) = self.boundary.take() {
            boundary.unloading.store(true, Ordering::Release);
            self.counters.unloaded.fetch_add(1, Ordering::Relaxed);
            debug!(
                plugin = %self.plugin,
                context_id = %self.id,
                anchors = Arc::strong_count(&boundary) - 1,
                "Unload requested"
            );
        }
        UnloadHandle {
            context_id: self.id,
            plugin: self.plugin.clone(),
            boundary: self.observer.clone(),
            reclamation: Arc::clone(&self.reclamation),
            reaper: Arc::clone(&self.reaper),
        }
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        if self.boundary.is_some() {
            self.unload();
        }
    }
}

impl fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("entry_type", &self.entry_type)
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}

/// Borrowed view of an entry type inside a loaded context
///
/// Borrows the context, so no handle can outlive `unload()`.
#[derive(Clone, Copy)]
pub struct EntryTypeHandle<'ctx> {
    boundary: &'ctx Arc<Boundary>,
    name: &'ctx str,
    entry: &'ctx dyn EntryType,
    spawner: &'ctx Arc<dyn TaskSpawner>,
}

impl<'ctx> EntryTypeHandle<'ctx> {
    /// Fully qualified entry type name
    pub fn name(&self) -> &'ctx str {
        self.name
    }

    /// Plugin name
    pub fn plugin(&self) -> &'ctx str {
        &self.boundary.plugin
    }

    /// Boundary identity
    pub fn context_id(&self) -> ContextId {
        self.boundary.id
    }

    /// Declared route, read without instantiating the type
    ///
    /// Returned detached from the module's static data.
    pub fn route(&self) -> Option<RouteSpec> {
        self.entry.route().map(|route| route.detach())
    }

    /// Default-construct an instance inside the boundary
    pub fn instantiate(&self) -> EntryInstance {
        EntryInstance {
            endpoint: self.entry.instantiate(),
            _anchor: Arc::clone(self.boundary),
        }
    }

    /// Scope endpoint code uses to reach its boundary
    pub fn scope(&self) -> BoundaryScope {
        let anchor: Arc<dyn ScopeAnchor> = Arc::clone(self.boundary) as Arc<dyn ScopeAnchor>;
        BoundaryScope::new(anchor, Arc::clone(self.spawner))
    }
}

impl fmt::Debug for EntryTypeHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryTypeHandle")
            .field("name", &self.name)
            .field("context_id", &self.boundary.id)
            .field("route", &self.route())
            .finish()
    }
}

/// Endpoint instance that keeps its boundary alive
pub struct EntryInstance {
    // Dropped before the anchor.
    endpoint: Box<dyn Endpoint>,
    _anchor: Arc<Boundary>,
}

impl EntryInstance {
    /// The instantiated endpoint
    pub fn endpoint(&self) -> &dyn Endpoint {
        self.endpoint.as_ref()
    }
}

impl fmt::Debug for EntryInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryInstance")
            .field("context_id", &self._anchor.id)
            .finish_non_exhaustive()
    }
}

/// Observes a boundary after unload without keeping it alive
#[derive(Clone)]
pub struct UnloadHandle {
    context_id: ContextId,
    plugin: String,
    boundary: Weak<Boundary>,
    reclamation: Arc<Reclamation>,
    reaper: Arc<Reaper>,
}

impl UnloadHandle {
    /// Boundary identity
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Plugin name
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// How far the boundary has been torn down
    pub fn state(&self) -> ReclaimState {
        self.reclamation.get()
    }

    /// Whether the boundary is gone and its library, if any, closed
    pub fn is_reclaimed(&self) -> bool {
        self.state() == ReclaimState::Released
    }

    /// References still keeping the boundary alive
    pub fn live_anchors(&self) -> usize {
        self.boundary.strong_count()
    }

    /// Run one reclamation cycle
    pub fn collect(&self) -> usize {
        self.reaper.collect()
    }
}

impl fmt::Debug for UnloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnloadHandle")
            .field("context_id", &self.context_id)
            .field("plugin", &self.plugin)
            .field("live_anchors", &self.live_anchors())
            .field("state", &self.state())
            .finish()
    }
}
