//! Plugin-facing handle to the isolation boundary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identity of one isolation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Boxed background task
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Spawns background tasks on the host's executor
///
/// Implemented by the host so that spawned work runs on the host's runtime,
/// not on a copy of the executor linked into the module.
pub trait TaskSpawner: Send + Sync + fmt::Debug {
    /// Spawn a detached task
    ///
    /// `anchor` must stay alive until `task` has completed and been dropped,
    /// and must be released by host code.
    fn spawn(&self, task: BoxTask, anchor: Arc<dyn ScopeAnchor>);
}

/// Host-side anchor of a boundary
///
/// Every live `Arc<dyn ScopeAnchor>` keeps the boundary (and the module it
/// loaded) reachable.
pub trait ScopeAnchor: Send + Sync + fmt::Debug {
    /// Identity of the anchored boundary
    fn context_id(&self) -> ContextId;

    /// Whether the host has already requested unload of the boundary
    fn is_unloading(&self) -> bool;
}

/// Handle an endpoint holds to its own boundary
///
/// Cloning a scope, or spawning through it, creates another anchor. The host
/// can only reclaim the boundary once all of them are dropped.
#[derive(Clone)]
pub struct BoundaryScope {
    anchor: Arc<dyn ScopeAnchor>,
    spawner: Arc<dyn TaskSpawner>,
}

impl BoundaryScope {
    /// Create a scope over `anchor`, spawning through `spawner`
    pub fn new(anchor: Arc<dyn ScopeAnchor>, spawner: Arc<dyn TaskSpawner>) -> Self {
        Self { anchor, spawner }
    }

    /// Identity of the boundary this scope anchors
    pub fn context_id(&self) -> ContextId {
        self.anchor.context_id()
    }

    /// Whether the host has requested unload
    pub fn is_unloading(&self) -> bool {
        self.anchor.is_unloading()
    }

    /// Spawn background work that keeps the boundary alive until it finishes
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn(Box::pin(task), Arc::clone(&self.anchor));
    }
}

impl fmt::Debug for BoundaryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryScope")
            .field("context_id", &self.context_id())
            .field("unloading", &self.is_unloading())
            .finish()
    }
}
