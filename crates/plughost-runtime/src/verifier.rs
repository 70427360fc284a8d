//! Verified unload
//!
//! After a context is unloaded the verifier checks, with a bounded number of
//! reclamation cycles, that nothing kept the boundary alive, and runs the
//! cycles that close its library once it is gone. A boundary still alive
//! after the last attempt is reported as a leak; nothing is forced.

use crate::isolation::{ReclaimState, UnloadHandle};
use plughost_plugin_api::ContextId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default number of reclamation cycles before reporting a leak
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between reclamation cycles
pub const RETRY_DELAY: Duration = Duration::from_millis(1);

/// Result of verifying one unload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnloadOutcome {
    /// Boundary that was unloaded
    pub context_id: ContextId,

    /// Plugin name
    pub plugin: String,

    /// Reclamation cycles run before the verdict, 0 if nothing was left to reclaim
    pub attempts_used: u32,

    /// Whether the boundary was dropped and its library closed
    pub reclaimed: bool,

    /// Libraries the cycles closed, including other boundaries' libraries
    pub libraries_closed: usize,
}

/// Receives unload outcomes
pub trait UnloadObserver: Send + Sync + fmt::Debug {
    /// Called once per verified unload
    fn observe(&self, outcome: &UnloadOutcome);
}

/// Logs outcomes; leaks at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl UnloadObserver for LoggingObserver {
    fn observe(&self, outcome: &UnloadOutcome) {
        if outcome.reclaimed {
            info!(
                plugin = %outcome.plugin,
                context_id = %outcome.context_id,
                attempts = outcome.attempts_used,
                reclaimed = true,
                libraries_closed = outcome.libraries_closed,
                "Plugin unloaded"
            );
        } else {
            warn!(
                plugin = %outcome.plugin,
                context_id = %outcome.context_id,
                attempts = outcome.attempts_used,
                reclaimed = false,
                "Plugin boundary still alive after unload, possible leak"
            );
        }
    }
}

/// Forwards outcomes over a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UnloadOutcome>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its outcomes arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UnloadOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UnloadObserver for ChannelObserver {
    fn observe(&self, outcome: &UnloadOutcome) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(outcome.clone());
    }
}

/// Checks that unloaded boundaries are reclaimed
#[derive(Debug, Clone, Copy)]
pub struct UnloadVerifier {
    max_attempts: u32,
    retry_delay: Duration,
}

impl UnloadVerifier {
    /// Create a verifier running at most `max_attempts` cycles
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the pause between cycles
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Maximum number of reclamation cycles
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Verify that the boundary behind `handle` is reclaimed
    ///
    /// `max_attempts` bounds the wait for live references. Once the boundary
    /// is dropped its library is closed by the following cycles regardless of
    /// the remaining budget, normally within two.
    pub async fn verify(&self, handle: UnloadHandle) -> UnloadOutcome {
        let mut attempts_used = 0;
        let mut libraries_closed = 0;
        loop {
            match handle.state() {
                ReclaimState::Released => break,
                ReclaimState::Live if attempts_used >= self.max_attempts => break,
                ReclaimState::Live | ReclaimState::Deferred => {}
            }

            attempts_used += 1;
            let closed = handle.collect();
            libraries_closed += closed;
            tokio::task::yield_now().await;
            tokio::time::sleep(self.retry_delay).await;
            debug!(
                plugin = %handle.plugin(),
                context_id = %handle.context_id(),
                attempts = attempts_used,
                closed,
                live_anchors = handle.live_anchors(),
                "Reclamation cycle"
            );
        }

        UnloadOutcome {
            context_id: handle.context_id(),
            plugin: handle.plugin().to_string(),
            attempts_used,
            reclaimed: handle.is_reclaimed(),
            libraries_closed,
        }
    }
}

impl Default for UnloadVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
