//! Endpoint dispatch

use crate::error::ExecutionError;
use crate::isolation::EntryTypeHandle;
use futures::FutureExt;
use plughost_plugin_api::{EndpointContext, PluginError};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Instantiates a matched entry type and runs it once
///
/// Errors and panics raised by endpoint code, including its constructor, are
/// caught and returned as [`ExecutionError`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Dispatcher;

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new() -> Self {
        Self
    }

    /// Run one fresh instance of `entry` against `ctx`
    pub async fn dispatch(
        &self,
        entry: &EntryTypeHandle<'_>,
        ctx: &mut EndpointContext,
    ) -> Result<(), ExecutionError> {
        let instance = std::panic::catch_unwind(AssertUnwindSafe(|| entry.instantiate()))
            .map_err(|panic| panicked(entry, panic_message(panic.as_ref())))?;

        debug!(
            plugin = %entry.plugin(),
            context_id = %entry.context_id(),
            entry_type = %entry.name(),
            "Dispatching endpoint"
        );

        let result = AssertUnwindSafe(instance.endpoint().execute(ctx))
            .catch_unwind()
            .await;
        drop(instance);

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(failed(entry, e)),
            Err(panic) => Err(panicked(entry, panic_message(panic.as_ref()))),
        }
    }
}

fn failed(entry: &EntryTypeHandle<'_>, source: PluginError) -> ExecutionError {
    error!(
        plugin = %entry.plugin(),
        context_id = %entry.context_id(),
        error = %source,
        "Endpoint returned an error"
    );
    ExecutionError {
        plugin: entry.plugin().to_string(),
        entry_type: entry.name().to_string(),
        context_id: entry.context_id(),
        message: source.to_string(),
        panicked: false,
    }
}

fn panicked(entry: &EntryTypeHandle<'_>, message: String) -> ExecutionError {
    error!(
        plugin = %entry.plugin(),
        context_id = %entry.context_id(),
        panic = %message,
        "Endpoint panicked"
    );
    ExecutionError {
        plugin: entry.plugin().to_string(),
        entry_type: entry.name().to_string(),
        context_id: entry.context_id(),
        message: format!("panicked: {message}"),
        panicked: true,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
