//! Command executor interface.
//!
//! The driver turns every command into a flow task whose body awaits an
//! [`Executor`]. Any RPC client can sit behind the trait;
//! [`WebSocketExecutor`](crate::transport::WebSocketExecutor) is the bundled
//! one.

// ============================================================================
// Imports
// ============================================================================

use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::Command;

// ============================================================================
// Executor
// ============================================================================

/// Sends a command and yields its result.
#[async_trait(?Send)]
pub trait Executor {
    /// Executes `command`.
    ///
    /// # Errors
    ///
    /// Returns the remote end's failure or a transport error.
    async fn execute(&self, command: Command) -> Result<JsonValue>;
}

#[async_trait(?Send)]
impl<E: Executor + ?Sized> Executor for Rc<E> {
    async fn execute(&self, command: Command) -> Result<JsonValue> {
        (**self).execute(command).await
    }
}

#[async_trait(?Send)]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn execute(&self, command: Command) -> Result<JsonValue> {
        (**self).execute(command).await
    }
}

// ============================================================================
// Callback Adapter
// ============================================================================

/// Runs `command` on `executor` and reports through an error-first
/// callback.
///
/// `callback` is invoked exactly once, from a local task. Must be called
/// inside a [`LocalSet`](tokio::task::LocalSet).
pub fn execute_callback<E, F>(executor: Rc<E>, command: Command, callback: F)
where
    E: Executor + ?Sized + 'static,
    F: FnOnce(Option<Error>, JsonValue) + 'static,
{
    tokio::task::spawn_local(async move {
        let name = command.name;
        match executor.execute(command).await {
            Ok(value) => {
                trace!(command = %name, "Command succeeded");
                callback(None, value);
            }
            Err(err) => {
                trace!(command = %name, error = %err, "Command failed");
                callback(Some(err), JsonValue::Null);
            }
        }
    });
}

// ============================================================================
// Tests
// ============================================================================
