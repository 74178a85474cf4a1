//! Producer side of a promise.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::flow::ControlFlow;
use crate::value::Value;

use super::Promise;

// ============================================================================
// Deferred
// ============================================================================

/// Settles one [`Promise`] exactly once.
///
/// Every call after the first `fulfill` or `reject` is ignored. Fulfilling
/// with a promise or thenable adopts its eventual state.
#[derive(Debug, Clone)]
pub struct Deferred {
    promise: Promise,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferred {
    /// Creates a deferred owned by the current flow.
    #[must_use]
    pub fn new() -> Self {
        Self {
            promise: Promise::pending(),
        }
    }

    /// Creates a deferred owned by `flow`.
    #[must_use]
    pub fn in_flow(flow: &ControlFlow) -> Self {
        Self {
            promise: Promise::pending_in(flow.clone(), || "Promise: new".to_string()),
        }
    }

    /// Creates a deferred whose stack snapshot carries `label`.
    pub(crate) fn labelled(flow: ControlFlow, label: impl FnOnce() -> String) -> Self {
        Self {
            promise: Promise::pending_in(flow, label),
        }
    }

    /// Returns the controlled promise.
    #[inline]
    #[must_use]
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Fulfills the promise.
    pub fn fulfill(&self, value: impl Into<Value>) {
        self.promise.resolve(value.into());
    }

    /// Rejects the promise.
    pub fn reject(&self, reason: Error) {
        self.promise.reject(reason);
    }

    /// Returns `true` while the promise is unsettled.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }

    /// Settles directly, bypassing the resolve-once guard.
    ///
    /// The outcome must not be a promise; the scheduler uses this with
    /// already-adopted results.
    pub(crate) fn settle(&self, outcome: Result<Value>) {
        self.promise.settle(outcome);
    }
}
