//! Ambient scheduling context.
//!
//! Each thread hosting flows keeps a small context: the stack of flows
//! currently entered (innermost last), a lazily created default flow, and the
//! long-stack-trace flag. Nothing here is process-global, so independent test
//! threads never observe each other's flows.
//!
//! # Example
//!
//! ```ignore
//! use webdriver_flow::{context, ControlFlow, Deferred};
//!
//! let flow = ControlFlow::new();
//! let deferred = context::with_flow(&flow, Deferred::new);
//! assert!(deferred.promise().flow().ptr_eq(&flow));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::flow::ControlFlow;

// ============================================================================
// Context
// ============================================================================

#[derive(Default)]
struct Context {
    /// Flows entered on this thread, innermost last.
    entered: RefCell<Vec<ControlFlow>>,
    /// Flow used when nothing is entered.
    default_flow: RefCell<Option<ControlFlow>>,
    /// Whether scheduling points capture stack snapshots.
    long_stack_traces: Cell<bool>,
}

thread_local! {
    static CONTEXT: Context = Context::default();
}

// ============================================================================
// Flow Selection
// ============================================================================

/// Returns the innermost entered flow, falling back to the default flow.
#[must_use]
pub fn current_flow() -> ControlFlow {
    entered_flow().unwrap_or_else(default_flow)
}

/// Returns the innermost entered flow, if any.
#[must_use]
pub fn entered_flow() -> Option<ControlFlow> {
    CONTEXT.with(|ctx| ctx.entered.borrow().last().cloned())
}

/// Returns this thread's default flow, creating it on first use.
#[must_use]
pub fn default_flow() -> ControlFlow {
    if let Some(flow) = CONTEXT.with(|ctx| ctx.default_flow.borrow().clone()) {
        return flow;
    }

    let flow = ControlFlow::new();
    CONTEXT.with(|ctx| *ctx.default_flow.borrow_mut() = Some(flow.clone()));
    flow
}

/// Replaces this thread's default flow.
///
/// # Errors
///
/// Returns [`Error::Config`] while any flow is entered on this thread.
pub fn set_default_flow(flow: ControlFlow) -> Result<()> {
    CONTEXT.with(|ctx| {
        if !ctx.entered.borrow().is_empty() {
            return Err(Error::config(
                "cannot change the default flow while a flow is active",
            ));
        }
        *ctx.default_flow.borrow_mut() = Some(flow);
        Ok(())
    })
}

/// Runs `f` with `flow` entered as the current flow.
///
/// Promises constructed and continuations registered inside `f` belong to
/// `flow`.
pub fn with_flow<R>(flow: &ControlFlow, f: impl FnOnce() -> R) -> R {
    let _guard = enter(flow);
    f()
}

/// Pushes `flow` onto the entered stack until the guard drops.
pub(crate) fn enter(flow: &ControlFlow) -> FlowGuard {
    CONTEXT.with(|ctx| ctx.entered.borrow_mut().push(flow.clone()));
    FlowGuard {
        _not_send: PhantomData,
    }
}

/// Scope guard returned by [`enter`].
pub(crate) struct FlowGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|ctx| ctx.entered.borrow_mut().pop());
    }
}

// ============================================================================
// Long Stack Traces
// ============================================================================

/// Returns `true` if long stack traces are enabled on this thread.
#[inline]
#[must_use]
pub fn long_stack_traces() -> bool {
    CONTEXT.with(|ctx| ctx.long_stack_traces.get())
}

/// Enables or disables long stack traces on this thread.
///
/// Capturing a native backtrace at every scheduling point is expensive; keep
/// this off outside of debugging sessions.
#[inline]
pub fn set_long_stack_traces(enabled: bool) {
    CONTEXT.with(|ctx| ctx.long_stack_traces.set(enabled));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flow_is_stable() {
        let a = default_flow();
        let b = default_flow();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_with_flow_scopes_current_flow() {
        let flow = ControlFlow::new();
        assert!(entered_flow().is_none());

        with_flow(&flow, || {
            assert!(current_flow().ptr_eq(&flow));
            let inner = ControlFlow::new();
            with_flow(&inner, || assert!(current_flow().ptr_eq(&inner)));
            assert!(current_flow().ptr_eq(&flow));
        });

        assert!(entered_flow().is_none());
    }

    #[test]
    fn test_set_default_flow_rejected_while_entered() {
        let flow = ControlFlow::new();
        let result = with_flow(&flow, || set_default_flow(ControlFlow::new()));
        assert!(matches!(result, Err(Error::Config { .. })));

        set_default_flow(flow.clone()).expect("no flow entered");
        assert!(default_flow().ptr_eq(&flow));
    }

    #[test]
    fn test_long_stack_traces_toggle() {
        assert!(!long_stack_traces());
        set_long_stack_traces(true);
        assert!(long_stack_traces());
        set_long_stack_traces(false);
        assert!(!long_stack_traces());
    }
}
