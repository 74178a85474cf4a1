//! Promise implementation.
//!
//! A [`Promise`] is a single-assignment container for a [`Value`] or an
//! [`Error`], paired with the [`ControlFlow`] that schedules its callbacks.
//! Continuations registered with [`Promise::then`] and friends never run
//! synchronously: they are inserted into the active frame of the flow that was
//! current at registration and run as scheduled work of that flow.
//!
//! # States
//!
//! | State | Entered by | Observable through |
//! |-------|------------|--------------------|
//! | pending | construction | [`Promise::is_pending`] |
//! | fulfilled | [`Deferred::fulfill`], adoption | `then`, `.await` |
//! | rejected | [`Deferred::reject`], [`Promise::cancel`], adoption | `then_catch`, `.await` |
//!
//! A rejection nobody observes within the flow's configured number of host
//! turns is reported to the owning flow as an unhandled rejection.
//!
//! # Example
//!
//! ```ignore
//! use webdriver_flow::{Deferred, Value};
//!
//! let deferred = Deferred::new();
//! let doubled = deferred
//!     .promise()
//!     .then(|value| Ok(value.as_f64().unwrap_or_default() * 2.0));
//! deferred.fulfill(21);
//! assert_eq!(doubled.await?, Value::from(42));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::context;
use crate::error::{CancelKind, Error, Result};
use crate::flow::{CallbackJob, ControlFlow};
use crate::host;
use crate::identifiers::PromiseId;
use crate::stack::Snapshot;
use crate::value::Value;

// ============================================================================
// Submodules
// ============================================================================

mod combinators;
mod deferred;

// ============================================================================
// Re-exports
// ============================================================================

pub use combinators::{
    NodeCallback, all, checked_node_call, delayed, filter, from_future, fully_resolved,
    has_callable_then, is_promise, map, when, when_with,
};
pub use deferred::Deferred;

// ============================================================================
// Types
// ============================================================================

/// Boxed fulfillment handler.
pub type OnFulfilled = Box<dyn FnOnce(Value) -> Result<Value>>;

/// Boxed rejection handler.
pub type OnRejected = Box<dyn FnOnce(Error) -> Result<Value>>;

/// Coarse promise state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with an error.
    Rejected,
}

enum State {
    Pending,
    Fulfilled(Value),
    Rejected(Error),
}

impl State {
    fn outcome(&self) -> Option<Result<Value>> {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => Some(Ok(value.clone())),
            Self::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

enum Listener {
    /// A user continuation, dispatched as work of `flow`.
    Callback {
        flow: ControlFlow,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        derived: Deferred,
    },
    /// An internal observer, invoked synchronously at settlement.
    Raw(Box<dyn FnOnce(Result<Value>)>),
}

struct Inner {
    id: PromiseId,
    state: State,
    /// Set by the first fulfill/reject; later calls are ignored.
    resolving: bool,
    /// Set once anything observes the promise.
    handled: bool,
    listeners: Vec<Listener>,
    wakers: Vec<Waker>,
    flow: ControlFlow,
    snapshot: Option<Snapshot>,
    on_cancel: Option<Box<dyn FnOnce(Error)>>,
}

// ============================================================================
// Promise
// ============================================================================

/// A promise owned by a [`ControlFlow`].
///
/// Cloning yields another handle to the same promise.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

// ============================================================================
// Promise - Construction
// ============================================================================

impl Promise {
    /// Creates a promise and hands its resolver to `executor`.
    ///
    /// An `Err` returned by `executor` rejects the promise unless it was
    /// already resolved.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(&Deferred) -> Result<()>,
    {
        let deferred = Deferred::new();
        if let Err(err) = executor(&deferred) {
            deferred.reject(err);
        }
        deferred.promise()
    }

    /// Creates a promise resolved with `value`.
    ///
    /// Resolving with a promise or thenable adopts its state.
    pub fn fulfilled(value: impl Into<Value>) -> Self {
        let deferred = Deferred::new();
        deferred.fulfill(value);
        deferred.promise()
    }

    /// Creates a rejected promise.
    pub fn rejected(reason: Error) -> Self {
        let deferred = Deferred::new();
        deferred.reject(reason);
        deferred.promise()
    }

    /// Creates a pending promise owned by `flow`.
    pub(crate) fn pending_in(flow: ControlFlow, label: impl FnOnce() -> String) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: PromiseId::next(),
                state: State::Pending,
                resolving: false,
                handled: false,
                listeners: Vec::new(),
                wakers: Vec::new(),
                flow,
                snapshot: Snapshot::capture(label),
                on_cancel: None,
            })),
        }
    }

    /// Creates a pending promise owned by the current flow.
    pub(crate) fn pending() -> Self {
        Self::pending_in(context::current_flow(), || "Promise: new".to_string())
    }
}

// ============================================================================
// Promise - Accessors
// ============================================================================

impl Promise {
    /// Returns the promise ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.inner.borrow().id
    }

    /// Returns the flow that owns this promise.
    #[inline]
    #[must_use]
    pub fn flow(&self) -> ControlFlow {
        self.inner.borrow().flow.clone()
    }

    /// Returns the coarse state.
    #[must_use]
    pub fn state(&self) -> PromiseState {
        match self.inner.borrow().state {
            State::Pending => PromiseState::Pending,
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }

    /// Returns `true` while unsettled.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Returns `true` once fulfilled.
    #[inline]
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.state() == PromiseState::Fulfilled
    }

    /// Returns `true` once rejected.
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.state() == PromiseState::Rejected
    }

    /// Returns the settled outcome without observing the promise.
    ///
    /// Peeking does not count as handling a rejection.
    #[must_use]
    pub fn result(&self) -> Option<Result<Value>> {
        self.inner.borrow().state.outcome()
    }

    /// Returns `true` if both handles refer to the same promise.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[inline]
    pub(crate) fn is_handled(&self) -> bool {
        self.inner.borrow().handled
    }

    #[inline]
    pub(crate) fn mark_handled(&self) {
        self.inner.borrow_mut().handled = true;
    }

    /// Installs the hook run by [`Promise::cancel`].
    pub(crate) fn set_cancel_hook(&self, hook: impl FnOnce(Error) + 'static) {
        self.inner.borrow_mut().on_cancel = Some(Box::new(hook));
    }
}

// ============================================================================
// Promise - Chaining
// ============================================================================

impl Promise {
    /// Registers a fulfillment handler.
    ///
    /// Rejections pass through to the returned promise unchanged.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<R> + 'static,
        R: Into<Value>,
    {
        self.register(
            Some(Box::new(move |value| on_fulfilled(value).map(Into::into))),
            None,
            "Promise: then",
        )
    }

    /// Registers a rejection handler.
    ///
    /// Values pass through to the returned promise unchanged.
    pub fn then_catch<F, R>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Error) -> Result<R> + 'static,
        R: Into<Value>,
    {
        self.register(
            None,
            Some(Box::new(move |err| on_rejected(err).map(Into::into))),
            "Promise: catch",
        )
    }

    /// Registers both handlers; exactly one of them runs.
    pub fn then_either<F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise
    where
        F: FnOnce(Value) -> Result<R> + 'static,
        G: FnOnce(Error) -> Result<S> + 'static,
        R: Into<Value>,
        S: Into<Value>,
    {
        self.register(
            Some(Box::new(move |value| on_fulfilled(value).map(Into::into))),
            Some(Box::new(move |err| on_rejected(err).map(Into::into))),
            "Promise: then",
        )
    }

    /// Registers optional boxed handlers.
    pub fn then_with(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
    ) -> Promise {
        let label = if on_fulfilled.is_none() && on_rejected.is_some() {
            "Promise: catch"
        } else {
            "Promise: then"
        };
        self.register(on_fulfilled, on_rejected, label)
    }

    /// Registers a handler that runs on either outcome.
    ///
    /// The original outcome passes through unless `on_finally` fails or
    /// returns a promise that rejects; that failure then wins.
    pub fn then_finally<F, R>(&self, on_finally: F) -> Promise
    where
        F: FnOnce() -> Result<R> + 'static,
        R: Into<Value>,
    {
        let slot = Rc::new(RefCell::new(Some(on_finally)));
        let other = Rc::clone(&slot);

        self.register(
            Some(Box::new(move |value| run_finally(&slot, Ok(value)))),
            Some(Box::new(move |err| run_finally(&other, Err(err)))),
            "Promise: finally",
        )
    }

    fn register(
        &self,
        on_fulfilled: Option<OnFulfilled>,
        on_rejected: Option<OnRejected>,
        label: &'static str,
    ) -> Promise {
        let flow = context::entered_flow().unwrap_or_else(|| self.flow());
        let derived = Deferred::labelled(flow.clone(), || label.to_string());
        let listener = Listener::Callback {
            flow,
            on_fulfilled,
            on_rejected,
            derived: derived.clone(),
        };

        let outcome = {
            let mut inner = self.inner.borrow_mut();
            inner.handled = true;
            inner.state.outcome()
        };

        match outcome {
            Some(outcome) => dispatch(listener, outcome),
            None => self.inner.borrow_mut().listeners.push(listener),
        }

        derived.promise()
    }

    /// Observes settlement without going through a flow.
    ///
    /// Runs `callback` synchronously at settlement, or immediately if the
    /// promise already settled. Marks the promise handled.
    pub(crate) fn subscribe_raw(&self, callback: impl FnOnce(Result<Value>) + 'static) {
        self.mark_handled();
        self.observe(callback);
    }

    /// Like [`Promise::subscribe_raw`], but leaves the handled flag alone.
    pub(crate) fn observe(&self, callback: impl FnOnce(Result<Value>) + 'static) {
        let outcome = self.inner.borrow().state.outcome();

        match outcome {
            Some(outcome) => callback(outcome),
            None => self
                .inner
                .borrow_mut()
                .listeners
                .push(Listener::Raw(Box::new(callback))),
        }
    }
}

fn run_finally<F, R>(slot: &RefCell<Option<F>>, outcome: Result<Value>) -> Result<Value>
where
    F: FnOnce() -> Result<R>,
    R: Into<Value>,
{
    let taken = slot.borrow_mut().take();
    let Some(on_finally) = taken else {
        return outcome;
    };

    let value = on_finally()?.into();
    if value.has_callable_then() {
        let settled = Promise::fulfilled(value);
        return Ok(Value::Promise(
            settled.then_with(Some(Box::new(move |_| outcome)), None),
        ));
    }
    outcome
}

fn dispatch(listener: Listener, outcome: Result<Value>) {
    match listener {
        Listener::Raw(callback) => callback(outcome),
        Listener::Callback {
            flow,
            on_fulfilled,
            on_rejected,
            derived,
        } => {
            let run: Box<dyn FnOnce() -> Result<Value>> = match (outcome, on_fulfilled, on_rejected)
            {
                (Ok(value), Some(handler), _) => Box::new(move || handler(value)),
                (Err(err), _, Some(handler)) => Box::new(move || handler(err)),
                (outcome, _, _) => {
                    derived.settle(outcome);
                    return;
                }
            };
            flow.schedule_callback(CallbackJob::new(run, derived));
        }
    }
}

// ============================================================================
// Promise - Resolution
// ============================================================================

impl Promise {
    /// Fulfills, adopting promises and thenables. Ignored after the first
    /// resolution.
    pub(crate) fn resolve(&self, value: Value) {
        if !self.begin_resolution() {
            return;
        }
        self.adopt(value);
    }

    /// Rejects. Ignored after the first resolution.
    pub(crate) fn reject(&self, reason: Error) {
        if !self.begin_resolution() {
            return;
        }
        self.settle(Err(reason));
    }

    fn begin_resolution(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.resolving || !matches!(inner.state, State::Pending) {
            return false;
        }
        inner.resolving = true;
        true
    }

    fn adopt(&self, value: Value) {
        match value {
            Value::Promise(other) => {
                if other.ptr_eq(self) {
                    self.settle(Err(Error::type_error(
                        "A promise can not be resolved with itself",
                    )));
                    return;
                }
                let this = self.clone();
                other.subscribe_raw(move |outcome| this.settle(outcome));
            }
            Value::Thenable(thenable) => {
                let this = self.clone();
                host::enqueue(move || {
                    let called = Rc::new(Cell::new(false));
                    let on_value = this.clone();
                    let value_called = Rc::clone(&called);

                    thenable.then(
                        Box::new(move |value| {
                            if !value_called.replace(true) {
                                on_value.adopt(value);
                            }
                        }),
                        Box::new(move |err| {
                            if !called.replace(true) {
                                this.settle(Err(err));
                            }
                        }),
                    );
                });
            }
            other => self.settle(Ok(other)),
        }
    }

    /// Moves a pending promise to its final state and notifies listeners.
    pub(crate) fn settle(&self, outcome: Result<Value>) {
        let (outcome, listeners, wakers, unhandled) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }

            let outcome = match (outcome, &inner.snapshot) {
                (Err(err), Some(snapshot)) => Err(err.annotate(snapshot.clone())),
                (outcome, _) => outcome,
            };
            inner.resolving = true;
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(err) => State::Rejected(err.clone()),
            };

            let unhandled = match &outcome {
                Err(err) if !inner.handled && !err.is_cancellation() => {
                    Some((inner.flow.clone(), err.clone()))
                }
                _ => None,
            };

            (
                outcome,
                std::mem::take(&mut inner.listeners),
                std::mem::take(&mut inner.wakers),
                unhandled,
            )
        };

        trace!(
            promise = %self.id(),
            fulfilled = outcome.is_ok(),
            listeners = listeners.len(),
            "Promise settled"
        );

        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            dispatch(listener, outcome.clone());
        }
        if let Some((flow, err)) = unhandled {
            flow.track_unhandled(self.clone(), err);
        }
    }

    /// Cancels a pending promise.
    ///
    /// Rejects with [`Error::Cancelled`] wrapping `reason` and runs the
    /// cancellation hook. Has no effect once settled.
    pub fn cancel(&self, reason: Option<Error>) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.resolving = true;
            inner.on_cancel.take()
        };

        let err = Error::cancelled(CancelKind::Explicit, reason);
        self.settle(Err(err.clone()));
        if let Some(hook) = hook {
            hook(err);
        }
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Future for Promise {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        inner.handled = true;

        match inner.state.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => {
                let state = match inner.state {
                    State::Pending => "pending",
                    State::Fulfilled(_) => "fulfilled",
                    State::Rejected(_) => "rejected",
                };
                write!(f, "Promise({}, {state})", inner.id)
            }
            Err(_) => write!(f, "Promise(<busy>)"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_pending, assert_ready, task};

    use crate::host::run_local;
    use crate::value::Thenable;

    async fn settle_all() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_settlement_is_single() {
        run_local(async {
            let deferred = Deferred::new();
            deferred.fulfill(1);
            deferred.fulfill(2);
            deferred.reject(Error::application("late"));

            assert_eq!(deferred.promise().await.expect("fulfilled"), Value::from(1));
        })
        .await;
    }

    #[tokio::test]
    async fn test_handler_never_runs_synchronously() {
        run_local(async {
            let ran = Rc::new(Cell::new(false));
            let r = Rc::clone(&ran);
            let settled = Promise::fulfilled("done");

            let chained = settled.then(move |_| {
                r.set(true);
                Ok(())
            });
            assert!(!ran.get());

            chained.await.expect("handler result");
            assert!(ran.get());
        })
        .await;
    }

    #[tokio::test]
    async fn test_self_resolution_is_type_error() {
        run_local(async {
            let deferred = Deferred::new();
            let promise = deferred.promise();
            deferred.fulfill(promise.clone());

            let err = promise.await.expect_err("self resolution");
            assert!(err.is_type_error());
            assert_eq!(
                err.to_string(),
                "TypeError: A promise can not be resolved with itself"
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_handler_returning_own_promise_is_type_error() {
        run_local(async {
            let slot: Rc<RefCell<Option<Promise>>> = Rc::new(RefCell::new(None));
            let s = Rc::clone(&slot);
            let derived = Promise::fulfilled(1).then(move |_| {
                let own = s.borrow().clone().expect("registered");
                Ok(own)
            });
            *slot.borrow_mut() = Some(derived.clone());

            let err = derived.await.expect_err("cycle");
            assert!(err.is_type_error());
        })
        .await;
    }

    #[tokio::test]
    async fn test_rejection_passes_through_then() {
        run_local(async {
            let chained = Promise::rejected(Error::application("boom")).then(|v| Ok(v));
            let err = chained.await.expect_err("passes through");
            assert_eq!(err.to_string(), "boom");
        })
        .await;
    }

    #[tokio::test]
    async fn test_catch_recovers() {
        run_local(async {
            let recovered = Promise::rejected(Error::application("boom"))
                .then_catch(|err| Ok(format!("caught {err}")));
            assert_eq!(recovered.await.expect("recovered"), Value::from("caught boom"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_handler_error_rejects_derived() {
        run_local(async {
            let failed = Promise::fulfilled(1).then(|_| Err::<Value, _>(Error::application("bad")));
            assert_eq!(failed.await.expect_err("rejected").to_string(), "bad");
        })
        .await;
    }

    #[tokio::test]
    async fn test_finally_keeps_outcome_unless_it_fails() {
        run_local(async {
            let kept = Promise::fulfilled(7).then_finally(|| Ok(()));
            assert_eq!(kept.await.expect("kept"), Value::from(7));

            let replaced = Promise::fulfilled(7)
                .then_finally(|| Err::<Value, _>(Error::application("cleanup failed")));
            assert_eq!(
                replaced.await.expect_err("replaced").to_string(),
                "cleanup failed"
            );

            let waited = Promise::rejected(Error::application("original"))
                .then_finally(|| Ok(Promise::rejected(Error::application("late failure"))));
            assert_eq!(waited.await.expect_err("late").to_string(), "late failure");
        })
        .await;
    }

    #[tokio::test]
    async fn test_finally_passes_rejection_through() {
        run_local(async {
            let ran = Rc::new(Cell::new(false));
            let r = Rc::clone(&ran);
            let passed = Promise::rejected(Error::application("original")).then_finally(move || {
                r.set(true);
                Ok(())
            });

            assert_eq!(passed.await.expect_err("rejected").to_string(), "original");
            assert!(ran.get());
        })
        .await;
    }

    #[tokio::test]
    async fn test_then_either_runs_one_handler() {
        run_local(async {
            let fulfilled = Promise::fulfilled(2).then_either(
                |value| Ok(format!("value {}", value.as_i64().unwrap_or_default())),
                |err| Ok(format!("error {err}")),
            );
            assert_eq!(fulfilled.await.expect("value"), Value::from("value 2"));

            let rejected = Promise::rejected(Error::application("boom")).then_either(
                |_| Ok("unexpected"),
                |err| Err::<Value, _>(Error::application(format!("rethrown {err}"))),
            );
            assert_eq!(
                rejected.await.expect_err("rethrown").to_string(),
                "rethrown boom"
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_handler_returning_promise_is_adopted() {
        run_local(async {
            let inner = Deferred::new();
            let inner_promise = inner.promise();
            let outer = Promise::fulfilled(1).then(move |_| Ok(inner_promise));

            settle_all().await;
            assert!(outer.is_pending());

            inner.fulfill("inner value");
            assert_eq!(outer.await.expect("adopted"), Value::from("inner value"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_thenable_is_adopted() {
        struct Immediate(i64);
        impl Thenable for Immediate {
            fn then(&self, on_fulfilled: Box<dyn FnOnce(Value)>, on_rejected: Box<dyn FnOnce(Error)>) {
                on_fulfilled(Value::from(self.0));
                on_rejected(Error::application("ignored"));
            }
        }

        run_local(async {
            let promise = Promise::fulfilled(Value::thenable(Immediate(5)));
            assert_eq!(promise.await.expect("adopted"), Value::from(5));
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancel_pending_runs_hook() {
        run_local(async {
            let deferred = Deferred::new();
            let promise = deferred.promise();
            let hooked = Rc::new(Cell::new(false));
            let h = Rc::clone(&hooked);
            promise.set_cancel_hook(move |_| h.set(true));

            promise.cancel(Some(Error::application("stop")));
            deferred.fulfill(1);

            let err = promise.await.expect_err("cancelled");
            assert_eq!(err.cancel_kind(), Some(CancelKind::Explicit));
            assert_eq!(err.to_string(), "Cancelled: stop");
            assert!(hooked.get());
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancel_after_settlement_is_noop() {
        run_local(async {
            let promise = Promise::fulfilled(3);
            promise.cancel(None);
            assert!(promise.is_fulfilled());
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancellation_propagates_down_chain() {
        run_local(async {
            let deferred = Deferred::new();
            let chained = deferred.promise().then(|v| Ok(v)).then(|v| Ok(v));
            deferred.promise().cancel(None);

            let err = chained.await.expect_err("cancelled");
            assert!(err.is_cancellation());
        })
        .await;
    }

    #[tokio::test]
    async fn test_future_poll_registers_waker() {
        run_local(async {
            let deferred = Deferred::new();
            let mut awaiting = task::spawn(deferred.promise());

            assert_pending!(awaiting.poll());
            deferred.fulfill("ready");
            assert!(awaiting.is_woken());
            let value = assert_ready!(awaiting.poll()).expect("fulfilled");
            assert_eq!(value, Value::from("ready"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_executor_error_rejects() {
        run_local(async {
            let promise = Promise::new(|_| Err(Error::application("executor failed")));
            assert!(promise.is_rejected());
            assert!(promise.await.is_err());
        })
        .await;
    }

    #[tokio::test]
    async fn test_long_stack_trace_labels() {
        run_local(async {
            context::set_long_stack_traces(true);
            let chained = Promise::rejected(Error::application("boom")).then(|v| Ok(v));
            context::set_long_stack_traces(false);

            let err = chained.await.expect_err("rejected");
            let labels = err.long_stack_trace().expect("trace").labels();
            assert_eq!(labels, vec!["Promise: new", "Promise: then"]);
            assert_eq!(err.to_string(), "boom");
        })
        .await;
    }
}
