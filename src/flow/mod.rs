//! The control flow scheduler.
//!
//! A [`ControlFlow`] serializes asynchronous work into a deterministic order.
//! Scheduled tasks run one at a time; work a task schedules while it runs is
//! nested under it and must drain before the task's next sibling starts.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ControlFlow`] | Frame stack, tick loop, wait polling, events |
//! | [`FlowBuilder`] | Fluent configuration builder |
//! | [`FlowConfig`] | Per-flow settings |
//! | [`FlowEvent`] | Events observable with [`ControlFlow::on`] |
//!
//! # Ordering
//!
//! ```text
//! flow.execute(a).then(|_| flow.execute(c));
//! flow.execute(b);
//!
//! runs: a, c, b
//! ```
//!
//! # Example
//!
//! ```ignore
//! use webdriver_flow::{ControlFlow, Value, host};
//!
//! host::block_on(async {
//!     let flow = ControlFlow::new();
//!     let log = flow.execute(|| Ok("first"));
//!     flow.execute(|| Ok("second"));
//!     assert_eq!(log.await?, Value::from("first"));
//!     Ok::<_, webdriver_flow::Error>(())
//! })??;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for flow configuration.
pub mod builder;

/// Flow event surface.
pub mod events;

mod frame;
mod scheduler;
mod task;
mod wait;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{FlowBuilder, FlowConfig};
pub use events::{EventData, FlowEvent};

pub(crate) use frame::CallbackJob;

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::identifiers::{FlowId, FrameId, ListenerId, TaskId};
use crate::promise::{self, Deferred, Promise};
use crate::value::Value;

use self::events::EventEmitter;
use self::frame::Frame;
use self::task::{FrameScoped, Task};

// ============================================================================
// State
// ============================================================================

struct FlowInner {
    id: FlowId,
    config: FlowConfig,
    state: RefCell<FlowState>,
}

#[derive(Default)]
struct FlowState {
    frames: FxHashMap<FrameId, Frame>,
    tasks: FxHashMap<TaskId, Task>,
    /// Active frames, innermost last.
    stack: Vec<FrameId>,
    /// Frame receiving new tasks while an async body is polled.
    target: Option<FrameId>,
    tick_scheduled: bool,
    /// Unhandled-rejection checks still outstanding.
    pending_rejections: usize,
    /// Bumped by reset; stale rejection checks compare against it.
    epoch: u64,
    emit_idle: bool,
    events: EventEmitter,
}

// ============================================================================
// ControlFlow
// ============================================================================

/// A cooperative task scheduler.
///
/// Cloning yields another handle to the same flow. Flows are bound to the
/// thread that created them and run on a tokio
/// [`LocalSet`](tokio::task::LocalSet).
#[derive(Clone)]
pub struct ControlFlow {
    inner: Rc<FlowInner>,
}

impl Default for ControlFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlow {
    /// Creates a flow with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> FlowBuilder {
        FlowBuilder::new()
    }

    pub(crate) fn with_config(config: FlowConfig) -> Self {
        Self {
            inner: Rc::new(FlowInner {
                id: FlowId::next(),
                config,
                state: RefCell::new(FlowState::default()),
            }),
        }
    }

    /// Returns the flow ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FlowId {
        self.inner.id
    }

    /// Returns the flow settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    /// Returns `true` if both handles refer to the same flow.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &ControlFlow) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn downgrade(&self) -> WeakFlow {
        WeakFlow(Rc::downgrade(&self.inner))
    }
}

#[derive(Clone)]
struct WeakFlow(Weak<FlowInner>);

impl WeakFlow {
    fn upgrade(&self) -> Option<ControlFlow> {
        self.0.upgrade().map(|inner| ControlFlow { inner })
    }
}

// ============================================================================
// ControlFlow - Scheduling
// ============================================================================

impl ControlFlow {
    /// Schedules `f` as a task and returns its promise.
    ///
    /// The task's promise settles once `f` and everything it scheduled have
    /// finished. A returned promise is awaited before the task completes.
    pub fn execute<F, R>(&self, f: F) -> Promise
    where
        F: FnOnce() -> Result<R> + 'static,
        R: Into<Value>,
    {
        self.schedule_task(None, None, Box::new(move || f().map(Into::into)))
    }

    /// Schedules a described task.
    ///
    /// The description shows up in `scheduleTask` events, schedule dumps
    /// and long stack traces.
    pub fn execute_named<F, R>(&self, description: impl Into<String>, f: F) -> Promise
    where
        F: FnOnce() -> Result<R> + 'static,
        R: Into<Value>,
    {
        self.schedule_task(
            Some(description.into()),
            None,
            Box::new(move || f().map(Into::into)),
        )
    }

    /// Schedules an async task body.
    ///
    /// Tasks scheduled by the body between `.await` points nest in the
    /// task's own frame, and the task completes when the future does.
    pub fn execute_async<F, Fut, R>(&self, description: impl Into<String>, factory: F) -> Promise
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
        R: Into<Value>,
    {
        let flow = self.clone();
        self.schedule_task(
            Some(description.into()),
            None,
            Box::new(move || {
                let frame = flow
                    .active_frame()
                    .ok_or_else(|| Error::type_error("async task started outside a frame"))?;
                let scoped = FrameScoped::new(flow.clone(), frame, factory());
                Ok(Value::Promise(promise::from_future(scoped)))
            }),
        )
    }

    /// Schedules a task that completes after `duration`.
    pub fn timeout(&self, duration: Duration, description: Option<&str>) -> Promise {
        let description = description.map_or_else(
            || format!("timeout {}ms", duration.as_millis()),
            str::to_string,
        );
        self.execute_named(description, move || Ok(promise::delayed(duration)))
    }

    /// Returns a promise fulfilled the next time the flow becomes idle.
    ///
    /// Fulfilled immediately if the flow is idle already. A flow whose root
    /// frame failed with an uncaught exception does not emit `idle` for
    /// that frame.
    pub fn when_idle(&self) -> Promise {
        let deferred = Deferred::in_flow(self);
        if self.is_idle() {
            deferred.fulfill(Value::Undefined);
            return deferred.promise();
        }

        let resolver = deferred.clone();
        self.once(FlowEvent::Idle, move |_| resolver.fulfill(Value::Undefined));
        deferred.promise()
    }
}

// ============================================================================
// ControlFlow - Inspection
// ============================================================================

impl ControlFlow {
    /// Returns `true` when no frame is active and no unhandled rejection
    /// check is outstanding.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.borrow();
        state.stack.is_empty() && state.pending_rejections == 0
    }

    /// Number of tasks queued or running.
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.inner.state.borrow().tasks.len()
    }

    /// Renders the frame stack, innermost last.
    ///
    /// ```text
    /// ControlFlow::1
    /// | Frame::2 root [settled]
    /// | | Task::4 "b"
    /// | Frame::5 Task::3 "a" [running]
    /// ```
    #[must_use]
    pub fn schedule_description(&self) -> String {
        let state = self.inner.state.borrow();
        let mut lines = vec![self.id().to_string()];

        for frame_id in &state.stack {
            let Some(frame) = state.frames.get(frame_id) else {
                continue;
            };
            lines.push(format!("| {}", frame.describe(&state.tasks)));
            lines.extend(
                frame
                    .describe_queue(&state.tasks)
                    .into_iter()
                    .map(|child| format!("| | {child}")),
            );
        }

        lines.join("\n")
    }

    pub(crate) fn active_frame(&self) -> Option<FrameId> {
        self.inner.state.borrow().stack.last().copied()
    }

    /// Returns `true` while `frame` exists and its body has not settled.
    pub(crate) fn frame_is_open(&self, frame: FrameId) -> bool {
        self.inner
            .state
            .borrow()
            .frames
            .get(&frame)
            .is_some_and(Frame::is_open)
    }

    /// Runs `hook` when `frame` drains or the flow is reset.
    ///
    /// Returns `false`, dropping the hook, if the frame is already gone.
    pub(crate) fn on_frame_close(
        &self,
        frame: FrameId,
        hook: impl FnOnce(&Result<Value>) + 'static,
    ) -> bool {
        match self.inner.state.borrow_mut().frames.get_mut(&frame) {
            Some(target) => {
                target.on_close(Box::new(hook));
                true
            }
            None => false,
        }
    }

    /// Sets the async scheduling target, returning the previous one.
    pub(crate) fn replace_target(&self, target: Option<FrameId>) -> Option<FrameId> {
        std::mem::replace(&mut self.inner.state.borrow_mut().target, target)
    }
}

// ============================================================================
// ControlFlow - Events
// ============================================================================

impl ControlFlow {
    /// Registers a listener for `event`.
    pub fn on(&self, event: FlowEvent, callback: impl FnMut(&EventData) + 'static) -> ListenerId {
        self.inner
            .state
            .borrow_mut()
            .events
            .add(event, false, callback)
    }

    /// Registers a listener removed after its first invocation.
    pub fn once(&self, event: FlowEvent, callback: impl FnMut(&EventData) + 'static) -> ListenerId {
        self.inner
            .state
            .borrow_mut()
            .events
            .add(event, true, callback)
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn remove_listener(&self, event: FlowEvent, id: ListenerId) -> bool {
        self.inner.state.borrow_mut().events.remove(event, id)
    }

    /// Removes the listeners of `event`, or all listeners for `None`.
    pub fn remove_all_listeners(&self, event: Option<FlowEvent>) {
        self.inner.state.borrow_mut().events.remove_all(event);
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: FlowEvent) -> usize {
        self.inner.state.borrow().events.count(event)
    }

    pub(crate) fn emit(&self, data: EventData) {
        let callbacks = self
            .inner
            .state
            .borrow_mut()
            .events
            .take_for_emit(data.event());
        events::invoke(callbacks, &data);
    }
}

impl fmt::Debug for ControlFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlFlow")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// create_flow
// ============================================================================

/// Creates an isolated flow and runs `callback` as its first task.
///
/// Returns the task's promise; the new flow never blocks other flows.
pub fn create_flow<F, R>(callback: F) -> Promise
where
    F: FnOnce(&ControlFlow) -> Result<R> + 'static,
    R: Into<Value>,
{
    let flow = ControlFlow::new();
    let handle = flow.clone();
    flow.execute(move || callback(&handle))
}
