//! The tick loop.
//!
//! One tick advances the flow by exactly one step:
//!
//! | Active frame | Step |
//! |--------------|------|
//! | has a queued child | start it in a new frame |
//! | empty queue, settled outcome | pop the frame and settle its owner |
//! | empty queue, body still waiting | nothing; a settlement requests the next tick |
//! | none | emit `idle` once |
//!
//! Ticks are host microtasks. No flow state borrow is held while user code
//! runs or while promises settle.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, error, trace};

use crate::context;
use crate::error::{CancelKind, Error, Result};
use crate::host;
use crate::identifiers::{FrameId, TaskId};
use crate::promise::{self, Deferred, Promise};
use crate::value::Value;

use super::ControlFlow;
use super::FlowState;
use super::events::{self, EventData, FlowEvent};
use super::frame::{CallbackJob, Frame, FrameKind, Node, Outcome};
use super::task::{Body, Task, TaskStatus};

// ============================================================================
// Step
// ============================================================================

enum Step {
    /// Nothing to do until something settles.
    Stalled,
    /// Progress was made without running user code.
    Skip,
    Idle,
    Run { frame: FrameId, body: Body },
    Complete(FrameId),
}

enum Abort {
    Uncaught,
    Root(Vec<Node>),
    Frame(Vec<Node>),
}

// ============================================================================
// FlowState - Frame Arena
// ============================================================================

impl FlowState {
    fn next_step(&mut self) -> Step {
        if self.pending_rejections > 0 {
            return Step::Stalled;
        }

        let Some(&top) = self.stack.last() else {
            return if std::mem::take(&mut self.emit_idle) {
                Step::Idle
            } else {
                Step::Stalled
            };
        };

        let Some(frame) = self.frames.get_mut(&top) else {
            self.stack.pop();
            return Step::Skip;
        };

        let node = frame.pop();
        let settled = matches!(frame.outcome, Outcome::Settled(_));

        match node {
            Some(Node::Task(id)) => self.start_task(id),
            Some(Node::Callback(job)) => {
                if !job.derived().is_pending() {
                    return Step::Skip;
                }
                let (body, derived) = job.into_parts();
                let frame = self.push_frame(Frame::running(FrameKind::Callback, derived));
                Step::Run { frame, body }
            }
            None if settled => Step::Complete(top),
            None => Step::Stalled,
        }
    }

    fn start_task(&mut self, id: TaskId) -> Step {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Step::Skip;
        };

        let body = task.body.take();
        let deferred = task.deferred.clone();
        let Some(body) = body.filter(|_| deferred.is_pending()) else {
            self.tasks.remove(&id);
            return Step::Skip;
        };

        let frame = self.push_frame(Frame::running(FrameKind::Task(id), deferred));
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Running(frame);
        }
        Step::Run { frame, body }
    }

    fn push_frame(&mut self, frame: Frame) -> FrameId {
        let id = frame.id;
        self.frames.insert(id, frame);
        self.stack.push(id);
        id
    }

    /// Picks the frame new work goes to, creating a root frame if needed.
    fn target_frame(&mut self, hint: Option<FrameId>) -> FrameId {
        let existing = hint
            .filter(|id| self.frames.contains_key(id))
            .or_else(|| self.target.filter(|id| self.frames.contains_key(id)))
            .or_else(|| self.stack.last().copied());

        match existing {
            Some(id) => id,
            None => self.push_frame(Frame::root()),
        }
    }
}

// ============================================================================
// ControlFlow - Scheduling
// ============================================================================

impl ControlFlow {
    /// Queues a task and returns its promise.
    ///
    /// `frame` overrides the target frame while it exists.
    pub(crate) fn schedule_task(
        &self,
        description: Option<String>,
        frame: Option<FrameId>,
        body: Body,
    ) -> Promise {
        let id = TaskId::next();
        let label = description.clone();
        let deferred = Deferred::labelled(self.clone(), move || {
            format!("Task: {}", label.as_deref().unwrap_or("<anonymous>"))
        });
        let promise = deferred.promise();

        let weak = self.downgrade();
        promise.set_cancel_hook(move |reason| {
            if let Some(flow) = weak.upgrade() {
                flow.cancel_task(id, reason);
            }
        });

        let frame = {
            let mut state = self.inner.state.borrow_mut();
            let frame = state.target_frame(frame);
            if let Some(target) = state.frames.get_mut(&frame) {
                target.push_task(id);
            }
            state.tasks.insert(
                id,
                Task {
                    id,
                    description: description.clone(),
                    body: Some(body),
                    deferred,
                    status: TaskStatus::Queued(frame),
                },
            );
            frame
        };

        debug!(
            flow = %self.id(),
            task = %id,
            frame = %frame,
            description = description.as_deref().unwrap_or(""),
            "Task scheduled"
        );

        self.emit(EventData::ScheduleTask(description));
        self.request_tick();
        promise
    }

    /// Queues a promise continuation in the active frame.
    pub(crate) fn schedule_callback(&self, job: CallbackJob) {
        {
            let mut state = self.inner.state.borrow_mut();
            let frame = state.target_frame(None);
            if let Some(target) = state.frames.get_mut(&frame) {
                target.insert_callback(job);
            }
        }
        self.request_tick();
    }

    /// Requests a tick unless one is in flight.
    pub(crate) fn request_tick(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.tick_scheduled {
                return;
            }
            state.tick_scheduled = true;
        }

        let weak = self.downgrade();
        host::enqueue(move || {
            if let Some(flow) = weak.upgrade() {
                flow.tick();
            }
        });
    }

    fn tick(&self) {
        self.inner.state.borrow_mut().tick_scheduled = false;
        if self.step() {
            self.request_tick();
        }
    }

    /// Advances one step. Returns `true` if more work may be ready.
    fn step(&self) -> bool {
        let step = self.inner.state.borrow_mut().next_step();

        match step {
            Step::Stalled => false,
            Step::Skip => true,
            Step::Idle => {
                debug!(flow = %self.id(), "Flow idle");
                self.emit(EventData::Idle);
                false
            }
            Step::Run { frame, body } => {
                self.run_body(frame, body);
                true
            }
            Step::Complete(frame) => {
                self.complete_frame(frame);
                true
            }
        }
    }
}

// ============================================================================
// ControlFlow - Frame Lifecycle
// ============================================================================

impl ControlFlow {
    fn run_body(&self, frame: FrameId, body: Body) {
        trace!(flow = %self.id(), frame = %frame, "Running frame body");

        let outcome = {
            let _guard = context::enter(self);
            body()
        };
        self.record_outcome(frame, outcome);
    }

    fn record_outcome(&self, frame: FrameId, outcome: Result<Value>) {
        let value = match outcome {
            Ok(value) if value.has_callable_then() => value,
            other => {
                self.settle_frame(frame, other);
                return;
            }
        };

        let awaited = promise::when(value);
        let is_own = {
            let mut state = self.inner.state.borrow_mut();
            let Some(target) = state.frames.get_mut(&frame) else {
                return;
            };
            let is_own = target
                .completion
                .as_ref()
                .is_some_and(|completion| completion.promise().ptr_eq(&awaited));
            if !is_own && matches!(target.outcome, Outcome::Running) {
                target.outcome = Outcome::Waiting;
            }
            is_own
        };

        if is_own {
            self.settle_frame(
                frame,
                Err(Error::type_error("A promise can not be resolved with itself")),
            );
            return;
        }

        let weak = self.downgrade();
        awaited.subscribe_raw(move |outcome| {
            if let Some(flow) = weak.upgrade() {
                flow.settle_frame(frame, outcome);
            }
        });
    }

    /// Records a frame's final outcome.
    ///
    /// A failure cancels the frame's queued children.
    pub(crate) fn settle_frame(&self, frame: FrameId, outcome: Result<Value>) {
        let cancelled = {
            let mut state = self.inner.state.borrow_mut();
            let Some(target) = state.frames.get_mut(&frame) else {
                return;
            };
            if matches!(target.outcome, Outcome::Settled(_)) {
                return;
            }

            let cancelled = match &outcome {
                Err(err) => {
                    target.failed = true;
                    Some((target.drain(), err.clone()))
                }
                Ok(_) => None,
            };
            target.outcome = Outcome::Settled(outcome);
            cancelled
        };

        if let Some((nodes, cause)) = cancelled {
            self.cancel_nodes(nodes, CancelKind::SiblingFailure, &cause);
        }
        self.request_tick();
    }

    fn complete_frame(&self, frame: FrameId) {
        let (completion, closers, outcome) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(mut done) = state.frames.remove(&frame) else {
                return;
            };
            state.stack.retain(|id| *id != frame);
            if let FrameKind::Task(task) = done.kind {
                state.tasks.remove(&task);
            }
            if state.stack.is_empty() {
                state.emit_idle = true;
            }

            let closers = done.take_closers();
            let outcome = match done.outcome {
                Outcome::Settled(outcome) => outcome,
                Outcome::Running | Outcome::Waiting => Ok(Value::Undefined),
            };
            (done.completion, closers, outcome)
        };

        trace!(
            flow = %self.id(),
            frame = %frame,
            failed = outcome.is_err(),
            "Frame drained"
        );

        for close in closers {
            close(&outcome);
        }
        if let Some(completion) = completion {
            completion.settle(outcome);
        }
    }

    /// Rejects the promises of discarded work.
    fn cancel_nodes(&self, nodes: Vec<Node>, kind: CancelKind, cause: &Error) {
        for node in nodes {
            let deferred = match node {
                Node::Task(id) => self
                    .inner
                    .state
                    .borrow_mut()
                    .tasks
                    .remove(&id)
                    .map(|task| task.deferred),
                Node::Callback(job) => Some(job.into_parts().1),
            };

            if let Some(deferred) = deferred {
                deferred.settle(Err(Error::cancelled(kind, Some(cause.clone()))));
            }
        }
    }
}

// ============================================================================
// ControlFlow - Failure Handling
// ============================================================================

impl ControlFlow {
    /// Cancels a task whose promise was cancelled.
    ///
    /// A queued task is dropped; a running task has its queued children
    /// discarded and completes with `reason`.
    pub(crate) fn cancel_task(&self, id: TaskId, reason: Error) {
        let cancelled = {
            let mut state = self.inner.state.borrow_mut();
            let Some(status) = state.tasks.get(&id).map(|task| task.status) else {
                return;
            };

            match status {
                TaskStatus::Queued(frame) => {
                    if let Some(target) = state.frames.get_mut(&frame) {
                        target.remove_task(id);
                    }
                    state.tasks.remove(&id);
                    Vec::new()
                }
                TaskStatus::Running(frame) => match state.frames.get_mut(&frame) {
                    Some(target) => {
                        target.failed = true;
                        target.outcome = Outcome::Settled(Err(reason.clone()));
                        target.drain()
                    }
                    None => Vec::new(),
                },
            }
        };

        debug!(flow = %self.id(), task = %id, "Task cancelled");
        self.cancel_nodes(cancelled, CancelKind::Explicit, &reason);
        self.request_tick();
    }

    /// Pauses the flow until `promise` had its chance to be observed.
    pub(crate) fn track_unhandled(&self, promise: Promise, err: Error) {
        let epoch = {
            let mut state = self.inner.state.borrow_mut();
            state.pending_rejections += 1;
            state.epoch
        };
        trace!(flow = %self.id(), promise = %promise.id(), "Tracking unhandled rejection");

        let flow = self.clone();
        host::defer_turns(self.inner.config.unhandled_rejection_turns, move || {
            let current = {
                let mut state = flow.inner.state.borrow_mut();
                if state.epoch == epoch {
                    state.pending_rejections -= 1;
                    true
                } else {
                    false
                }
            };

            if current && !promise.is_handled() {
                debug!(flow = %flow.id(), error = %err, "Unhandled rejection");
                flow.abort_frame(err);
            }
            flow.request_tick();
        });
    }

    /// Fails the active frame with `err`.
    ///
    /// Queued siblings are cancelled. A failed root frame is discarded and
    /// reported as an uncaught exception.
    fn abort_frame(&self, err: Error) {
        let abort = {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            let top = state
                .stack
                .last()
                .and_then(|top| state.frames.get(top).map(|frame| (*top, frame.kind)));

            match top {
                None => Abort::Uncaught,
                Some((top, FrameKind::Root)) => {
                    let nodes = state
                        .frames
                        .remove(&top)
                        .map(|mut frame| frame.drain())
                        .unwrap_or_default();
                    state.stack.pop();
                    state.emit_idle = false;
                    Abort::Root(nodes)
                }
                Some((top, _)) => match state.frames.get_mut(&top) {
                    Some(frame) => {
                        frame.failed = true;
                        frame.outcome = Outcome::Settled(Err(err.clone()));
                        Abort::Frame(frame.drain())
                    }
                    None => Abort::Uncaught,
                },
            }
        };

        match abort {
            Abort::Uncaught => self.emit_uncaught(err),
            Abort::Root(nodes) => {
                self.cancel_nodes(nodes, CancelKind::SiblingFailure, &err);
                self.emit_uncaught(err);
            }
            Abort::Frame(nodes) => {
                self.cancel_nodes(nodes, CancelKind::SiblingFailure, &err);
            }
        }
    }

    fn emit_uncaught(&self, err: Error) {
        let callbacks = self
            .inner
            .state
            .borrow_mut()
            .events
            .take_for_emit(FlowEvent::UncaughtException);

        if callbacks.is_empty() {
            error!(flow = %self.id(), error = %err, "Uncaught exception in control flow");
            return;
        }
        events::invoke(callbacks, &EventData::UncaughtException(err));
    }

    /// Discards all work and listeners.
    ///
    /// Emits `reset` first, then rejects every queued or running task and
    /// pending callback with a reset cancellation.
    pub fn reset(&self) {
        self.emit(EventData::Reset);

        let (frames, tasks) = {
            let mut state = self.inner.state.borrow_mut();
            state.epoch += 1;
            state.pending_rejections = 0;
            state.stack.clear();
            state.target = None;
            state.emit_idle = false;
            state.events.remove_all(None);
            (
                std::mem::take(&mut state.frames),
                std::mem::take(&mut state.tasks),
            )
        };

        debug!(
            flow = %self.id(),
            frames = frames.len(),
            tasks = tasks.len(),
            "Flow reset"
        );

        let err = Error::cancelled(CancelKind::Reset, None);
        let reason = Err(err.clone());
        for (_, task) in tasks {
            task.deferred.settle(Err(err.clone()));
        }
        for (_, mut frame) in frames {
            for close in frame.take_closers() {
                close(&reason);
            }
            for node in frame.queue {
                if let Node::Callback(job) = node {
                    job.into_parts().1.settle(Err(err.clone()));
                }
            }
            if let Some(completion) = frame.completion {
                completion.settle(Err(err.clone()));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
