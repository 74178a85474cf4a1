//! Frames: groups of sibling work that drain together.
//!
//! Every task body and every promise callback runs in its own frame. Work
//! scheduled while a frame is on top of the stack is queued in that frame,
//! and the frame is drained only once its queue is empty and its own outcome
//! has settled.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::identifiers::{FrameId, TaskId};
use crate::promise::Deferred;
use crate::value::Value;

use super::task::{Body, Task};

// ============================================================================
// CallbackJob
// ============================================================================

/// A promise continuation waiting to run as flow work.
pub(crate) struct CallbackJob {
    run: Body,
    derived: Deferred,
}

impl CallbackJob {
    /// Pairs a handler invocation with the promise it settles.
    pub(crate) fn new(run: Body, derived: Deferred) -> Self {
        Self { run, derived }
    }

    pub(crate) fn derived(&self) -> &Deferred {
        &self.derived
    }

    pub(crate) fn into_parts(self) -> (Body, Deferred) {
        (self.run, self.derived)
    }
}

// ============================================================================
// Node
// ============================================================================

/// Not-yet-started child of a frame.
pub(crate) enum Node {
    Task(TaskId),
    Callback(CallbackJob),
}

impl Node {
    fn describe(&self, tasks: &FxHashMap<TaskId, Task>) -> String {
        match self {
            Self::Task(id) => match tasks.get(id) {
                Some(task) => task.to_string(),
                None => format!("{id}"),
            },
            Self::Callback(_) => "callback".to_string(),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Runs once when a frame drains or is discarded, with its final outcome.
pub(crate) type CloseHook = Box<dyn FnOnce(&Result<Value>)>;

/// What a frame was pushed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// Bottom of the stack; has no body.
    Root,
    /// Runs a task body.
    Task(TaskId),
    /// Runs a promise callback.
    Callback,
}

/// Outcome of a frame's own body.
pub(crate) enum Outcome {
    /// The body is executing.
    Running,
    /// The body returned a promise that has not settled.
    Waiting,
    /// Final result of the body.
    Settled(Result<Value>),
}

pub(crate) struct Frame {
    pub(crate) id: FrameId,
    pub(crate) kind: FrameKind,
    pub(crate) queue: VecDeque<Node>,
    /// Insertion point for callbacks dispatched after the body returned.
    cursor: usize,
    pub(crate) outcome: Outcome,
    /// Settled with the outcome when the frame drains.
    pub(crate) completion: Option<Deferred>,
    pub(crate) failed: bool,
    closers: Vec<CloseHook>,
}

impl Frame {
    /// Creates a root frame.
    pub(crate) fn root() -> Self {
        Self {
            id: FrameId::next(),
            kind: FrameKind::Root,
            queue: VecDeque::new(),
            cursor: 0,
            outcome: Outcome::Settled(Ok(Value::Undefined)),
            completion: None,
            failed: false,
            closers: Vec::new(),
        }
    }

    /// Creates a frame about to run a body.
    pub(crate) fn running(kind: FrameKind, completion: Deferred) -> Self {
        Self {
            id: FrameId::next(),
            kind,
            queue: VecDeque::new(),
            cursor: 0,
            outcome: Outcome::Running,
            completion: Some(completion),
            failed: false,
            closers: Vec::new(),
        }
    }

    /// Appends a task.
    pub(crate) fn push_task(&mut self, id: TaskId) {
        self.queue.push_back(Node::Task(id));
    }

    /// Queues a callback.
    ///
    /// While the body runs, callbacks queue behind already scheduled work.
    /// Afterwards they go ahead of remaining siblings, in dispatch order.
    pub(crate) fn insert_callback(&mut self, job: CallbackJob) {
        if matches!(self.outcome, Outcome::Running) {
            self.queue.push_back(Node::Callback(job));
            return;
        }
        let at = self.cursor.min(self.queue.len());
        self.queue.insert(at, Node::Callback(job));
        self.cursor = at + 1;
    }

    /// Registers a hook for when the frame closes.
    pub(crate) fn on_close(&mut self, hook: CloseHook) {
        self.closers.push(hook);
    }

    /// Takes the registered close hooks.
    pub(crate) fn take_closers(&mut self) -> Vec<CloseHook> {
        std::mem::take(&mut self.closers)
    }

    /// Returns `true` while the frame's own body has not settled.
    pub(crate) fn is_open(&self) -> bool {
        !matches!(self.outcome, Outcome::Settled(_))
    }

    /// Takes the next child.
    pub(crate) fn pop(&mut self) -> Option<Node> {
        self.cursor = 0;
        self.queue.pop_front()
    }

    /// Removes a queued task. Returns `true` if it was queued here.
    pub(crate) fn remove_task(&mut self, id: TaskId) -> bool {
        let Some(index) = self
            .queue
            .iter()
            .position(|node| matches!(node, Node::Task(queued) if *queued == id))
        else {
            return false;
        };
        self.queue.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        true
    }

    /// Removes every queued child.
    pub(crate) fn drain(&mut self) -> Vec<Node> {
        self.cursor = 0;
        self.queue.drain(..).collect()
    }

    /// Single-line summary for schedule dumps.
    pub(crate) fn describe(&self, tasks: &FxHashMap<TaskId, Task>) -> String {
        let owner = match self.kind {
            FrameKind::Root => "root".to_string(),
            FrameKind::Task(id) => tasks
                .get(&id)
                .map_or_else(|| id.to_string(), ToString::to_string),
            FrameKind::Callback => "callback".to_string(),
        };
        let state = match (&self.outcome, self.failed) {
            (_, true) => "failed",
            (Outcome::Running, _) => "running",
            (Outcome::Waiting, _) => "waiting",
            (Outcome::Settled(_), _) => "settled",
        };
        format!("{} {owner} [{state}]", self.id)
    }

    /// Summaries of the queued children.
    pub(crate) fn describe_queue(&self, tasks: &FxHashMap<TaskId, Task>) -> Vec<String> {
        self.queue.iter().map(|node| node.describe(tasks)).collect()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("queued", &self.queue.len())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::flow::ControlFlow;

    fn job(flow: &ControlFlow) -> CallbackJob {
        CallbackJob::new(Box::new(|| Ok(Value::Undefined)), Deferred::in_flow(flow))
    }

    fn order(frame: &Frame) -> Vec<String> {
        frame
            .queue
            .iter()
            .map(|node| match node {
                Node::Task(id) => id.to_string(),
                Node::Callback(_) => "cb".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_callbacks_go_ahead_of_siblings_after_body() {
        let flow = ControlFlow::new();
        let mut frame = Frame::root();
        let a = TaskId::next();
        let b = TaskId::next();
        frame.push_task(a);
        frame.push_task(b);

        frame.insert_callback(job(&flow));
        frame.insert_callback(job(&flow));
        let expected = vec!["cb".to_string(), "cb".to_string(), a.to_string(), b.to_string()];
        assert_eq!(order(&frame), expected);

        assert!(matches!(frame.pop(), Some(Node::Callback(_))));
        frame.insert_callback(job(&flow));
        assert_eq!(order(&frame)[0], "cb");
        assert_eq!(frame.queue.len(), 4);
    }

    #[test]
    fn test_callbacks_queue_in_order_while_running() {
        let flow = ControlFlow::new();
        let mut frame = Frame::running(FrameKind::Callback, Deferred::in_flow(&flow));
        let a = TaskId::next();
        frame.push_task(a);
        frame.insert_callback(job(&flow));

        assert_eq!(order(&frame), vec![a.to_string(), "cb".to_string()]);
    }

    #[test]
    fn test_remove_task_adjusts_cursor() {
        let flow = ControlFlow::new();
        let mut frame = Frame::root();
        let a = TaskId::next();
        frame.push_task(a);
        frame.insert_callback(job(&flow));
        frame.insert_callback(job(&flow));

        let b = TaskId::next();
        frame.queue.push_front(Node::Task(b));
        frame.cursor += 1;
        assert!(frame.remove_task(b));
        assert!(!frame.remove_task(b));
        frame.insert_callback(job(&flow));

        assert_eq!(order(&frame)[..3], ["cb", "cb", "cb"]);
        assert_eq!(order(&frame)[3], a.to_string());
    }
}
