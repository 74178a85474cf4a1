//! Scheduled tasks and async task bodies.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::context;
use crate::error::Result;
use crate::identifiers::{FrameId, TaskId};
use crate::promise::Deferred;
use crate::value::Value;

use super::ControlFlow;

// ============================================================================
// Task
// ============================================================================

/// A task or callback body.
pub(crate) type Body = Box<dyn FnOnce() -> Result<Value>>;

/// Where a task currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    /// Waiting in the given frame's queue.
    Queued(FrameId),
    /// Running in its own frame.
    Running(FrameId),
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) description: Option<String>,
    /// Taken when the task starts; a task runs at most once.
    pub(crate) body: Option<Body>,
    pub(crate) deferred: Deferred,
    pub(crate) status: TaskStatus,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} {description:?}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

// ============================================================================
// FrameScoped
// ============================================================================

/// Runs every poll of an async task body with its flow entered and its
/// frame as the scheduling target.
///
/// Tasks scheduled between two `.await` points therefore nest under the
/// task that scheduled them.
pub(crate) struct FrameScoped<F> {
    flow: ControlFlow,
    frame: FrameId,
    future: Pin<Box<F>>,
}

impl<F> FrameScoped<F> {
    pub(crate) fn new(flow: ControlFlow, frame: FrameId, future: F) -> Self {
        Self {
            flow,
            frame,
            future: Box::pin(future),
        }
    }
}

impl<F: Future> Future for FrameScoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _guard = context::enter(&this.flow);
        let previous = this.flow.replace_target(Some(this.frame));
        let poll = this.future.as_mut().poll(cx);
        this.flow.replace_target(previous);
        poll
    }
}
