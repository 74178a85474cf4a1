//! Flow event surface.
//!
//! A plain observer list keyed by [`FlowEvent`]. `once` listeners are removed
//! before they are invoked, so a listener that re-registers itself from its
//! own callback behaves as expected.

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::identifiers::ListenerId;

// ============================================================================
// FlowEvent
// ============================================================================

/// Events emitted by a [`ControlFlow`](crate::ControlFlow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    /// The flow fully drained.
    Idle,
    /// An error escaped every handler.
    UncaughtException,
    /// A task was scheduled.
    ScheduleTask,
    /// The flow was reset.
    Reset,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::UncaughtException => write!(f, "uncaughtException"),
            Self::ScheduleTask => write!(f, "scheduleTask"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

// ============================================================================
// EventData
// ============================================================================

/// Payload delivered to listeners.
#[derive(Debug, Clone)]
pub enum EventData {
    /// See [`FlowEvent::Idle`].
    Idle,
    /// See [`FlowEvent::UncaughtException`].
    UncaughtException(Error),
    /// See [`FlowEvent::ScheduleTask`]; carries the task description.
    ScheduleTask(Option<String>),
    /// See [`FlowEvent::Reset`].
    Reset,
}

impl EventData {
    /// Returns the event this payload belongs to.
    #[must_use]
    pub fn event(&self) -> FlowEvent {
        match self {
            Self::Idle => FlowEvent::Idle,
            Self::UncaughtException(_) => FlowEvent::UncaughtException,
            Self::ScheduleTask(_) => FlowEvent::ScheduleTask,
            Self::Reset => FlowEvent::Reset,
        }
    }

    /// Returns the error of an `UncaughtException` payload.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::UncaughtException(err) => Some(err),
            _ => None,
        }
    }
}

// ============================================================================
// EventEmitter
// ============================================================================

/// Listener callback type.
pub(crate) type Callback = Rc<RefCell<dyn FnMut(&EventData)>>;

struct Listener {
    id: ListenerId,
    once: bool,
    callback: Callback,
}

/// Listener registry owned by a flow.
#[derive(Default)]
pub(crate) struct EventEmitter {
    listeners: FxHashMap<FlowEvent, Vec<Listener>>,
}

impl EventEmitter {
    /// Registers a listener.
    pub(crate) fn add(
        &mut self,
        event: FlowEvent,
        once: bool,
        callback: impl FnMut(&EventData) + 'static,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.entry(event).or_default().push(Listener {
            id,
            once,
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    /// Removes one listener. Returns `true` if it was registered.
    pub(crate) fn remove(&mut self, event: FlowEvent, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|listener| listener.id != id);
        before != list.len()
    }

    /// Removes every listener for `event`, or every listener at all.
    pub(crate) fn remove_all(&mut self, event: Option<FlowEvent>) {
        match event {
            Some(event) => {
                self.listeners.remove(&event);
            }
            None => self.listeners.clear(),
        }
    }

    /// Number of listeners registered for `event`.
    pub(crate) fn count(&self, event: FlowEvent) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    /// Returns the callbacks to invoke for `event`, dropping `once` entries.
    ///
    /// The caller invokes them after releasing any borrow on the flow.
    pub(crate) fn take_for_emit(&mut self, event: FlowEvent) -> Vec<Callback> {
        let Some(list) = self.listeners.get_mut(&event) else {
            return Vec::new();
        };
        let callbacks = list
            .iter()
            .map(|listener| Rc::clone(&listener.callback))
            .collect();
        list.retain(|listener| !listener.once);
        callbacks
    }
}

/// Invokes callbacks collected by [`EventEmitter::take_for_emit`].
pub(crate) fn invoke(callbacks: Vec<Callback>, data: &EventData) {
    for callback in callbacks {
        // A listener emitting its own event re-entrantly is skipped.
        if let Ok(mut callback) = callback.try_borrow_mut() {
            (*callback)(data);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
