//! Long stack trace capture.
//!
//! When long stack traces are enabled (see
//! [`set_long_stack_traces`](crate::context::set_long_stack_traces)), every
//! promise construction, `then` registration and task creation snapshots the
//! native stack. On rejection the snapshots are appended, innermost first, to
//! the error so the logical chain of scheduling that led to a failure can be
//! read back with [`Error::stack`](crate::Error::stack).

// ============================================================================
// Imports
// ============================================================================

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use crate::context;

// ============================================================================
// Snapshot
// ============================================================================

/// A labelled native stack captured at a scheduling point.
#[derive(Clone)]
pub struct Snapshot {
    label: String,
    backtrace: Arc<Backtrace>,
}

impl Snapshot {
    /// Captures a snapshot when long stack traces are enabled on this thread.
    pub(crate) fn capture(label: impl FnOnce() -> String) -> Option<Self> {
        if !context::long_stack_traces() {
            return None;
        }

        Some(Self {
            label: label(),
            backtrace: Arc::new(Backtrace::force_capture()),
        })
    }

    /// Returns the label, e.g. `Promise: then` or `Task: click`.
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LongStackTrace
// ============================================================================

/// Ordered list of snapshots attached to a rejection, innermost first.
#[derive(Debug, Clone, Default)]
pub struct LongStackTrace {
    snapshots: Vec<Snapshot>,
}

impl LongStackTrace {
    /// Appends a snapshot.
    pub(crate) fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    /// Returns the labels in order, innermost first.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.snapshots.iter().map(Snapshot::label).collect()
    }

    /// Returns the number of snapshots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns `true` if no snapshot was recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl fmt::Display for LongStackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for snapshot in &self.snapshots {
            write!(f, "\nFrom: {}\n{}", snapshot.label, snapshot.backtrace)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_disabled_by_default() {
        assert!(Snapshot::capture(|| "Promise: new".to_string()).is_none());
    }

    #[test]
    fn test_capture_when_enabled() {
        context::set_long_stack_traces(true);
        let snapshot = Snapshot::capture(|| "Task: click".to_string()).expect("captured");
        context::set_long_stack_traces(false);

        assert_eq!(snapshot.label(), "Task: click");
    }

    #[test]
    fn test_trace_display_lists_labels() {
        context::set_long_stack_traces(true);
        let mut trace = LongStackTrace::default();
        trace.push(Snapshot::capture(|| "Promise: then".to_string()).expect("captured"));
        trace.push(Snapshot::capture(|| "Task: outer".to_string()).expect("captured"));
        context::set_long_stack_traces(false);

        assert_eq!(trace.labels(), vec!["Promise: then", "Task: outer"]);
        let rendered = trace.to_string();
        assert!(rendered.contains("From: Promise: then"));
        assert!(rendered.find("Promise: then") < rendered.find("Task: outer"));
    }
}
