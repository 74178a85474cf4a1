//! Type-safe identifiers for scheduler and transport entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! Scheduler IDs are process-unique counters; request IDs are UUIDs
//! used for request/response correlation on the wire.
//!
//! | Type | Identifies |
//! |------|------------|
//! | [`FlowId`] | A [`ControlFlow`](crate::ControlFlow) instance |
//! | [`FrameId`] | A frame in a flow's arena |
//! | [`TaskId`] | A scheduled task |
//! | [`PromiseId`] | A promise (debug output only) |
//! | [`ListenerId`] | An event listener registration |
//! | [`RequestId`] | A command request on the wire |
//! | [`SessionId`] | A remote browser session |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Counter IDs
// ============================================================================

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next process-unique ID.
            #[inline]
            #[must_use]
            pub(crate) fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw numeric value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "::{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifies a control flow.
    FlowId,
    "ControlFlow"
);

counter_id!(
    /// Identifies a frame within a flow's arena.
    FrameId,
    "Frame"
);

counter_id!(
    /// Identifies a scheduled task.
    TaskId,
    "Task"
);

counter_id!(
    /// Identifies a promise.
    PromiseId,
    "Promise"
);

counter_id!(
    /// Identifies an event listener registration.
    ListenerId,
    "Listener"
);

// ============================================================================
// RequestId
// ============================================================================

/// Unique identifier for request/response correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Session identifier assigned by the remote end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session identifier.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_counter_id_display() {
        let id = FrameId(7);
        assert_eq!(id.to_string(), "Frame::7");
    }

    #[test]
    fn test_request_id_serializes_as_string() {
        let id = RequestId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id));

        let back: RequestId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
