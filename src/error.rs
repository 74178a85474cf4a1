//! Error types for the WebDriver control flow.
//!
//! This module defines all error types used throughout the crate. A rejected
//! promise carries an [`Error`]; because one rejection is observed by every
//! handler chained on the promise, the type is cheaply cloneable (external
//! errors are held behind `Arc`).
//!
//! # Usage
//!
//! ```ignore
//! use webdriver_flow::{ControlFlow, Error, Value};
//!
//! let flow = ControlFlow::new();
//! let promise = flow.execute(|| Err(Error::application("boom")));
//! assert!(promise.await.is_err());
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Application | [`Error::Application`] |
//! | Scheduling | [`Error::Cancelled`], [`Error::WaitTimeout`], [`Error::PromiseTimeout`], [`Error::Type`] |
//! | Command | [`Error::Command`], [`Error::UnknownCommand`], [`Error::InvalidArgument`], [`Error::Protocol`] |
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//! | Debugging | [`Error::Annotated`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;
use crate::stack::{LongStackTrace, Snapshot};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// Task bodies and promise handlers return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// CancelKind
// ============================================================================

/// Why pending work was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// [`Promise::cancel`](crate::Promise::cancel) was called.
    Explicit,
    /// A sibling task in the same frame failed.
    SiblingFailure,
    /// The owning flow was reset.
    Reset,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::SiblingFailure => write!(f, "sibling failure"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Application Errors
    // ========================================================================
    /// Failure raised by a task body or a promise handler.
    #[error("{message}")]
    Application {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// Pending work was discarded (a `CancellationError`).
    ///
    /// Wraps the failure that triggered the cancellation, if any.
    #[error("Cancelled: {message}")]
    Cancelled {
        /// Why the work was discarded.
        kind: CancelKind,
        /// Message of the triggering failure, or a default.
        message: String,
        /// The triggering failure.
        #[source]
        cause: Option<Box<Error>>,
    },

    /// A polled wait condition never became truthy.
    #[error("{}Wait timed out after {elapsed_ms}ms", message_prefix(.message))]
    WaitTimeout {
        /// Caller supplied description.
        message: Option<String>,
        /// Milliseconds elapsed since the wait started.
        elapsed_ms: u64,
    },

    /// A waited-on promise did not settle in time.
    #[error(
        "{}Timed out waiting for promise to resolve after {elapsed_ms}ms",
        message_prefix(.message)
    )]
    PromiseTimeout {
        /// Caller supplied description.
        message: Option<String>,
        /// Milliseconds elapsed since the wait started.
        elapsed_ms: u64,
    },

    /// Scheduler invariant violation, e.g. resolving a promise with itself.
    #[error("TypeError: {message}")]
    Type {
        /// Description of the violation.
        message: String,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// Remote end reported a command failure.
    #[error("Command {name} failed: {message}")]
    Command {
        /// Command name.
        name: String,
        /// Error message from the remote end.
        message: String,
    },

    /// Remote end does not know the command.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command name.
        command: String,
    },

    /// Invalid argument in command parameters.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a builder is missing required settings.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Command request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[source] Arc<IoError>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] Arc<WsError>),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed,

    // ========================================================================
    // Debugging
    // ========================================================================
    /// An error carrying a long stack trace.
    ///
    /// Displays as the wrapped error; [`Error::stack`] renders the trace.
    #[error("{error}")]
    Annotated {
        /// The original error.
        error: Box<Error>,
        /// Scheduling snapshots, innermost first.
        trace: LongStackTrace,
    },
}

fn message_prefix(message: &Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("{message}\n"),
        _ => String::new(),
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Self::ChannelClosed
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an application error.
    #[inline]
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Creates a cancellation error, optionally wrapping its cause.
    pub fn cancelled(kind: CancelKind, cause: Option<Error>) -> Self {
        let message = match (&cause, kind) {
            (Some(cause), _) => match cause.inner() {
                Self::Cancelled { message, .. } => message.clone(),
                other => other.to_string(),
            },
            (None, CancelKind::Explicit) => "promise was cancelled".to_string(),
            (None, CancelKind::SiblingFailure) => "a sibling task failed".to_string(),
            (None, CancelKind::Reset) => "the control flow was reset".to_string(),
        };

        Self::Cancelled {
            kind,
            message,
            cause: cause.map(Box::new),
        }
    }

    /// Creates a wait timeout error.
    #[inline]
    pub fn wait_timeout(message: Option<String>, elapsed_ms: u64) -> Self {
        Self::WaitTimeout {
            message,
            elapsed_ms,
        }
    }

    /// Creates a promise wait timeout error.
    #[inline]
    pub fn promise_timeout(message: Option<String>, elapsed_ms: u64) -> Self {
        Self::PromiseTimeout {
            message,
            elapsed_ms,
        }
    }

    /// Creates a type error.
    #[inline]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Creates a command failure error.
    #[inline]
    pub fn command(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Long Stack Traces
// ============================================================================

impl Error {
    /// Appends a scheduling snapshot to this error's long stack trace.
    pub(crate) fn annotate(self, snapshot: Snapshot) -> Self {
        match self {
            Self::Annotated { error, mut trace } => {
                trace.push(snapshot);
                Self::Annotated { error, trace }
            }
            other => {
                let mut trace = LongStackTrace::default();
                trace.push(snapshot);
                Self::Annotated {
                    error: Box::new(other),
                    trace,
                }
            }
        }
    }

    /// Returns the error without its long stack trace annotation.
    #[must_use]
    pub fn inner(&self) -> &Error {
        match self {
            Self::Annotated { error, .. } => error.inner(),
            other => other,
        }
    }

    /// Returns the long stack trace, if one was recorded.
    #[must_use]
    pub fn long_stack_trace(&self) -> Option<&LongStackTrace> {
        match self {
            Self::Annotated { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// Renders the message followed by every recorded scheduling snapshot.
    #[must_use]
    pub fn stack(&self) -> String {
        match self {
            Self::Annotated { error, trace } => format!("{error}{trace}"),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a cancellation error.
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self.inner(), Self::Cancelled { .. })
    }

    /// Returns the cancellation kind, if this is a cancellation error.
    #[inline]
    #[must_use]
    pub fn cancel_kind(&self) -> Option<CancelKind> {
        match self.inner() {
            Self::Cancelled { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.inner(),
            Self::WaitTimeout { .. } | Self::PromiseTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a type error.
    #[inline]
    #[must_use]
    pub fn is_type_error(&self) -> bool {
        matches!(self.inner(), Self::Type { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.inner(),
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
