//! WebDriver Flow - promises and a deterministic control-flow scheduler for
//! WebDriver clients.
//!
//! Browser automation issues long sequences of dependent remote commands.
//! Instead of awaiting each one by hand, callers schedule them on a
//! [`ControlFlow`], which runs them one at a time in a predictable order
//! and routes failures to the nearest handler.
//!
//! # Architecture
//!
//! - **Promise**: single-assignment result with chaining, thenable
//!   adoption, cancellation and opt-in long stack traces
//! - **ControlFlow**: frame stack of scheduled tasks driven by a tick loop
//!   on the host's microtask queue
//! - **WebDriver**: turns each command into a flow task over an
//!   [`Executor`]
//!
//! Key ordering rules:
//!
//! - Sibling tasks run in the order they were scheduled
//! - Work scheduled by a task or callback drains before later siblings
//! - An unhandled failure cancels the remaining siblings in its frame
//!
//! # Quick Start
//!
//! ```ignore
//! use webdriver_flow::{ControlFlow, Result, Value, host};
//!
//! fn main() -> Result<()> {
//!     host::block_on(async {
//!         let flow = ControlFlow::new();
//!
//!         let first = flow.execute(|| Ok("a"));
//!         let nested = flow.clone();
//!         first.then(move |_| Ok(nested.execute(|| Ok("c"))));
//!         let last = flow.execute(|| Ok("b"));
//!
//!         // Ran a, c, b
//!         assert_eq!(last.await?, Value::from("b"));
//!         Ok(())
//!     })?
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`promise`] | [`Promise`], [`Deferred`] and combinators |
//! | [`flow`] | [`ControlFlow`] scheduler and events |
//! | [`driver`] | [`WebDriver`] facade and [`Executor`] trait |
//! | [`context`] | Current flow and long stack trace switch |
//! | [`host`] | Microtask, turn and timer queues over tokio |
//! | [`value`] | Dynamic [`Value`] carried by promises |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Command message types |
//! | [`transport`] | WebSocket executor |

// ============================================================================
// Modules
// ============================================================================

/// Ambient scheduling context.
///
/// Tracks the entered flow, the default flow and the long stack trace
/// switch per thread.
pub mod context;

/// WebDriver facade and command executor interface.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Control-flow scheduler.
pub mod flow;

/// Host event-loop adapter.
pub mod host;

/// Type-safe identifiers for scheduler and transport entities.
pub mod identifiers;

/// Promise implementation and combinators.
pub mod promise;

/// Command protocol message types.
pub mod protocol;

/// Long stack trace snapshots.
pub mod stack;

/// WebSocket transport layer.
pub mod transport;

/// Dynamic values settled by promises.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

// Scheduler types
pub use flow::{ControlFlow, EventData, FlowBuilder, FlowConfig, FlowEvent, create_flow};

// Promise types
pub use promise::{
    Deferred, NodeCallback, OnFulfilled, OnRejected, Promise, PromiseState, all,
    checked_node_call, delayed, filter, from_future, fully_resolved, map, when, when_with,
};

// Value types
pub use value::{Thenable, Value};

// Driver types
pub use driver::{Executor, WebDriver, WebDriverBuilder, execute_callback};

// Protocol and transport types
pub use protocol::{Command, CommandName};
pub use transport::WebSocketExecutor;

// Error types
pub use error::{CancelKind, Error, Result};

// Debugging types
pub use stack::{LongStackTrace, Snapshot};

// Identifier types
pub use identifiers::{FlowId, FrameId, ListenerId, PromiseId, RequestId, SessionId, TaskId};
