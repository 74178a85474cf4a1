//! Command protocol message types.
//!
//! The scheduler treats commands as opaque; these types only matter to the
//! driver and the executor.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Remote | Command request |
//! | `Response` | Remote → Client | Command result or failure |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command names and parameters |
//! | `request` | Request and Response types |

// ============================================================================
// Submodules
// ============================================================================

/// Command names and parameters.
pub mod command;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, CommandName};
pub use request::{Request, Response, STATUS_SUCCESS, STATUS_UNKNOWN_COMMAND};
