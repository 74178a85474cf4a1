//! WebSocket transport layer.
//!
//! Ships commands to a remote end and routes responses back to callers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌─────────────────┐
//! │  WebDriver       │                           │  Remote end     │
//! │  (flow tasks)    │         WebSocket         │                 │
//! │        ↓         │◄─────────────────────────►│  WebSocket      │
//! │  WebSocketExec.  │    {id, name, params}     │  server         │
//! └──────────────────┘                           └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket executor and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket executor and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WebSocketExecutor;
