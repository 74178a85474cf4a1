//! Request and Response message types.
//!
//! Wire format for commands sent over the executor's WebSocket.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Command;

// ============================================================================
// Constants
// ============================================================================

/// Status code of a successful response.
pub const STATUS_SUCCESS: u32 = 0;

/// Status code the remote end uses for commands it does not implement.
pub const STATUS_UNKNOWN_COMMAND: u32 = 9;

// ============================================================================
// Request
// ============================================================================

/// A command request.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "name": "get",
///   "parameters": { "url": "https://example.com" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Command with name and parameters.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            id: RequestId::generate(),
            command,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response to a [`Request`].
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "uuid", "status": 0, "value": "Example Domain" }
/// ```
///
/// Failure:
/// ```json
/// { "id": "uuid", "status": 7, "value": { "message": "no such element" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// `0` on success.
    pub status: u32,

    /// Result, or error details on failure.
    #[serde(default)]
    pub value: Value,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, value: Value) -> Self {
        Self {
            id,
            status: STATUS_SUCCESS,
            value,
        }
    }

    /// Creates a failure response carrying `message`.
    #[must_use]
    pub fn failure(id: RequestId, status: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            value: serde_json::json!({ "message": message.into() }),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Extracts the value of a response to `command`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownCommand`] for [`STATUS_UNKNOWN_COMMAND`]
    /// - [`Error::Command`] for any other failure status
    pub fn into_result(self, command: &Command) -> Result<Value> {
        match self.status {
            STATUS_SUCCESS => Ok(self.value),
            STATUS_UNKNOWN_COMMAND => Err(Error::unknown_command(command.name.as_str())),
            status => {
                let message = self
                    .value
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("status {status}"), str::to_string);
                Err(Error::command(command.name.as_str(), message))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
