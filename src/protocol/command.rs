//! Command definitions.
//!
//! A command is a name plus a parameter map. The scheduler never looks
//! inside; the driver builds commands and the executor ships them.
//!
//! # Commands
//!
//! | Name | Parameters |
//! |------|------------|
//! | `newSession` | `desiredCapabilities` |
//! | `get` | `url` |
//! | `getTitle` | - |
//! | `getCurrentUrl` | - |
//! | `executeScript` | `script`, `args` |
//! | `quit` | - |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

// ============================================================================
// CommandName
// ============================================================================

/// Names of the commands the driver issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandName {
    /// Start a browser session.
    NewSession,
    /// Navigate to a URL.
    Get,
    /// Read the document title.
    GetTitle,
    /// Read the current URL.
    GetCurrentUrl,
    /// Run a script in the page.
    ExecuteScript,
    /// End the session.
    Quit,
}

impl CommandName {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewSession => "newSession",
            Self::Get => "get",
            Self::GetTitle => "getTitle",
            Self::GetCurrentUrl => "getCurrentUrl",
            Self::ExecuteScript => "executeScript",
            Self::Quit => "quit",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "newSession" => Ok(Self::NewSession),
            "get" => Ok(Self::Get),
            "getTitle" => Ok(Self::GetTitle),
            "getCurrentUrl" => Ok(Self::GetCurrentUrl),
            "executeScript" => Ok(Self::ExecuteScript),
            "quit" => Ok(Self::Quit),
            other => Err(Error::unknown_command(other)),
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// A named command with parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name.
    pub name: CommandName,

    /// Named parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Command {
    /// Creates a command without parameters.
    #[inline]
    #[must_use]
    pub fn new(name: CommandName) -> Self {
        Self {
            name,
            parameters: Map::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Adds the `sessionId` parameter.
    #[must_use]
    pub fn with_session(self, session: &SessionId) -> Self {
        self.with_parameter("sessionId", session.as_str())
    }

    /// Returns a parameter.
    #[inline]
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Returns a string parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if it is missing or not a string.
    pub fn string_parameter(&self, key: &str) -> Result<&str> {
        self.parameter(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::invalid_argument(format!("{} requires a string `{key}`", self.name))
            })
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Command {
    /// `newSession` with the given capabilities.
    #[must_use]
    pub fn new_session(capabilities: Value) -> Self {
        Self::new(CommandName::NewSession).with_parameter("desiredCapabilities", capabilities)
    }

    /// `get` for `url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(CommandName::Get).with_parameter("url", url.into())
    }

    /// `getTitle`.
    #[inline]
    #[must_use]
    pub fn get_title() -> Self {
        Self::new(CommandName::GetTitle)
    }

    /// `getCurrentUrl`.
    #[inline]
    #[must_use]
    pub fn get_current_url() -> Self {
        Self::new(CommandName::GetCurrentUrl)
    }

    /// `executeScript` with positional arguments.
    #[must_use]
    pub fn execute_script(script: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(CommandName::ExecuteScript)
            .with_parameter("script", script.into())
            .with_parameter("args", args)
    }

    /// `quit`.
    #[inline]
    #[must_use]
    pub fn quit() -> Self {
        Self::new(CommandName::Quit)
    }
}

// ============================================================================
// Tests
// ============================================================================
