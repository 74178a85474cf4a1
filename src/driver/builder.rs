//! Builder pattern for driver configuration.
//!
//! Provides a fluent API for configuring and creating [`WebDriver`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use webdriver_flow::{WebDriver, WebSocketExecutor};
//!
//! let executor = WebSocketExecutor::connect("ws://127.0.0.1:4444").await?;
//! let driver = WebDriver::builder()
//!     .executor(executor)
//!     .command_timeout(Duration::from_secs(10))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::context;
use crate::error::{Error, Result};
use crate::flow::ControlFlow;
use crate::identifiers::SessionId;

use super::core::WebDriver;
use super::executor::Executor;

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound for one scheduled command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted command timeout.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

// ============================================================================
// WebDriverBuilder
// ============================================================================

/// Builder for configuring a [`WebDriver`] instance.
///
/// Use [`WebDriver::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct WebDriverBuilder {
    /// Command executor.
    executor: Option<Rc<dyn Executor>>,
    /// Flow commands are scheduled on; the current flow if unset.
    flow: Option<ControlFlow>,
    /// Already established session.
    session: Option<SessionId>,
    command_timeout: Option<Duration>,
}

impl fmt::Debug for WebDriverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverBuilder")
            .field("has_executor", &self.executor.is_some())
            .field("flow", &self.flow)
            .field("session", &self.session)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

// ============================================================================
// WebDriverBuilder Implementation
// ============================================================================

impl WebDriverBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command executor.
    #[must_use]
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Some(Rc::new(executor));
        self
    }

    /// Sets a shared command executor.
    #[inline]
    #[must_use]
    pub fn shared_executor(mut self, executor: Rc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Schedules commands on `flow` instead of the current flow.
    #[inline]
    #[must_use]
    pub fn flow(mut self, flow: ControlFlow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Attaches to an existing session.
    #[inline]
    #[must_use]
    pub fn session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the upper bound for a single command round trip.
    #[inline]
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Builds the driver with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no executor is set
    /// - [`Error::Config`] if the command timeout is zero or too large
    pub fn build(self) -> Result<WebDriver> {
        let executor = self.validate_executor()?;
        let command_timeout = self.validate_command_timeout()?;
        let flow = self.flow.unwrap_or_else(context::current_flow);

        Ok(WebDriver::new(executor, flow, self.session, command_timeout))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WebDriverBuilder {
    fn validate_executor(&self) -> Result<Rc<dyn Executor>> {
        self.executor.clone().ok_or_else(|| {
            Error::config(
                "An executor is required. Use .executor() to set it.\n\
                 Example: WebDriver::builder().executor(WebSocketExecutor::connect(url).await?)",
            )
        })
    }

    fn validate_command_timeout(&self) -> Result<Duration> {
        let timeout = self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);

        if timeout.is_zero() {
            return Err(Error::config("command_timeout must be greater than zero"));
        }
        if timeout > MAX_COMMAND_TIMEOUT {
            return Err(Error::config(format!(
                "command_timeout must be at most {}s, got {}s",
                MAX_COMMAND_TIMEOUT.as_secs(),
                timeout.as_secs()
            )));
        }
        Ok(timeout)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    use crate::protocol::Command;

    struct Null;

    #[async_trait(?Send)]
    impl Executor for Null {
        async fn execute(&self, _command: Command) -> Result<JsonValue> {
            Ok(JsonValue::Null)
        }
    }

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = WebDriverBuilder::new();
        assert!(builder.executor.is_none());
        assert!(builder.flow.is_none());
        assert!(builder.session.is_none());
    }

    #[test]
    fn test_build_fails_without_executor() {
        let err = WebDriverBuilder::new().build().expect_err("no executor");
        assert!(err.to_string().contains("executor"));
    }

    #[test]
    fn test_build_rejects_bad_timeouts() {
        let err = WebDriverBuilder::new()
            .executor(Null)
            .command_timeout(Duration::ZERO)
            .build()
            .expect_err("zero");
        assert!(matches!(err, Error::Config { .. }));

        let err = WebDriverBuilder::new()
            .executor(Null)
            .command_timeout(MAX_COMMAND_TIMEOUT + Duration::from_secs(1))
            .build()
            .expect_err("too large");
        assert!(err.to_string().contains("command_timeout"));
    }

    #[test]
    fn test_build_applies_settings() {
        let flow = ControlFlow::new();
        let driver = WebDriverBuilder::new()
            .executor(Null)
            .flow(flow.clone())
            .session(SessionId::new("abc"))
            .command_timeout(Duration::from_secs(5))
            .build()
            .expect("valid");

        assert!(driver.flow().ptr_eq(&flow));
        assert_eq!(driver.session(), Some(SessionId::new("abc")));
        assert_eq!(driver.command_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_build_defaults_to_current_flow() {
        let flow = ControlFlow::new();
        let driver = context::with_flow(&flow, || {
            WebDriverBuilder::new().executor(Null).build().expect("valid")
        });
        assert!(driver.flow().ptr_eq(&flow));
        assert_eq!(driver.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }
}
