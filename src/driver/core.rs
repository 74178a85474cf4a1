//! WebDriver facade.
//!
//! Every call schedules one flow task and returns its [`Promise`]. Calls
//! made back to back therefore reach the remote end in call order, and a
//! command issued from a callback runs before later top-level commands.
//!
//! # Example
//!
//! ```ignore
//! use webdriver_flow::{WebDriver, WebSocketExecutor, host};
//!
//! host::block_on(async {
//!     let executor = WebSocketExecutor::connect("ws://127.0.0.1:4444").await?;
//!     let driver = WebDriver::builder().executor(executor).build()?;
//!
//!     driver.get("https://example.com");
//!     let title = driver.get_title().await?;
//!     driver.quit();
//!     Ok::<_, webdriver_flow::Error>(())
//! })??;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::flow::ControlFlow;
use crate::identifiers::SessionId;
use crate::promise::Promise;
use crate::protocol::Command;
use crate::value::Value;

use super::builder::WebDriverBuilder;
use super::executor::Executor;

// ============================================================================
// Types
// ============================================================================

struct DriverInner {
    executor: Rc<dyn Executor>,
    flow: ControlFlow,
    session: RefCell<Option<SessionId>>,
    command_timeout: Duration,
}

// ============================================================================
// WebDriver
// ============================================================================

/// Schedules WebDriver commands on a [`ControlFlow`].
///
/// Cloning yields another handle to the same driver.
#[derive(Clone)]
pub struct WebDriver {
    inner: Rc<DriverInner>,
}

impl fmt::Debug for WebDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriver")
            .field("flow", &self.inner.flow.id())
            .field("session", &self.inner.session.borrow())
            .field("command_timeout", &self.inner.command_timeout)
            .finish_non_exhaustive()
    }
}

impl WebDriver {
    /// Creates a configuration builder for the driver.
    #[inline]
    #[must_use]
    pub fn builder() -> WebDriverBuilder {
        WebDriverBuilder::new()
    }

    pub(crate) fn new(
        executor: Rc<dyn Executor>,
        flow: ControlFlow,
        session: Option<SessionId>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            inner: Rc::new(DriverInner {
                executor,
                flow,
                session: RefCell::new(session),
                command_timeout,
            }),
        }
    }

    /// Returns the flow commands are scheduled on.
    #[inline]
    #[must_use]
    pub fn flow(&self) -> &ControlFlow {
        &self.inner.flow
    }

    /// Returns the current session, if one was started.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.inner.session.borrow().clone()
    }

    /// Returns the per-command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.inner.command_timeout
    }
}

// ============================================================================
// WebDriver - Scheduling
// ============================================================================

impl WebDriver {
    /// Schedules `command` as a flow task.
    ///
    /// The session ID is attached when the task runs, so a session started
    /// by an earlier task is picked up. The task fails with
    /// [`Error::Command`] if the executor does not answer within the
    /// command timeout.
    pub fn schedule(&self, command: Command, description: impl Into<String>) -> Promise {
        let driver = self.clone();
        self.inner
            .flow
            .execute_async(description, move || async move {
                let result = driver.send(command).await?;
                Ok(Value::from(result))
            })
    }

    async fn send(&self, command: Command) -> Result<JsonValue> {
        let command = match self.session() {
            Some(session) => command.with_session(&session),
            None => command,
        };
        let name = command.name;
        let limit = self.inner.command_timeout;

        debug!(command = %name, "Executing command");
        match tokio::time::timeout(limit, self.inner.executor.execute(command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::command(
                name.as_str(),
                format!("no response after {}ms", limit.as_millis()),
            )),
        }
    }
}

// ============================================================================
// WebDriver - Commands
// ============================================================================

impl WebDriver {
    /// Starts a session with `capabilities` and remembers its ID.
    pub fn start_session(&self, capabilities: JsonValue) -> Promise {
        let driver = self.clone();
        self.schedule(Command::new_session(capabilities), "WebDriver.createSession()")
            .then(move |value| {
                let id = value
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .or_else(|| value.as_str())
                    .ok_or_else(|| Error::protocol("newSession response lacks a session id"))?
                    .to_string();

                info!(session = %id, "Session started");
                *driver.inner.session.borrow_mut() = Some(SessionId::new(id));
                Ok(value)
            })
    }

    /// Navigates to `url`.
    pub fn get(&self, url: impl Into<String>) -> Promise {
        let url = url.into();
        let description = format!("WebDriver.get({url})");
        self.schedule(Command::get(url), description)
    }

    /// Reads the document title.
    pub fn get_title(&self) -> Promise {
        self.schedule(Command::get_title(), "WebDriver.getTitle()")
    }

    /// Reads the current URL.
    pub fn get_current_url(&self) -> Promise {
        self.schedule(Command::get_current_url(), "WebDriver.getCurrentUrl()")
    }

    /// Runs `script` in the page with positional `args`.
    pub fn execute_script(&self, script: impl Into<String>, args: Vec<JsonValue>) -> Promise {
        self.schedule(
            Command::execute_script(script, args),
            "WebDriver.executeScript()",
        )
    }

    /// Pauses the flow.
    pub fn sleep(&self, duration: Duration) -> Promise {
        let description = format!("WebDriver.sleep({})", duration.as_millis());
        self.inner.flow.timeout(duration, Some(&description))
    }

    /// Polls `condition` on the driver's flow; see [`ControlFlow::wait`].
    pub fn wait<F, R>(&self, condition: F, timeout: Option<Duration>, message: Option<&str>) -> Promise
    where
        F: FnMut() -> Result<R> + 'static,
        R: Into<Value>,
    {
        self.inner.flow.wait(condition, timeout, message)
    }

    /// Ends the session.
    ///
    /// The session ID is forgotten whether or not the remote end accepted
    /// the command.
    pub fn quit(&self) -> Promise {
        let driver = self.clone();
        self.schedule(Command::quit(), "WebDriver.quit()")
            .then_finally(move || {
                if let Some(session) = driver.inner.session.borrow_mut().take() {
                    info!(%session, "Session ended");
                }
                Ok(())
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
