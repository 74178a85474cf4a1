//! Builder pattern for flow configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use webdriver_flow::ControlFlow;
//!
//! let flow = ControlFlow::builder()
//!     .unhandled_rejection_turns(2)
//!     .poll_interval(Duration::from_millis(10))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::context;
use crate::error::{Error, Result};

use super::ControlFlow;

// ============================================================================
// Constants
// ============================================================================

/// Host turns a rejection may stay unobserved before it is reported.
pub const DEFAULT_UNHANDLED_REJECTION_TURNS: usize = 1;

/// Upper bound for [`FlowBuilder::unhandled_rejection_turns`].
pub const MAX_UNHANDLED_REJECTION_TURNS: usize = 64;

/// Upper bound for [`FlowBuilder::poll_interval`].
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// FlowConfig
// ============================================================================

/// Settings of one [`ControlFlow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Host turns a rejection may stay unobserved before it is reported.
    pub unhandled_rejection_turns: usize,
    /// Pause between two polls of a wait condition.
    ///
    /// Zero still yields one host turn.
    pub poll_interval: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            unhandled_rejection_turns: DEFAULT_UNHANDLED_REJECTION_TURNS,
            poll_interval: Duration::ZERO,
        }
    }
}

// ============================================================================
// FlowBuilder
// ============================================================================

/// Builder for configuring a [`ControlFlow`].
///
/// Use [`ControlFlow::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct FlowBuilder {
    /// Thread-wide long stack trace switch, applied on build.
    long_stack_traces: Option<bool>,
    unhandled_rejection_turns: Option<usize>,
    poll_interval: Option<Duration>,
}

impl FlowBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables long stack traces on the building thread.
    #[inline]
    #[must_use]
    pub fn long_stack_traces(mut self, enabled: bool) -> Self {
        self.long_stack_traces = Some(enabled);
        self
    }

    /// Sets how many host turns a rejection may stay unobserved.
    #[inline]
    #[must_use]
    pub fn unhandled_rejection_turns(mut self, turns: usize) -> Self {
        self.unhandled_rejection_turns = Some(turns);
        self
    }

    /// Sets the pause between wait-condition polls.
    #[inline]
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Builds the flow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a setting is out of range.
    pub fn build(self) -> Result<ControlFlow> {
        let config = FlowConfig {
            unhandled_rejection_turns: self.validate_turns()?,
            poll_interval: self.validate_poll_interval()?,
        };

        if let Some(enabled) = self.long_stack_traces {
            context::set_long_stack_traces(enabled);
        }

        Ok(ControlFlow::with_config(config))
    }

    fn validate_turns(&self) -> Result<usize> {
        let turns = self
            .unhandled_rejection_turns
            .unwrap_or(DEFAULT_UNHANDLED_REJECTION_TURNS);

        if turns > MAX_UNHANDLED_REJECTION_TURNS {
            return Err(Error::config(format!(
                "unhandled_rejection_turns must be at most {MAX_UNHANDLED_REJECTION_TURNS}, got {turns}"
            )));
        }
        Ok(turns)
    }

    fn validate_poll_interval(&self) -> Result<Duration> {
        let interval = self.poll_interval.unwrap_or(Duration::ZERO);

        if interval > MAX_POLL_INTERVAL {
            return Err(Error::config(format!(
                "poll_interval must be at most {}s, got {}ms",
                MAX_POLL_INTERVAL.as_secs(),
                interval.as_millis()
            )));
        }
        Ok(interval)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let flow = FlowBuilder::new().build().expect("defaults are valid");
        assert_eq!(flow.config(), &FlowConfig::default());
    }

    #[test]
    fn test_builder_applies_settings() {
        let flow = ControlFlow::builder()
            .unhandled_rejection_turns(3)
            .poll_interval(Duration::from_millis(25))
            .build()
            .expect("valid");

        assert_eq!(flow.config().unhandled_rejection_turns, 3);
        assert_eq!(flow.config().poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        let err = ControlFlow::builder()
            .unhandled_rejection_turns(MAX_UNHANDLED_REJECTION_TURNS + 1)
            .build()
            .expect_err("too many turns");
        assert!(matches!(err, Error::Config { .. }));

        let err = ControlFlow::builder()
            .poll_interval(Duration::from_secs(120))
            .build()
            .expect_err("interval too long");
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn test_builder_sets_long_stack_traces() {
        let _flow = ControlFlow::builder()
            .long_stack_traces(true)
            .build()
            .expect("valid");
        assert!(context::long_stack_traces());
        context::set_long_stack_traces(false);
    }
}
