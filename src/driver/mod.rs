//! WebDriver client module.
//!
//! Commands become flow tasks; results come back as promises.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WebDriver`] | Schedules commands on a flow |
//! | [`WebDriverBuilder`] | Fluent configuration builder |
//! | [`Executor`] | Command transport interface |
//!
//! # Example
//!
//! ```ignore
//! use webdriver_flow::{WebDriver, WebSocketExecutor};
//!
//! let executor = WebSocketExecutor::connect("ws://127.0.0.1:4444").await?;
//! let driver = WebDriver::builder().executor(executor).build()?;
//!
//! driver.get("https://example.com");
//! let title = driver.get_title().await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for driver configuration.
pub mod builder;

/// Core driver implementation.
pub mod core;

/// Command executor interface.
pub mod executor;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WebDriverBuilder;
pub use core::WebDriver;
pub use executor::{Executor, execute_callback};
