//! Taskboard Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Taskboard workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`TaskboardError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], including
//!   the dedicated audit/performance log stream
//!
//! # Example
//!
//! ```no_run
//! use taskboard_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> taskboard_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TaskboardError};
