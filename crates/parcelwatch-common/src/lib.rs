//! Parcelwatch Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the Parcelwatch workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all Parcelwatch
//! workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing configuration (console/file, text/JSON)
//!
//! # Example
//!
//! ```no_run
//! use parcelwatch_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CoreError, Result};
