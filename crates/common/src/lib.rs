//! Overlaycut Common Utilities
//!
//! Shared infrastructure for all Overlaycut crates:
//! - Error taxonomy and result aliases
//! - Frame clocks for paced and free-running render loops
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
