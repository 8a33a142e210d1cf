//! Cutroom Common Utilities
//!
//! Shared infrastructure for all Cutroom crates:
//! - Error types, result aliases, and fallback classification
//! - Injectable clocks and microsecond/frame timestamp helpers
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
