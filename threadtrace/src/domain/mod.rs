//! Domain model for threadtrace
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Checked address arithmetic
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Address, LoadBias, Pid, Tid};

pub use errors::{CacheError, TraceError};
