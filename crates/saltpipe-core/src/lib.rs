//! Core relay engine shared across saltpipe crates.
//!
//! This crate provides:
//! - The poll-driven bidirectional copy loop that moves bytes between the
//!   two legs of a session
//! - Default tuning constants used by the config and CLI layers

pub mod defaults;
pub mod io;

// Re-export commonly used items at crate root
pub use defaults::*;
