#![doc = include_str!("../README.md")]
#![deny(clippy::all)]

// Re-exports
pub use cadence_core as core;
pub use cadence_runtime as runtime;
