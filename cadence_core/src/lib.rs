//! Core value types for the Cadence reactor runtime: superdense time,
//! component keys, and capability tokens.
#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod keys;
pub mod time;
