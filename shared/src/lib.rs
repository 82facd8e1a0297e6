//! Shared types and utilities for Regscope
//!
//! This crate contains the register-operation record, session enums and
//! control-channel definitions used by both the caller side and the
//! profiler engine.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{regop::*, session::*};
