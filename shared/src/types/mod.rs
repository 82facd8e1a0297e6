//! Type definitions shared across the control channel

pub mod regop;
pub mod session;
