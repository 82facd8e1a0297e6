//! Control-channel protocol definitions
//!
//! Request codes, argument structs and their byte encoding for the
//! profiler session control channel.

pub mod ioctl;
