//! Control-channel request codes and argument structs.
//!
//! Request codes use the familiar ioctl number layout:
//!
//! ```text
//!  31  30 29           16 15      8 7       0
//! +------+---------------+---------+---------+
//! | dir  |     size      |  magic  |   nr    |
//! +------+---------------+---------+---------+
//! ```
//!
//! Arguments are encoded with bincode using fixint, little-endian encoding so
//! every struct has a fixed size that matches the `size` field of its code.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Magic byte shared by every profiler request
pub const PROFILER_IOCTL_MAGIC: u8 = b'P';

/// Highest request number currently defined
pub const PROFILER_IOCTL_LAST: u8 = 7;

const NR_BITS: u32 = 8;
const TYPE_BITS: u32 = 8;
const SIZE_BITS: u32 = 14;

const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = NR_SHIFT + NR_BITS;
const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

/// Caller writes arguments into the channel
pub const DIR_WRITE: u8 = 0b01;
/// Channel writes arguments back to the caller
pub const DIR_READ: u8 = 0b10;

/// Decoded request code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCode {
    pub dir: u8,
    pub magic: u8,
    pub nr: u8,
    pub size: u16,
}

impl RequestCode {
    pub const fn new(dir: u8, nr: u8, size: u16) -> Self {
        Self {
            dir,
            magic: PROFILER_IOCTL_MAGIC,
            nr,
            size,
        }
    }

    pub const fn encode(&self) -> u32 {
        ((self.dir as u32) << DIR_SHIFT)
            | (((self.size as u32) & ((1 << SIZE_BITS) - 1)) << SIZE_SHIFT)
            | ((self.magic as u32) << TYPE_SHIFT)
            | ((self.nr as u32) << NR_SHIFT)
    }

    pub const fn decode(cmd: u32) -> Self {
        Self {
            dir: (cmd >> DIR_SHIFT) as u8 & 0b11,
            magic: (cmd >> TYPE_SHIFT) as u8,
            nr: (cmd >> NR_SHIFT) as u8,
            size: ((cmd >> SIZE_SHIFT) & ((1 << SIZE_BITS) - 1)) as u16,
        }
    }

    pub fn writes_args(&self) -> bool {
        self.dir & DIR_WRITE != 0
    }

    pub fn reads_args(&self) -> bool {
        self.dir & DIR_READ != 0
    }
}

/// BIND_CONTEXT argument; a negative fd selects "no context"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindContextArgs {
    pub context_fd: i32,
    pub reserved: u32,
}

impl BindContextArgs {
    pub const SIZE: u16 = 8;

    pub fn none() -> Self {
        Self {
            context_fd: -1,
            reserved: 0,
        }
    }

    pub fn fd(context_fd: i32) -> Self {
        Self {
            context_fd,
            reserved: 0,
        }
    }
}

/// Request context-switched operation for a reservation
pub const RESERVE_FLAG_CTXSW: u32 = 1 << 0;

/// RESERVE_PM_RESOURCE argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservePmResourceArgs {
    pub resource: u32,
    pub flags: u32,
    pub reserved: u64,
}

impl ReservePmResourceArgs {
    pub const SIZE: u16 = 16;

    pub fn new(resource: u32, ctxsw: bool) -> Self {
        Self {
            resource,
            flags: if ctxsw { RESERVE_FLAG_CTXSW } else { 0 },
            reserved: 0,
        }
    }

    pub fn ctxsw(&self) -> bool {
        self.flags & RESERVE_FLAG_CTXSW != 0
    }
}

/// RELEASE_PM_RESOURCE argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePmResourceArgs {
    pub resource: u32,
    pub reserved: u32,
}

impl ReleasePmResourceArgs {
    pub const SIZE: u16 = 8;

    pub fn new(resource: u32) -> Self {
        Self {
            resource,
            reserved: 0,
        }
    }
}

/// Output flag: the first window was served directly by hardware
pub const EXEC_FLAG_DIRECT_OPS: u32 = 1 << 0;
/// Output flag: every op passed (continue-on-error mode only)
pub const EXEC_FLAG_ALL_PASSED: u32 = 1 << 1;

/// EXEC_REG_OPS argument; the ops array itself travels out of band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRegOpsArgs {
    pub mode: u32,
    pub count: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl ExecRegOpsArgs {
    pub const SIZE: u16 = 16;

    pub fn new(mode: u32, count: u32) -> Self {
        Self {
            mode,
            count,
            flags: 0,
            reserved: 0,
        }
    }

    pub fn direct_ops(&self) -> bool {
        self.flags & EXEC_FLAG_DIRECT_OPS != 0
    }

    pub fn all_passed(&self) -> bool {
        self.flags & EXEC_FLAG_ALL_PASSED != 0
    }
}

pub const NR_BIND_CONTEXT: u8 = 1;
pub const NR_UNBIND_CONTEXT: u8 = 2;
pub const NR_RESERVE_PM_RESOURCE: u8 = 3;
pub const NR_RELEASE_PM_RESOURCE: u8 = 4;
pub const NR_BIND_PM_RESOURCES: u8 = 5;
pub const NR_UNBIND_PM_RESOURCES: u8 = 6;
pub const NR_EXEC_REG_OPS: u8 = 7;

pub const BIND_CONTEXT: u32 =
    RequestCode::new(DIR_WRITE, NR_BIND_CONTEXT, BindContextArgs::SIZE).encode();
pub const UNBIND_CONTEXT: u32 = RequestCode::new(0, NR_UNBIND_CONTEXT, 0).encode();
pub const RESERVE_PM_RESOURCE: u32 =
    RequestCode::new(DIR_WRITE, NR_RESERVE_PM_RESOURCE, ReservePmResourceArgs::SIZE).encode();
pub const RELEASE_PM_RESOURCE: u32 =
    RequestCode::new(DIR_WRITE, NR_RELEASE_PM_RESOURCE, ReleasePmResourceArgs::SIZE).encode();
pub const BIND_PM_RESOURCES: u32 = RequestCode::new(0, NR_BIND_PM_RESOURCES, 0).encode();
pub const UNBIND_PM_RESOURCES: u32 = RequestCode::new(0, NR_UNBIND_PM_RESOURCES, 0).encode();
pub const EXEC_REG_OPS: u32 = RequestCode::new(
    DIR_WRITE | DIR_READ,
    NR_EXEC_REG_OPS,
    ExecRegOpsArgs::SIZE,
)
.encode();

/// Short request name for logs and metrics labels
pub fn request_name(cmd: u32) -> &'static str {
    match cmd {
        BIND_CONTEXT => "bind_context",
        UNBIND_CONTEXT => "unbind_context",
        RESERVE_PM_RESOURCE => "reserve_pm_resource",
        RELEASE_PM_RESOURCE => "release_pm_resource",
        BIND_PM_RESOURCES => "bind_pm_resources",
        UNBIND_PM_RESOURCES => "unbind_pm_resources",
        EXEC_REG_OPS => "exec_reg_ops",
        _ => "unknown",
    }
}

/// Argument codec errors
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("argument buffer holds {actual} bytes, request needs {expected}")]
    Truncated { expected: usize, actual: usize },
    #[error("argument encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}

fn args_bincode() -> impl bincode::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

/// Encode arguments into their fixed-size byte form
pub fn encode_args<T: Serialize>(args: &T) -> Result<Vec<u8>, ArgsError> {
    Ok(args_bincode().serialize(args)?)
}

/// Decode arguments from the first `size` bytes of `buf`
pub fn decode_args<T: DeserializeOwned>(buf: &[u8], size: usize) -> Result<T, ArgsError> {
    if buf.len() < size {
        return Err(ArgsError::Truncated {
            expected: size,
            actual: buf.len(),
        });
    }
    Ok(args_bincode().deserialize(&buf[..size])?)
}
