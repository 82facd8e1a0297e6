//! User-facing register operation record
//!
//! This is the layout callers place in the ops buffer of an EXEC_REG_OPS
//! request. Each record is exactly [`REG_OP_RECORD_SIZE`] bytes on the wire:
//!
//! | bytes  | field        |
//! |--------|--------------|
//! | 0      | op           |
//! | 1      | status       |
//! | 2..4   | reserved     |
//! | 4..8   | offset       |
//! | 8..16  | value        |
//! | 16..24 | and_n_mask   |

use bincode::Options;
use serde::{Deserialize, Serialize};

/// Size in bytes of one encoded [`ProfilerRegOp`]
pub const REG_OP_RECORD_SIZE: usize = 24;

/// Register operation codes as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegOpKind {
    Read32,
    Write32,
    Read64,
    Write64,
    Read08,
    Write08,
}

impl RegOpKind {
    pub const fn code(&self) -> u8 {
        match self {
            Self::Read32 => 0,
            Self::Write32 => 1,
            Self::Read64 => 2,
            Self::Write64 => 3,
            Self::Read08 => 4,
            Self::Write08 => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Read32),
            1 => Some(Self::Write32),
            2 => Some(Self::Read64),
            3 => Some(Self::Write64),
            4 => Some(Self::Read08),
            5 => Some(Self::Write08),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write32 | Self::Write64 | Self::Write08)
    }
}

/// Per-operation status bits reported back to callers
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_OP: u8 = 0x01;
    pub const INVALID_TYPE: u8 = 0x02;
    pub const INVALID_OFFSET: u8 = 0x04;
    pub const UNSUPPORTED_OP: u8 = 0x08;
    pub const INVALID_MASK: u8 = 0x10;

    /// Human readable name for a status value
    pub fn name(status: u8) -> &'static str {
        match status {
            SUCCESS => "success",
            INVALID_OP => "invalid_op",
            INVALID_TYPE => "invalid_type",
            INVALID_OFFSET => "invalid_offset",
            UNSUPPORTED_OP => "unsupported_op",
            INVALID_MASK => "invalid_mask",
            _ => "unknown",
        }
    }
}

/// A read / write / read-modify-write directive against one register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilerRegOp {
    /// Operation code (see [`RegOpKind`])
    pub op: u8,

    /// Filled in after execution (see [`status`])
    #[serde(default)]
    pub status: u8,

    /// Register offset
    pub offset: u32,

    /// Value to write, or value read back
    #[serde(default)]
    pub value: u64,

    /// Bits to clear before OR-ing in `value`; all ones means plain write
    #[serde(default)]
    pub and_n_mask: u64,
}

impl ProfilerRegOp {
    pub fn read32(offset: u32) -> Self {
        Self::new(RegOpKind::Read32, offset, 0, 0)
    }

    pub fn write32(offset: u32, value: u32) -> Self {
        Self::new(RegOpKind::Write32, offset, value as u64, u32::MAX as u64)
    }

    pub fn read64(offset: u32) -> Self {
        Self::new(RegOpKind::Read64, offset, 0, 0)
    }

    pub fn write64(offset: u32, value: u64) -> Self {
        Self::new(RegOpKind::Write64, offset, value, u64::MAX)
    }

    pub fn new(kind: RegOpKind, offset: u32, value: u64, and_n_mask: u64) -> Self {
        Self {
            op: kind.code(),
            status: status::SUCCESS,
            offset,
            value,
            and_n_mask,
        }
    }

    /// Decoded operation kind, `None` for codes this build does not know
    pub fn kind(&self) -> Option<RegOpKind> {
        RegOpKind::from_code(self.op)
    }

    pub fn succeeded(&self) -> bool {
        self.status == status::SUCCESS
    }

    /// Encode into the fixed 24-byte record layout
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let raw = RawRegOp::from(*self);
        record_bincode().serialize(&raw).map_err(Into::into)
    }

    /// Decode one record; `bytes` must hold at least one full record
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() < REG_OP_RECORD_SIZE {
            anyhow::bail!(
                "register op record truncated: {} < {} bytes",
                bytes.len(),
                REG_OP_RECORD_SIZE
            );
        }
        let raw: RawRegOp = record_bincode().deserialize(&bytes[..REG_OP_RECORD_SIZE])?;
        Ok(raw.into())
    }
}

/// Fixed-size mirror of the record including the reserved padding
#[derive(Serialize, Deserialize)]
struct RawRegOp {
    op: u8,
    status: u8,
    reserved: u16,
    offset: u32,
    value: u64,
    and_n_mask: u64,
}

impl From<ProfilerRegOp> for RawRegOp {
    fn from(op: ProfilerRegOp) -> Self {
        Self {
            op: op.op,
            status: op.status,
            reserved: 0,
            offset: op.offset,
            value: op.value,
            and_n_mask: op.and_n_mask,
        }
    }
}

impl From<RawRegOp> for ProfilerRegOp {
    fn from(raw: RawRegOp) -> Self {
        Self {
            op: raw.op,
            status: raw.status,
            offset: raw.offset,
            value: raw.value,
            and_n_mask: raw.and_n_mask,
        }
    }
}

/// Little-endian fixint encoding so every record is exactly 24 bytes
fn record_bincode() -> impl bincode::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}
