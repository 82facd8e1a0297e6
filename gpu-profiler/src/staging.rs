//! Staging buffers and the caller-side ops buffer
//!
//! Batches larger than the staging capacity are processed as a sequence of
//! [`Window`]s produced by [`windows`].

use crate::error::{ProfilerError, Result};
use crate::hal::DbgRegOp;
use regscope_shared::{ProfilerRegOp, REG_OP_RECORD_SIZE};

/// Per-session fixed-size staging memory
#[derive(Debug, Default)]
pub struct StagingArea {
    /// Ops copied in from the caller, in caller format
    pub user: Vec<ProfilerRegOp>,
    /// Same ops in executor format
    pub internal: Vec<DbgRegOp>,
}

impl StagingArea {
    /// Allocate both windows; fails without side effects on allocation failure
    pub fn allocate(capacity: usize) -> Result<Self> {
        let mut user = Vec::new();
        user.try_reserve_exact(capacity)
            .map_err(|_| ProfilerError::NoMemory("register op copy window"))?;
        user.resize(capacity, ProfilerRegOp::default());

        let mut internal = Vec::new();
        internal
            .try_reserve_exact(capacity)
            .map_err(|_| ProfilerError::NoMemory("register op staging window"))?;
        internal.resize(capacity, DbgRegOp::default());

        Ok(Self { user, internal })
    }

    pub fn capacity(&self) -> usize {
        self.user.len()
    }
}

/// A slice `[start, start + len)` of the logical op array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub len: usize,
}

impl Window {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Lazy sequence of windows covering `total` ops
#[derive(Debug, Clone)]
pub struct Windows {
    total: usize,
    capacity: usize,
    next: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next >= self.total || self.capacity == 0 {
            return None;
        }
        let len = (self.total - self.next).min(self.capacity);
        let window = Window {
            start: self.next,
            len,
        };
        self.next += len;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.capacity == 0 {
            0
        } else {
            (self.total.saturating_sub(self.next)).div_ceil(self.capacity)
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows {}

pub fn windows(total: usize, capacity: usize) -> Windows {
    Windows {
        total,
        capacity,
        next: 0,
    }
}

/// Caller-owned ops memory on the far side of the session boundary.
///
/// Both directions may fault; a fault aborts the batch.
pub trait UserOpsBuffer {
    /// Copy `dst.len()` ops starting at op index `start` into `dst`
    fn copy_in(&self, start: usize, dst: &mut [ProfilerRegOp]) -> Result<()>;

    /// Copy `src` back to op index `start`
    fn copy_out(&mut self, start: usize, src: &[ProfilerRegOp]) -> Result<()>;
}

fn out_of_range(start: usize, len: usize, available: usize) -> ProfilerError {
    ProfilerError::TransferFault {
        op_index: start,
        reason: format!(
            "ops [{}, {}) outside caller buffer of {} ops",
            start,
            start + len,
            available
        ),
    }
}

impl UserOpsBuffer for [ProfilerRegOp] {
    fn copy_in(&self, start: usize, dst: &mut [ProfilerRegOp]) -> Result<()> {
        let src = self
            .get(start..start + dst.len())
            .ok_or_else(|| out_of_range(start, dst.len(), self.len()))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn copy_out(&mut self, start: usize, src: &[ProfilerRegOp]) -> Result<()> {
        let available = self.len();
        let dst = self
            .get_mut(start..start + src.len())
            .ok_or_else(|| out_of_range(start, src.len(), available))?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl UserOpsBuffer for Vec<ProfilerRegOp> {
    fn copy_in(&self, start: usize, dst: &mut [ProfilerRegOp]) -> Result<()> {
        self.as_slice().copy_in(start, dst)
    }

    fn copy_out(&mut self, start: usize, src: &[ProfilerRegOp]) -> Result<()> {
        self.as_mut_slice().copy_out(start, src)
    }
}

/// Ops buffer holding raw 24-byte records, as a caller process would
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegOpBytes {
    bytes: Vec<u8>,
}

impl RegOpBytes {
    pub fn encode(ops: &[ProfilerRegOp]) -> anyhow::Result<Self> {
        let mut bytes = Vec::with_capacity(ops.len() * REG_OP_RECORD_SIZE);
        for op in ops {
            bytes.extend_from_slice(&op.to_bytes()?);
        }
        Ok(Self { bytes })
    }

    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn decode(&self) -> anyhow::Result<Vec<ProfilerRegOp>> {
        self.bytes
            .chunks_exact(REG_OP_RECORD_SIZE)
            .map(ProfilerRegOp::from_bytes)
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn record_range(&self, start: usize, len: usize) -> Result<std::ops::Range<usize>> {
        let begin = start * REG_OP_RECORD_SIZE;
        let end = (start + len) * REG_OP_RECORD_SIZE;
        if end > self.bytes.len() {
            return Err(out_of_range(
                start,
                len,
                self.bytes.len() / REG_OP_RECORD_SIZE,
            ));
        }
        Ok(begin..end)
    }
}

impl UserOpsBuffer for RegOpBytes {
    fn copy_in(&self, start: usize, dst: &mut [ProfilerRegOp]) -> Result<()> {
        let range = self.record_range(start, dst.len())?;
        for (i, (chunk, op)) in self.bytes[range]
            .chunks_exact(REG_OP_RECORD_SIZE)
            .zip(dst.iter_mut())
            .enumerate()
        {
            *op = ProfilerRegOp::from_bytes(chunk).map_err(|e| ProfilerError::TransferFault {
                op_index: start + i,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn copy_out(&mut self, start: usize, src: &[ProfilerRegOp]) -> Result<()> {
        let range = self.record_range(start, src.len())?;
        let mut encoded = Vec::with_capacity(range.len());
        for (i, op) in src.iter().enumerate() {
            let record = op.to_bytes().map_err(|e| ProfilerError::TransferFault {
                op_index: start + i,
                reason: e.to_string(),
            })?;
            encoded.extend_from_slice(&record);
        }
        self.bytes[range].copy_from_slice(&encoded);
        Ok(())
    }
}
