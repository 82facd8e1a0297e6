//! Conversion between caller register ops and executor register ops

use crate::hal::{DbgOp, DbgRegOp, DbgStatus, RegAccessClass};
use regscope_shared::types::regop::status;
use regscope_shared::utils::{hi32_lo32_to_u64, u64_hi32, u64_lo32};
use regscope_shared::{ProfilerRegOp, RegOpKind, ReservationScope};

/// Register access class for every op a session issues
pub fn access_class(scope: ReservationScope, context_bound: bool) -> RegAccessClass {
    match scope {
        ReservationScope::Device if !context_bound => RegAccessClass::Global,
        ReservationScope::Device | ReservationScope::Context => RegAccessClass::GrContext,
    }
}

fn op_to_internal(code: u8) -> DbgOp {
    match RegOpKind::from_code(code) {
        Some(RegOpKind::Read32) => DbgOp::Read32,
        Some(RegOpKind::Write32) => DbgOp::Write32,
        Some(RegOpKind::Read64) => DbgOp::Read64,
        Some(RegOpKind::Write64) => DbgOp::Write64,
        Some(RegOpKind::Read08) => DbgOp::Read08,
        Some(RegOpKind::Write08) => DbgOp::Write08,
        None => DbgOp::Invalid(code),
    }
}

fn op_to_user(op: DbgOp) -> u8 {
    match op {
        DbgOp::Read32 => RegOpKind::Read32.code(),
        DbgOp::Write32 => RegOpKind::Write32.code(),
        DbgOp::Read64 => RegOpKind::Read64.code(),
        DbgOp::Write64 => RegOpKind::Write64.code(),
        DbgOp::Read08 => RegOpKind::Read08.code(),
        DbgOp::Write08 => RegOpKind::Write08.code(),
        DbgOp::Invalid(code) => code,
    }
}

fn status_to_internal(raw: u8) -> DbgStatus {
    match raw {
        status::INVALID_OP => DbgStatus::InvalidOp,
        status::INVALID_TYPE => DbgStatus::InvalidType,
        status::INVALID_OFFSET => DbgStatus::InvalidOffset,
        status::UNSUPPORTED_OP => DbgStatus::UnsupportedOp,
        status::INVALID_MASK => DbgStatus::InvalidMask,
        _ => DbgStatus::Success,
    }
}

fn status_to_user(status: DbgStatus) -> u8 {
    match status {
        DbgStatus::Success => status::SUCCESS,
        DbgStatus::InvalidOp => status::INVALID_OP,
        DbgStatus::InvalidType => status::INVALID_TYPE,
        DbgStatus::InvalidOffset => status::INVALID_OFFSET,
        DbgStatus::UnsupportedOp => status::UNSUPPORTED_OP,
        DbgStatus::InvalidMask => status::INVALID_MASK,
    }
}

/// Convert a window of caller ops into executor ops.
///
/// `output` must be at least as long as `input`; extra entries are untouched.
pub fn to_internal(class: RegAccessClass, input: &[ProfilerRegOp], output: &mut [DbgRegOp]) {
    for (src, dst) in input.iter().zip(output.iter_mut()) {
        *dst = DbgRegOp {
            op: op_to_internal(src.op),
            class,
            status: status_to_internal(src.status),
            quad: 0,
            group_mask: 0,
            sub_group_mask: 0,
            offset: src.offset,
            value_lo: u64_lo32(src.value),
            value_hi: u64_hi32(src.value),
            and_n_mask_lo: u64_lo32(src.and_n_mask),
            and_n_mask_hi: u64_hi32(src.and_n_mask),
        };
    }
}

/// Convert executed ops back into the caller format
pub fn to_user(input: &[DbgRegOp], output: &mut [ProfilerRegOp]) {
    for (src, dst) in input.iter().zip(output.iter_mut()) {
        *dst = ProfilerRegOp {
            op: op_to_user(src.op),
            status: status_to_user(src.status),
            offset: src.offset,
            value: hi32_lo32_to_u64(src.value_hi, src.value_lo),
            and_n_mask: hi32_lo32_to_u64(src.and_n_mask_hi, src.and_n_mask_lo),
        };
    }
}
