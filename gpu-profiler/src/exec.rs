//! Windowed EXEC_REG_OPS pipeline
//!
//! Each window is copied in from the caller, converted, executed, converted
//! back and copied out before the next one starts. Under all-or-none a hard
//! failure stops the loop but windows already written back are not rolled
//! back: atomicity only holds within one window.

use crate::convert;
use crate::error::{ProfilerError, Result};
use crate::hal::{PowerRef, RegOpFlags};
use crate::metrics;
use crate::session::{Backend, ProfilerSession};
use crate::staging::{windows, UserOpsBuffer};
use regscope_shared::ExecMode;
use serde::Serialize;
use tracing::{debug, error};

/// Aggregate outcome of a successful EXEC_REG_OPS call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecReport {
    /// First window was served directly by hardware
    pub direct_ops: bool,
    /// Every op passed; only ever set in continue-on-error mode
    pub all_passed: bool,
    /// Windows processed
    pub windows: usize,
    /// Ops processed
    pub ops: usize,
}

pub(crate) fn exec_reg_ops(
    session: &mut ProfilerSession,
    backend: &Backend,
    ops: &mut dyn UserOpsBuffer,
    count: u32,
    mode: ExecMode,
) -> Result<ExecReport> {
    let handle = session.handle();
    debug!(
        "REG_OPS for session {}: count={} mode={:?}",
        handle, count, mode
    );

    if count == 0 {
        return Err(ProfilerError::invalid_argument("register op count must be non-zero"));
    }
    if count > backend.config.max_reg_ops {
        return Err(ProfilerError::invalid_argument(format!(
            "regops limit exceeded: {} > {}",
            count, backend.config.max_reg_ops
        )));
    }
    if !session.pm_bound() {
        return Err(ProfilerError::invalid_state(
            "PM resources are not bound to profiler",
        ));
    }
    session.check_context_still_valid(backend)?;

    let _power = PowerRef::acquire(backend.power.as_ref())?;
    let timer = metrics::EXEC_DURATION.start_timer();

    let result = run_windows(session, backend, ops, count as usize, mode);
    timer.observe_duration();

    match &result {
        Ok(report) => debug!(
            "REG_OPS for session {} complete: windows={} direct={} all_passed={}",
            handle, report.windows, report.direct_ops, report.all_passed
        ),
        Err(e) => debug!("REG_OPS for session {} aborted: {}", handle, e),
    }
    result
}

fn run_windows(
    session: &mut ProfilerSession,
    backend: &Backend,
    ops: &mut dyn UserOpsBuffer,
    count: usize,
    mode: ExecMode,
) -> Result<ExecReport> {
    let class = convert::access_class(session.scope(), session.context().is_some());
    let context = session.context();
    let staging = session.staging_mut();

    let mut report = ExecReport::default();
    let mut all_passed = true;

    for window in windows(count, staging.capacity()) {
        debug!("regops window: start_op={} ops={}", window.start, window.len);
        let user = &mut staging.user[..window.len];
        let internal = &mut staging.internal[..window.len];

        ops.copy_in(window.start, user)?;
        convert::to_internal(class, user, internal);

        let mut flags = RegOpFlags::new(mode);
        backend
            .executor
            .exec_regops(context, internal, &mut flags)
            .map_err(|e| {
                error!("regop execution failed at op {}: {}", window.start, e);
                ProfilerError::HardwareExecution {
                    window_start: window.start,
                    reason: e.to_string(),
                }
            })?;

        if window.start == 0 {
            report.direct_ops = flags.direct_ops;
        }
        if mode == ExecMode::ContinueOnError && !flags.all_passed {
            all_passed = false;
        }

        convert::to_user(internal, user);
        let failed = user.iter().filter(|op| !op.succeeded()).count();
        metrics::REG_OPS_EXECUTED.inc_by(window.len as f64);
        metrics::REG_OPS_FAILED.inc_by(failed as f64);
        metrics::EXEC_WINDOWS.inc();

        ops.copy_out(window.start, user)?;

        report.windows += 1;
        report.ops = window.end();
    }

    report.all_passed = mode == ExecMode::ContinueOnError && all_passed;
    Ok(report)
}
