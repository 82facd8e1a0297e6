//! Simulated chip backend
//!
//! Keeps a device-global register file plus one shadow register file per
//! context, and only lets ops through to offsets inside the register window
//! of a PM resource that is currently bound by some session.

use super::{
    Capabilities, DbgOp, DbgRegOp, DbgStatus, ExecError, RegAccessClass, RegOpFlags,
    RegisterOperationExecutor,
};
use crate::error::{ProfilerError, Result};
use crate::reservation::{
    PmReservationTable, ReleaseOutcome, ReservationMode, ReserveOutcome,
};
use regscope_shared::utils::{hi32_lo32_to_u64, u64_hi32, u64_lo32};
use regscope_shared::{ContextId, ExecMode, PmResourceType, SessionHandle};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Register window backing each PM resource type
pub fn resource_window(resource: PmResourceType) -> Range<u32> {
    match resource {
        PmResourceType::HwpmLegacy => 0x0024_0000..0x0024_4000,
        PmResourceType::Smpc => 0x0041_9000..0x0041_a000,
    }
}

#[derive(Debug, Default)]
struct SimState {
    global: HashMap<u32, u64>,
    shadow: HashMap<(ContextId, u32), u64>,
    bound: HashMap<PmResourceType, HashSet<SessionHandle>>,
    faults: HashSet<u32>,
}

impl SimState {
    fn window_bound(&self, offset: u32, width: u32) -> bool {
        let Some(end) = offset.checked_add(width) else {
            return false;
        };
        self.bound.iter().any(|(resource, sessions)| {
            let window = resource_window(*resource);
            !sessions.is_empty() && offset >= window.start && end <= window.end
        })
    }
}

/// In-memory executor used by tests and the CLI
#[derive(Debug)]
pub struct SimulatedGpu {
    caps: Capabilities,
    reservations: PmReservationTable,
    state: Mutex<SimState>,
    exec_calls: AtomicU64,
}

impl SimulatedGpu {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            reservations: PmReservationTable::new(),
            state: Mutex::new(SimState::default()),
            exec_calls: AtomicU64::new(0),
        }
    }

    pub fn reservations(&self) -> &PmReservationTable {
        &self.reservations
    }

    /// Number of `exec_regops` calls served so far
    pub fn exec_calls(&self) -> u64 {
        self.exec_calls.load(Ordering::Relaxed)
    }

    /// Read a global register without going through a session
    pub fn peek(&self, offset: u32) -> u64 {
        self.lock().global.get(&offset).copied().unwrap_or(0)
    }

    /// Read a context shadow register
    pub fn peek_context(&self, ctx: ContextId, offset: u32) -> u64 {
        self.lock().shadow.get(&(ctx, offset)).copied().unwrap_or(0)
    }

    /// Seed a global register
    pub fn poke(&self, offset: u32, value: u64) {
        self.lock().global.insert(offset, value);
    }

    /// Make any access to `offset` fail as a hardware fault
    pub fn inject_fault(&self, offset: u32) {
        self.lock().faults.insert(offset);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn bound_sessions(&self, resource: PmResourceType) -> usize {
        self.lock().bound.get(&resource).map_or(0, HashSet::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(state: &SimState, context: Option<ContextId>, op: &DbgRegOp) -> DbgStatus {
        let Some(width) = op.op.width() else {
            return DbgStatus::InvalidOp;
        };
        if width == 1 {
            return DbgStatus::UnsupportedOp;
        }
        if op.class == RegAccessClass::GrContext && context.is_none() {
            return DbgStatus::InvalidType;
        }
        if op.offset % width != 0 || !state.window_bound(op.offset, width) {
            return DbgStatus::InvalidOffset;
        }
        DbgStatus::Success
    }
}

/// Apply one validated op against a register file
fn apply(regs: &mut HashMap<u32, u64>, op: &mut DbgRegOp) {
    let old = regs.get(&op.offset).copied().unwrap_or(0);
    match op.op {
        DbgOp::Read32 => {
            op.value_lo = u64_lo32(old);
            op.value_hi = 0;
        }
        DbgOp::Read64 => {
            op.value_lo = u64_lo32(old);
            op.value_hi = u64_hi32(old);
        }
        DbgOp::Write32 => {
            let lo = if op.and_n_mask_lo == u32::MAX {
                op.value_lo
            } else {
                (u64_lo32(old) & !op.and_n_mask_lo) | op.value_lo
            };
            regs.insert(op.offset, hi32_lo32_to_u64(u64_hi32(old), lo));
        }
        DbgOp::Write64 => {
            let value = hi32_lo32_to_u64(op.value_hi, op.value_lo);
            let mask = hi32_lo32_to_u64(op.and_n_mask_hi, op.and_n_mask_lo);
            let new = if mask == u64::MAX {
                value
            } else {
                (old & !mask) | value
            };
            regs.insert(op.offset, new);
        }
        DbgOp::Read08 | DbgOp::Write08 | DbgOp::Invalid(_) => {}
    }
}

impl RegisterOperationExecutor for SimulatedGpu {
    fn name(&self) -> &str {
        "simulated"
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn reserve_pm_resource(
        &self,
        session: SessionHandle,
        resource: PmResourceType,
        mode: ReservationMode,
    ) -> Result<ReserveOutcome> {
        self.reservations
            .try_reserve(resource, session, mode)
            .map_err(|conflict| {
                warn!("reservation denied: {}", conflict);
                ProfilerError::from(conflict)
            })
    }

    fn release_pm_resource(
        &self,
        session: SessionHandle,
        resource: PmResourceType,
    ) -> Result<ReleaseOutcome> {
        Ok(self.reservations.release(resource, session))
    }

    fn release_all_pm_resources(&self, session: SessionHandle) -> Result<Vec<PmResourceType>> {
        Ok(self.reservations.release_all(session))
    }

    fn bind_pm_resources(
        &self,
        session: SessionHandle,
        context: Option<ContextId>,
        resources: &[PmResourceType],
    ) -> Result<()> {
        if let Some(missing) = resources
            .iter()
            .find(|r| !self.reservations.holds(**r, session))
        {
            return Err(ProfilerError::invalid_state(format!(
                "{} is not reserved by session {}",
                missing, session
            )));
        }
        let mut state = self.lock();
        for resource in resources {
            state.bound.entry(*resource).or_default().insert(session);
        }
        debug!(
            "session {} bound {:?} (context {:?})",
            session, resources, context
        );
        Ok(())
    }

    fn unbind_pm_resources(
        &self,
        session: SessionHandle,
        resources: &[PmResourceType],
    ) -> Result<()> {
        let mut state = self.lock();
        for resource in resources {
            if let Some(sessions) = state.bound.get_mut(resource) {
                sessions.remove(&session);
            }
        }
        Ok(())
    }

    fn exec_regops(
        &self,
        context: Option<ContextId>,
        ops: &mut [DbgRegOp],
        flags: &mut RegOpFlags,
    ) -> std::result::Result<(), ExecError> {
        self.exec_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();

        let mut invalid = 0;
        for op in ops.iter_mut() {
            op.status = Self::validate(&state, context, op);
            if op.status != DbgStatus::Success {
                invalid += 1;
            }
        }

        flags.direct_ops =
            !ops.is_empty() && ops.iter().all(|op| op.class == RegAccessClass::Global);

        if flags.mode == ExecMode::AllOrNone && invalid > 0 {
            flags.all_passed = false;
            return Err(ExecError::Rejected(invalid));
        }

        // Work on copies so an all-or-none window that faults leaves no trace
        let mut global = state.global.clone();
        let mut shadow: HashMap<u32, u64> = match context {
            Some(ctx) => state
                .shadow
                .iter()
                .filter(|((c, _), _)| *c == ctx)
                .map(|((_, offset), value)| (*offset, *value))
                .collect(),
            None => HashMap::new(),
        };

        let mut failed = invalid;
        for op in ops.iter_mut() {
            if op.status != DbgStatus::Success {
                continue;
            }
            if state.faults.contains(&op.offset) {
                if flags.mode == ExecMode::AllOrNone {
                    return Err(ExecError::Fault(op.offset));
                }
                op.status = DbgStatus::InvalidOffset;
                failed += 1;
                continue;
            }
            match op.class {
                RegAccessClass::Global => apply(&mut global, op),
                RegAccessClass::GrContext => apply(&mut shadow, op),
            }
        }

        state.global = global;
        if let Some(ctx) = context {
            for (offset, value) in shadow {
                state.shadow.insert((ctx, offset), value);
            }
        }
        flags.all_passed = failed == 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SessionHandle = SessionHandle(1);

    fn bound_gpu(resource: PmResourceType) -> SimulatedGpu {
        let gpu = SimulatedGpu::new(Capabilities::default());
        gpu.reserve_pm_resource(S, resource, ReservationMode::Global)
            .unwrap();
        gpu.bind_pm_resources(S, None, &[resource]).unwrap();
        gpu
    }

    fn op(op: DbgOp, offset: u32, value: u64, mask: u64) -> DbgRegOp {
        DbgRegOp {
            op,
            offset,
            value_lo: u64_lo32(value),
            value_hi: u64_hi32(value),
            and_n_mask_lo: u64_lo32(mask),
            and_n_mask_hi: u64_hi32(mask),
            ..DbgRegOp::default()
        }
    }

    #[test]
    fn test_write_then_read() {
        let gpu = bound_gpu(PmResourceType::Smpc);
        let mut ops = [
            op(DbgOp::Write32, 0x0041_9000, 0xabcd, u32::MAX as u64),
            op(DbgOp::Read32, 0x0041_9000, 0, 0),
        ];
        let mut flags = RegOpFlags::new(ExecMode::AllOrNone);

        gpu.exec_regops(None, &mut ops, &mut flags).unwrap();

        assert_eq!(ops[1].value_lo, 0xabcd);
        assert!(flags.direct_ops);
        assert!(flags.all_passed);
        assert_eq!(gpu.peek(0x0041_9000), 0xabcd);
    }

    #[test]
    fn test_read_modify_write() {
        let gpu = bound_gpu(PmResourceType::HwpmLegacy);
        gpu.poke(0x0024_0010, 0xff00_ff00);
        let mut ops = [op(DbgOp::Write32, 0x0024_0010, 0x0000_0011, 0x0000_00ff)];
        let mut flags = RegOpFlags::new(ExecMode::AllOrNone);

        gpu.exec_regops(None, &mut ops, &mut flags).unwrap();

        assert_eq!(gpu.peek(0x0024_0010), 0xff00_ff11);
    }

    #[test]
    fn test_unbound_window_rejected() {
        let gpu = bound_gpu(PmResourceType::HwpmLegacy);
        let mut ops = [op(DbgOp::Read32, 0x0041_9000, 0, 0)];
        let mut flags = RegOpFlags::new(ExecMode::AllOrNone);

        assert_eq!(
            gpu.exec_regops(None, &mut ops, &mut flags),
            Err(ExecError::Rejected(1))
        );
        assert_eq!(ops[0].status, DbgStatus::InvalidOffset);
    }

    #[test]
    fn test_continue_on_error_applies_valid_ops() {
        let gpu = bound_gpu(PmResourceType::Smpc);
        let mut ops = [
            op(DbgOp::Write32, 0x0041_9004, 5, u32::MAX as u64),
            op(DbgOp::Write08, 0x0041_9008, 1, 0xff),
            op(DbgOp::Write32, 0x0041_9002, 1, u32::MAX as u64),
            op(DbgOp::Invalid(9), 0x0041_9004, 0, 0),
        ];
        let mut flags = RegOpFlags::new(ExecMode::ContinueOnError);

        gpu.exec_regops(None, &mut ops, &mut flags).unwrap();

        assert_eq!(ops[0].status, DbgStatus::Success);
        assert_eq!(ops[1].status, DbgStatus::UnsupportedOp);
        assert_eq!(ops[2].status, DbgStatus::InvalidOffset);
        assert_eq!(ops[3].status, DbgStatus::InvalidOp);
        assert!(!flags.all_passed);
        assert_eq!(gpu.peek(0x0041_9004), 5);
    }

    #[test]
    fn test_all_or_none_fault_leaves_no_effect() {
        let gpu = bound_gpu(PmResourceType::Smpc);
        gpu.inject_fault(0x0041_9010);
        let mut ops = [
            op(DbgOp::Write32, 0x0041_9000, 1, u32::MAX as u64),
            op(DbgOp::Write32, 0x0041_9010, 2, u32::MAX as u64),
        ];
        let mut flags = RegOpFlags::new(ExecMode::AllOrNone);

        assert_eq!(
            gpu.exec_regops(None, &mut ops, &mut flags),
            Err(ExecError::Fault(0x0041_9010))
        );
        assert_eq!(gpu.peek(0x0041_9000), 0);
    }

    #[test]
    fn test_context_ops_hit_shadow_state() {
        let gpu = bound_gpu(PmResourceType::Smpc);
        let ctx = ContextId(9);
        let mut ops = [DbgRegOp {
            class: RegAccessClass::GrContext,
            ..op(DbgOp::Write64, 0x0041_9008, 0x1_0000_0002, u64::MAX)
        }];
        let mut flags = RegOpFlags::new(ExecMode::AllOrNone);

        gpu.exec_regops(Some(ctx), &mut ops, &mut flags).unwrap();

        assert!(!flags.direct_ops);
        assert_eq!(gpu.peek_context(ctx, 0x0041_9008), 0x1_0000_0002);
        assert_eq!(gpu.peek(0x0041_9008), 0);

        let mut no_ctx = ops;
        assert_eq!(
            gpu.exec_regops(None, &mut no_ctx, &mut flags),
            Err(ExecError::Rejected(1))
        );
        assert_eq!(no_ctx[0].status, DbgStatus::InvalidType);
    }

    #[test]
    fn test_release_all_frees_every_resource() {
        let gpu = bound_gpu(PmResourceType::Smpc);
        gpu.reserve_pm_resource(S, PmResourceType::HwpmLegacy, ReservationMode::Global)
            .unwrap();
        gpu.unbind_pm_resources(S, &[PmResourceType::Smpc]).unwrap();

        assert_eq!(
            gpu.release_all_pm_resources(S).unwrap(),
            vec![PmResourceType::HwpmLegacy, PmResourceType::Smpc]
        );
        assert!(gpu.release_all_pm_resources(S).unwrap().is_empty());
        assert!(gpu.reservations().holders(PmResourceType::Smpc).is_empty());
    }

    #[test]
    fn test_bind_requires_reservation() {
        let gpu = SimulatedGpu::new(Capabilities::default());
        let err = gpu
            .bind_pm_resources(S, None, &[PmResourceType::Smpc])
            .unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidState(_)));
        assert_eq!(gpu.bound_sessions(PmResourceType::Smpc), 0);
    }
}
