mod common;

use anyhow::Result;
use common::{base_config, rig, rig_with, Rig, HWPM_BASE};
use regscope_profiler::{Capabilities, ProfilerError, RegOpBytes};
use regscope_shared::types::regop::status;
use regscope_shared::{
    ExecMode, PmResourceType, ProfilerRegOp, RegOpKind, ReservationScope, SessionHandle,
};

/// Device session with HWPM reserved and bound, no context
fn ready_device_session(rig: &Rig) -> Result<SessionHandle> {
    let handle = rig.mgr.open(ReservationScope::Device)?;
    rig.mgr.bind_context(handle, None)?;
    rig.mgr
        .reserve_pm_resource(handle, PmResourceType::HwpmLegacy, false)?;
    rig.mgr.bind_pm_resources(handle)?;
    Ok(handle)
}

fn reg(i: usize) -> u32 {
    HWPM_BASE + 4 * i as u32
}

#[test]
fn test_windowing_is_transparent() -> Result<()> {
    let small = rig_with(Capabilities::default(), base_config().with_window_capacity(3));
    let large = rig();

    for rig in [&small, &large] {
        let handle = ready_device_session(rig)?;
        let mut writes: Vec<ProfilerRegOp> =
            (0..8).map(|i| ProfilerRegOp::write32(reg(i), 100 + i as u32)).collect();
        rig.mgr.exec_reg_ops(handle, &mut writes, 8, ExecMode::AllOrNone)?;

        let mut reads: Vec<ProfilerRegOp> = (0..8).map(|i| ProfilerRegOp::read32(reg(i))).collect();
        let report = rig.mgr.exec_reg_ops(handle, &mut reads, 8, ExecMode::AllOrNone)?;

        assert_eq!(report.ops, 8);
        for (i, op) in reads.iter().enumerate() {
            assert!(op.succeeded());
            assert_eq!(op.value, 100 + i as u64);
        }
    }

    // 8 ops in windows of 3 is 3 executor calls per batch
    assert_eq!(small.gpu.exec_calls(), 6);
    assert_eq!(large.gpu.exec_calls(), 2);
    Ok(())
}

#[test]
fn test_all_or_none_failure_in_first_window() -> Result<()> {
    let rig = rig_with(Capabilities::default(), base_config().with_window_capacity(2));
    let handle = ready_device_session(&rig)?;

    let mut ops = vec![
        ProfilerRegOp::write32(reg(0), 1),
        ProfilerRegOp::write32(0x10, 2),
        ProfilerRegOp::write32(reg(2), 3),
        ProfilerRegOp::write32(reg(3), 4),
    ];
    let before = ops.clone();

    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 4, ExecMode::AllOrNone)
        .unwrap_err();

    assert!(matches!(
        err,
        ProfilerError::HardwareExecution { window_start: 0, .. }
    ));
    assert_eq!(err.errno(), libc::EIO);
    // Later windows never reach the executor, and nothing was applied
    assert_eq!(rig.gpu.exec_calls(), 1);
    assert_eq!(rig.gpu.peek(reg(0)), 0);
    assert_eq!(rig.gpu.peek(reg(2)), 0);
    assert_eq!(ops, before);
    Ok(())
}

#[test]
fn test_all_or_none_failure_in_later_window() -> Result<()> {
    let rig = rig_with(Capabilities::default(), base_config().with_window_capacity(2));
    let handle = ready_device_session(&rig)?;

    let mut ops = vec![
        ProfilerRegOp::write32(reg(0), 1),
        ProfilerRegOp::read32(reg(0)),
        ProfilerRegOp::write32(reg(2), 3),
        ProfilerRegOp::write32(reg(3) + 1, 4),
    ];

    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 4, ExecMode::AllOrNone)
        .unwrap_err();

    assert!(matches!(
        err,
        ProfilerError::HardwareExecution { window_start: 2, .. }
    ));
    // The first window completed and stays applied
    assert_eq!(rig.gpu.peek(reg(0)), 1);
    assert_eq!(ops[1].value, 1);
    // The failing window is neither applied nor copied back
    assert_eq!(rig.gpu.peek(reg(2)), 0);
    assert_eq!(ops[3].status, status::SUCCESS);
    Ok(())
}

#[test]
fn test_continue_on_error_reports_per_op_status() -> Result<()> {
    let rig = rig_with(Capabilities::default(), base_config().with_window_capacity(2));
    let handle = ready_device_session(&rig)?;

    let mut ops = vec![
        ProfilerRegOp::write32(reg(0), 9),
        ProfilerRegOp::new(RegOpKind::Write08, reg(1), 1, 0xff),
        ProfilerRegOp::write32(reg(2) + 2, 3),
        ProfilerRegOp {
            op: 0x7f,
            ..ProfilerRegOp::read32(reg(3))
        },
        ProfilerRegOp::read32(reg(0)),
    ];

    let report = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 5, ExecMode::ContinueOnError)?;

    assert!(!report.all_passed);
    assert_eq!(report.windows, 3);
    assert_eq!(ops[0].status, status::SUCCESS);
    assert_eq!(ops[1].status, status::UNSUPPORTED_OP);
    assert_eq!(ops[2].status, status::INVALID_OFFSET);
    assert_eq!(ops[3].status, status::INVALID_OP);
    assert_eq!(ops[3].op, 0x7f);
    assert_eq!(ops[4].value, 9);
    Ok(())
}

#[test]
fn test_all_passed_only_in_continue_mode() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    let mut ops = vec![ProfilerRegOp::read32(reg(0)), ProfilerRegOp::read32(reg(1))];

    let report = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 2, ExecMode::ContinueOnError)?;
    assert!(report.all_passed);

    let report = rig.mgr.exec_reg_ops(handle, &mut ops, 2, ExecMode::AllOrNone)?;
    assert!(!report.all_passed);
    Ok(())
}

#[test]
fn test_read_modify_write_and_64_bit_values() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    rig.gpu.poke(reg(0), 0xf0f0);

    let mut ops = vec![
        ProfilerRegOp::new(RegOpKind::Write32, reg(0), 0x000a, 0x000f),
        ProfilerRegOp::write64(reg(2), 0x1122_3344_5566_7788),
        ProfilerRegOp::read64(reg(2)),
    ];
    rig.mgr.exec_reg_ops(handle, &mut ops, 3, ExecMode::AllOrNone)?;

    assert_eq!(rig.gpu.peek(reg(0)), 0xf0fa);
    assert_eq!(ops[2].value, 0x1122_3344_5566_7788);
    Ok(())
}

#[test]
fn test_context_session_targets_context_image() -> Result<()> {
    let rig = rig();
    let ctx = rig.contexts.insert(7);
    let handle = rig.mgr.open(ReservationScope::Context)?;
    rig.mgr.bind_context(handle, Some(7))?;
    rig.mgr
        .reserve_pm_resource(handle, PmResourceType::HwpmLegacy, true)?;
    rig.mgr.bind_pm_resources(handle)?;

    let mut ops = vec![ProfilerRegOp::write32(reg(1), 55)];
    let report = rig.mgr.exec_reg_ops(handle, &mut ops, 1, ExecMode::AllOrNone)?;

    assert!(!report.direct_ops);
    assert_eq!(rig.gpu.peek_context(ctx, reg(1)), 55);
    assert_eq!(rig.gpu.peek(reg(1)), 0);
    Ok(())
}

#[test]
fn test_stale_context_rejected() -> Result<()> {
    let rig = rig();
    rig.contexts.insert(8);
    let handle = rig.mgr.open(ReservationScope::Context)?;
    rig.mgr.bind_context(handle, Some(8))?;
    rig.mgr
        .reserve_pm_resource(handle, PmResourceType::HwpmLegacy, true)?;
    rig.mgr.bind_pm_resources(handle)?;

    rig.contexts.remove(8);
    let mut ops = vec![ProfilerRegOp::read32(reg(0))];
    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 1, ExecMode::AllOrNone)
        .unwrap_err();

    assert!(matches!(err, ProfilerError::InvalidState(_)));
    assert_eq!(rig.gpu.exec_calls(), 0);
    assert_eq!(rig.power.refs(), 0);
    Ok(())
}

#[test]
fn test_count_limits() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    let mut ops = vec![ProfilerRegOp::read32(reg(0))];

    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 0, ExecMode::AllOrNone)
        .unwrap_err();
    assert!(matches!(err, ProfilerError::InvalidArgument(_)));

    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 1025, ExecMode::AllOrNone)
        .unwrap_err();
    assert!(matches!(err, ProfilerError::InvalidArgument(_)));
    assert_eq!(rig.gpu.exec_calls(), 0);
    Ok(())
}

#[test]
fn test_transfer_fault_mid_batch() -> Result<()> {
    let rig = rig_with(Capabilities::default(), base_config().with_window_capacity(2));
    let handle = ready_device_session(&rig)?;

    // Caller claims 4 ops but only provides 3
    let mut ops = vec![
        ProfilerRegOp::write32(reg(0), 1),
        ProfilerRegOp::write32(reg(1), 2),
        ProfilerRegOp::write32(reg(2), 3),
    ];
    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 4, ExecMode::AllOrNone)
        .unwrap_err();

    assert!(matches!(err, ProfilerError::TransferFault { op_index: 2, .. }));
    assert_eq!(err.errno(), libc::EFAULT);
    assert_eq!(rig.gpu.peek(reg(1)), 2);
    assert_eq!(rig.gpu.peek(reg(2)), 0);
    Ok(())
}

#[test]
fn test_power_reference_balanced_on_every_path() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;

    let mut good = vec![ProfilerRegOp::read32(reg(0))];
    rig.mgr.exec_reg_ops(handle, &mut good, 1, ExecMode::AllOrNone)?;
    assert_eq!(rig.power.refs(), 0);

    let mut bad = vec![ProfilerRegOp::read32(0x4)];
    rig.mgr
        .exec_reg_ops(handle, &mut bad, 1, ExecMode::AllOrNone)
        .unwrap_err();
    assert_eq!(rig.power.refs(), 0);

    rig.gpu.inject_fault(reg(5));
    let mut faulting = vec![ProfilerRegOp::write32(reg(5), 1)];
    rig.mgr
        .exec_reg_ops(handle, &mut faulting, 1, ExecMode::AllOrNone)
        .unwrap_err();
    assert_eq!(rig.power.refs(), 0);

    let mut short: Vec<ProfilerRegOp> = Vec::new();
    rig.mgr
        .exec_reg_ops(handle, &mut short, 1, ExecMode::AllOrNone)
        .unwrap_err();
    assert_eq!(rig.power.refs(), 0);
    assert_eq!(rig.power.power_on_count(), 4);
    Ok(())
}

#[test]
fn test_power_on_failure() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    rig.power.fail_next_power_on();

    let mut ops = vec![ProfilerRegOp::read32(reg(0))];
    let err = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 1, ExecMode::AllOrNone)
        .unwrap_err();

    assert!(matches!(err, ProfilerError::PowerOn(_)));
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(rig.gpu.exec_calls(), 0);
    assert_eq!(rig.power.refs(), 0);
    Ok(())
}

#[test]
fn test_fault_under_continue_on_error() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    rig.gpu.inject_fault(reg(1));

    let mut ops = vec![
        ProfilerRegOp::write32(reg(0), 1),
        ProfilerRegOp::write32(reg(1), 2),
    ];
    let report = rig
        .mgr
        .exec_reg_ops(handle, &mut ops, 2, ExecMode::ContinueOnError)?;

    assert!(!report.all_passed);
    assert!(ops[0].succeeded());
    assert_eq!(ops[1].status, status::INVALID_OFFSET);
    assert_eq!(rig.gpu.peek(reg(0)), 1);
    Ok(())
}

#[test]
fn test_byte_buffer_round_trip() -> Result<()> {
    let rig = rig();
    let handle = ready_device_session(&rig)?;
    rig.gpu.poke(reg(0), 0xdead_beef);

    let mut buffer = RegOpBytes::encode(&[ProfilerRegOp::read32(reg(0))])?;
    rig.mgr.exec_reg_ops(handle, &mut buffer, 1, ExecMode::AllOrNone)?;

    let ops = buffer.decode()?;
    assert_eq!(ops[0].value, 0xdead_beef);
    Ok(())
}

#[test]
fn test_single_op_matches_split_batch() -> Result<()> {
    const CAPACITY: usize = 4;
    let rig = rig_with(
        Capabilities::default(),
        base_config().with_window_capacity(CAPACITY),
    );
    let handle = ready_device_session(&rig)?;

    let op = ProfilerRegOp::write32(reg(0) + 2, 1);
    let mut single = vec![op];
    let report = rig
        .mgr
        .exec_reg_ops(handle, &mut single, 1, ExecMode::ContinueOnError)?;
    assert_eq!(report.windows, 1);

    let mut batch = vec![op; CAPACITY + 1];
    let report = rig.mgr.exec_reg_ops(
        handle,
        &mut batch,
        (CAPACITY + 1) as u32,
        ExecMode::ContinueOnError,
    )?;
    assert_eq!(report.windows, 2);

    for result in &batch[..CAPACITY] {
        assert_eq!(result.status, single[0].status);
    }
    assert_eq!(single[0].status, status::INVALID_OFFSET);
    Ok(())
}
