mod common;

use anyhow::Result;
use common::{rig, HWPM_BASE};
use regscope_profiler::{ProfilerError, RegOpBytes};
use regscope_shared::protocol::ioctl::{
    self, decode_args, encode_args, BindContextArgs, ExecRegOpsArgs, ReleasePmResourceArgs,
    ReservePmResourceArgs,
};
use regscope_shared::types::regop::status;
use regscope_shared::{ExecMode, PmResourceType, ProfilerRegOp, ReservationScope, SessionHandle};

#[test]
fn test_request_sequence_over_control_channel() -> Result<()> {
    let rig = rig();
    let handle = rig.mgr.open(ReservationScope::Device)?;

    let mut bind = encode_args(&BindContextArgs::none())?;
    rig.mgr.ioctl(handle, ioctl::BIND_CONTEXT, &mut bind, None)?;

    let mut reserve = encode_args(&ReservePmResourceArgs::new(
        PmResourceType::HwpmLegacy.as_raw(),
        false,
    ))?;
    rig.mgr
        .ioctl(handle, ioctl::RESERVE_PM_RESOURCE, &mut reserve, None)?;
    rig.mgr.ioctl(handle, ioctl::BIND_PM_RESOURCES, &mut [], None)?;

    rig.gpu.poke(HWPM_BASE, 0x1234);
    let mut ops = RegOpBytes::encode(&[
        ProfilerRegOp::read32(HWPM_BASE),
        ProfilerRegOp::write32(HWPM_BASE + 4, 9),
    ])?;
    let mut exec = encode_args(&ExecRegOpsArgs::new(ExecMode::RAW_CONTINUE_ON_ERROR, 2))?;
    rig.mgr
        .ioctl(handle, ioctl::EXEC_REG_OPS, &mut exec, Some(&mut ops))?;

    let out: ExecRegOpsArgs = decode_args(&exec, exec.len())?;
    assert!(out.direct_ops());
    assert!(out.all_passed());
    assert_eq!(out.count, 2);

    let results = ops.decode()?;
    assert_eq!(results[0].value, 0x1234);
    assert_eq!(results[1].status, status::SUCCESS);
    assert_eq!(rig.gpu.peek(HWPM_BASE + 4), 9);

    rig.mgr
        .ioctl(handle, ioctl::UNBIND_PM_RESOURCES, &mut [], None)?;
    let mut release = encode_args(&ReleasePmResourceArgs::new(
        PmResourceType::HwpmLegacy.as_raw(),
    ))?;
    rig.mgr
        .ioctl(handle, ioctl::RELEASE_PM_RESOURCE, &mut release, None)?;
    rig.mgr.ioctl(handle, ioctl::UNBIND_CONTEXT, &mut [], None)?;

    let info = rig.mgr.info(handle)?;
    assert!(!info.context_bound);
    assert!(info.reservations.is_empty());
    Ok(())
}

#[test]
fn test_all_or_none_exec_clears_output_flags() -> Result<()> {
    let rig = rig();
    let handle = rig.mgr.open(ReservationScope::Device)?;
    rig.mgr.bind_context(handle, None)?;
    rig.mgr
        .reserve_pm_resource(handle, PmResourceType::HwpmLegacy, false)?;
    rig.mgr.bind_pm_resources(handle)?;

    let mut ops = vec![ProfilerRegOp::read32(HWPM_BASE)];
    let mut args = ExecRegOpsArgs::new(ExecMode::RAW_ALL_OR_NONE, 1);
    args.flags = u32::MAX;
    let mut exec = encode_args(&args)?;
    rig.mgr
        .ioctl(handle, ioctl::EXEC_REG_OPS, &mut exec, Some(&mut ops))?;

    let out: ExecRegOpsArgs = decode_args(&exec, exec.len())?;
    assert!(out.direct_ops());
    assert!(!out.all_passed());
    Ok(())
}

#[test]
fn test_exec_copy_out_leaves_trailing_bytes() -> Result<()> {
    let rig = rig();
    let handle = rig.mgr.open(ReservationScope::Device)?;
    rig.mgr.bind_context(handle, None)?;
    rig.mgr
        .reserve_pm_resource(handle, PmResourceType::HwpmLegacy, false)?;
    rig.mgr.bind_pm_resources(handle)?;

    let mut ops = vec![ProfilerRegOp::read32(HWPM_BASE)];
    let mut exec = encode_args(&ExecRegOpsArgs::new(ExecMode::RAW_CONTINUE_ON_ERROR, 1))?;
    let size = exec.len();
    exec.extend_from_slice(&[0xaa; 4]);
    rig.mgr
        .ioctl(handle, ioctl::EXEC_REG_OPS, &mut exec, Some(&mut ops))?;

    let out: ExecRegOpsArgs = decode_args(&exec[..size], size)?;
    assert!(out.all_passed());
    assert_eq!(&exec[size..], &[0xaa; 4]);
    Ok(())
}

#[test]
fn test_bind_context_by_fd() -> Result<()> {
    let rig = rig();
    let ctx = rig.contexts.insert(12);
    let handle = rig.mgr.open(ReservationScope::Context)?;

    let mut bind = encode_args(&BindContextArgs::fd(12))?;
    rig.mgr.ioctl(handle, ioctl::BIND_CONTEXT, &mut bind, None)?;

    assert_eq!(rig.mgr.info(handle)?.context, Some(ctx));
    Ok(())
}

#[test]
fn test_busy_reservation_errno() -> Result<()> {
    let rig = rig();
    let a = rig.mgr.open(ReservationScope::Device)?;
    let b = rig.mgr.open(ReservationScope::Device)?;
    for handle in [a, b] {
        let mut bind = encode_args(&BindContextArgs::none())?;
        rig.mgr.ioctl(handle, ioctl::BIND_CONTEXT, &mut bind, None)?;
    }

    let args = ReservePmResourceArgs::new(PmResourceType::HwpmLegacy.as_raw(), false);
    rig.mgr
        .ioctl(a, ioctl::RESERVE_PM_RESOURCE, &mut encode_args(&args)?, None)?;
    let err = rig
        .mgr
        .ioctl(b, ioctl::RESERVE_PM_RESOURCE, &mut encode_args(&args)?, None)
        .unwrap_err();

    assert_eq!(err.errno(), libc::EBUSY);
    Ok(())
}

#[test]
fn test_exec_without_ops_buffer() -> Result<()> {
    let rig = rig();
    let handle = rig.mgr.open(ReservationScope::Device)?;

    let mut exec = encode_args(&ExecRegOpsArgs::new(ExecMode::RAW_ALL_OR_NONE, 1))?;
    let err = rig
        .mgr
        .ioctl(handle, ioctl::EXEC_REG_OPS, &mut exec, None)
        .unwrap_err();

    assert!(matches!(err, ProfilerError::TransferFault { .. }));
    Ok(())
}

#[test]
fn test_unknown_handle() {
    let rig = rig();
    let stranger = SessionHandle(999);

    let err = rig
        .mgr
        .ioctl(stranger, ioctl::UNBIND_CONTEXT, &mut [], None)
        .unwrap_err();

    assert_eq!(err, ProfilerError::UnknownSession(stranger));
    assert_eq!(err.errno(), libc::EBADF);
}

#[test]
fn test_request_number_out_of_range() -> Result<()> {
    let rig = rig();
    let handle = rig.mgr.open(ReservationScope::Device)?;
    let cmd = ioctl::RequestCode::new(0, ioctl::PROFILER_IOCTL_LAST + 1, 0).encode();

    let err = rig.mgr.ioctl(handle, cmd, &mut [], None).unwrap_err();
    assert!(matches!(err, ProfilerError::InvalidArgument(_)));
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}
