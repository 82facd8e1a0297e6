//! Control-channel request dispatch
//!
//! Decodes a request code and its fixed-size argument block, then routes it
//! to the matching [`SessionManager`] operation.

use crate::error::{ProfilerError, Result};
use crate::manager::SessionManager;
use crate::metrics;
use crate::staging::UserOpsBuffer;
use regscope_shared::protocol::ioctl::{
    self, decode_args, encode_args, BindContextArgs, ExecRegOpsArgs, ReleasePmResourceArgs,
    RequestCode, ReservePmResourceArgs, EXEC_FLAG_ALL_PASSED, EXEC_FLAG_DIRECT_OPS,
    PROFILER_IOCTL_LAST, PROFILER_IOCTL_MAGIC,
};
use regscope_shared::{ExecMode, PmResourceType, SessionHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
    decode_args(buf, buf.len())
        .map_err(|e| ProfilerError::invalid_argument(format!("bad request arguments: {}", e)))
}

fn encode_into<T: Serialize>(args: &T, buf: &mut [u8]) -> Result<()> {
    let bytes = encode_args(args)
        .map_err(|e| ProfilerError::invalid_argument(format!("cannot encode arguments: {}", e)))?;
    let dst = buf
        .get_mut(..bytes.len())
        .ok_or_else(|| ProfilerError::invalid_argument("argument buffer too small"))?;
    dst.copy_from_slice(&bytes);
    Ok(())
}

fn resource(raw: u32) -> Result<PmResourceType> {
    PmResourceType::try_from(raw)
        .map_err(|_| ProfilerError::invalid_argument(format!("unknown PM resource {}", raw)))
}

impl SessionManager {
    /// Dispatch one control request against `handle`.
    ///
    /// `arg` is the caller's argument memory. `ops` carries the register op
    /// array for EXEC_REG_OPS and is ignored by every other request.
    pub fn ioctl(
        &self,
        handle: SessionHandle,
        cmd: u32,
        arg: &mut [u8],
        ops: Option<&mut dyn UserOpsBuffer>,
    ) -> Result<()> {
        let name = ioctl::request_name(cmd);
        let result = self.dispatch(handle, cmd, arg, ops);

        let status = match &result {
            Ok(()) => "ok",
            Err(e) => e.kind(),
        };
        metrics::REQUESTS_TOTAL
            .with_label_values(&[name, status])
            .inc();

        if let Err(e) = &result {
            debug!(
                "session {}: {} failed with errno {}: {}",
                handle,
                name,
                e.errno(),
                e
            );
        }
        result
    }

    fn dispatch(
        &self,
        handle: SessionHandle,
        cmd: u32,
        arg: &mut [u8],
        ops: Option<&mut dyn UserOpsBuffer>,
    ) -> Result<()> {
        let code = RequestCode::decode(cmd);
        if code.magic != PROFILER_IOCTL_MAGIC || code.nr == 0 || code.nr > PROFILER_IOCTL_LAST {
            warn!("session {}: bad request code 0x{:08x}", handle, cmd);
            return Err(ProfilerError::invalid_argument(format!(
                "bad request code 0x{:08x}",
                cmd
            )));
        }

        let size = code.size as usize;
        if size > self.config().max_arg_size {
            return Err(ProfilerError::invalid_argument(format!(
                "argument size {} exceeds {}",
                size,
                self.config().max_arg_size
            )));
        }

        let mut buf = vec![0u8; size];
        if code.writes_args() {
            let src = arg.get(..size).ok_or_else(|| ProfilerError::TransferFault {
                op_index: 0,
                reason: format!("argument buffer holds {} of {} bytes", arg.len(), size),
            })?;
            buf.copy_from_slice(src);
        }

        match cmd {
            ioctl::BIND_CONTEXT => {
                let args: BindContextArgs = decode(&buf)?;
                let fd = (args.context_fd >= 0).then_some(args.context_fd);
                self.bind_context(handle, fd)?;
            }
            ioctl::UNBIND_CONTEXT => self.unbind_context(handle)?,
            ioctl::RESERVE_PM_RESOURCE => {
                let args: ReservePmResourceArgs = decode(&buf)?;
                self.reserve_pm_resource(handle, resource(args.resource)?, args.ctxsw())?;
            }
            ioctl::RELEASE_PM_RESOURCE => {
                let args: ReleasePmResourceArgs = decode(&buf)?;
                self.release_pm_resource(handle, resource(args.resource)?)?;
            }
            ioctl::BIND_PM_RESOURCES => self.bind_pm_resources(handle)?,
            ioctl::UNBIND_PM_RESOURCES => self.unbind_pm_resources(handle)?,
            ioctl::EXEC_REG_OPS => {
                let mut args: ExecRegOpsArgs = decode(&buf)?;
                let ops = ops.ok_or_else(|| ProfilerError::TransferFault {
                    op_index: 0,
                    reason: "no register op buffer supplied".to_string(),
                })?;
                let report =
                    self.exec_reg_ops(handle, ops, args.count, ExecMode::from_raw(args.mode))?;

                args.flags = 0;
                if report.direct_ops {
                    args.flags |= EXEC_FLAG_DIRECT_OPS;
                }
                if report.all_passed {
                    args.flags |= EXEC_FLAG_ALL_PASSED;
                }
                encode_into(&args, &mut buf)?;
            }
            _ => return Err(ProfilerError::UnknownRequest(cmd)),
        }

        if code.reads_args() {
            let available = arg.len();
            let dst = arg
                .get_mut(..size)
                .ok_or_else(|| ProfilerError::TransferFault {
                    op_index: 0,
                    reason: format!("argument buffer holds {} of {} bytes", available, size),
                })?;
            dst.copy_from_slice(&buf);
        }
        Ok(())
    }
}
