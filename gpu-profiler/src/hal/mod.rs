//! Hardware-facing collaborator interfaces
//!
//! The session engine talks to the chip only through these traits. A
//! concrete backend is picked once when the [`SessionManager`] is built.
//!
//! [`SessionManager`]: crate::manager::SessionManager

pub mod power;
pub mod registry;
pub mod sim;

use crate::error::Result;
use crate::reservation::{ReleaseOutcome, ReservationMode, ReserveOutcome};
use regscope_shared::{ContextId, ExecMode, PmResourceType, SessionHandle};

pub use power::{PowerController, PowerRef, RefCountedPower};
pub use registry::{ContextRegistry, InMemoryContextRegistry};
pub use sim::SimulatedGpu;

/// Feature switches reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Device-scope profiler sessions may be opened
    pub profiler_device: bool,
    /// Context-scope profiler sessions may be opened
    pub profiler_context: bool,
    /// SMPC can be reserved without context switching
    pub smpc_global_mode: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            profiler_device: true,
            profiler_context: true,
            smpc_global_mode: false,
        }
    }
}

/// Internal register operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgOp {
    Read32,
    Write32,
    Read64,
    Write64,
    Read08,
    Write08,
    /// Code the caller sent that maps to nothing
    Invalid(u8),
}

impl DbgOp {
    /// Access width in bytes, `None` for invalid ops
    pub fn width(&self) -> Option<u32> {
        match self {
            Self::Read32 | Self::Write32 => Some(4),
            Self::Read64 | Self::Write64 => Some(8),
            Self::Read08 | Self::Write08 => Some(1),
            Self::Invalid(_) => None,
        }
    }
}

/// Which register file an op targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAccessClass {
    /// Live device-global registers
    Global,
    /// Graphics context image of the bound context
    GrContext,
}

/// Internal per-op outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DbgStatus {
    #[default]
    Success,
    InvalidOp,
    InvalidType,
    InvalidOffset,
    UnsupportedOp,
    InvalidMask,
}

/// Register operation in the form consumed by executors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbgRegOp {
    pub op: DbgOp,
    pub class: RegAccessClass,
    pub status: DbgStatus,
    pub quad: u32,
    pub group_mask: u32,
    pub sub_group_mask: u32,
    pub offset: u32,
    pub value_lo: u32,
    pub value_hi: u32,
    pub and_n_mask_lo: u32,
    pub and_n_mask_hi: u32,
}

impl Default for DbgRegOp {
    fn default() -> Self {
        Self {
            op: DbgOp::Read32,
            class: RegAccessClass::Global,
            status: DbgStatus::Success,
            quad: 0,
            group_mask: 0,
            sub_group_mask: 0,
            offset: 0,
            value_lo: 0,
            value_hi: 0,
            and_n_mask_lo: 0,
            and_n_mask_hi: 0,
        }
    }
}

/// In/out flags for one executor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOpFlags {
    pub mode: ExecMode,
    /// Set by the executor when every op in the call succeeded
    pub all_passed: bool,
    /// Set by the executor when ops went straight to hardware
    pub direct_ops: bool,
}

impl RegOpFlags {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            all_passed: false,
            direct_ops: false,
        }
    }
}

/// Hard failure of an executor call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("{0} op(s) failed validation")]
    Rejected(usize),
    #[error("hardware fault accessing offset 0x{0:08x}")]
    Fault(u32),
}

/// Chip-specific register operation executor and PM reservation accounting.
///
/// Implementations must be safe to call from several sessions at once; the
/// reservation accounting is the only state shared between sessions.
pub trait RegisterOperationExecutor: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Arbitrate a reservation against every other session
    fn reserve_pm_resource(
        &self,
        session: SessionHandle,
        resource: PmResourceType,
        mode: ReservationMode,
    ) -> Result<ReserveOutcome>;

    fn release_pm_resource(
        &self,
        session: SessionHandle,
        resource: PmResourceType,
    ) -> Result<ReleaseOutcome>;

    /// Drop every reservation `session` holds, returning what was freed
    fn release_all_pm_resources(&self, session: SessionHandle) -> Result<Vec<PmResourceType>>;

    /// Attach reserved resources to live register windows
    fn bind_pm_resources(
        &self,
        session: SessionHandle,
        context: Option<ContextId>,
        resources: &[PmResourceType],
    ) -> Result<()>;

    fn unbind_pm_resources(&self, session: SessionHandle, resources: &[PmResourceType])
        -> Result<()>;

    /// Execute `ops` in order, filling in per-op status and read values
    fn exec_regops(
        &self,
        context: Option<ContextId>,
        ops: &mut [DbgRegOp],
        flags: &mut RegOpFlags,
    ) -> std::result::Result<(), ExecError>;
}
