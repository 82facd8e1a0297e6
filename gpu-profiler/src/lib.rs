//! GPU profiler session manager
//!
//! Arbitrates hardware performance-monitoring resources between profiler
//! sessions and executes batched register operations on their behalf.
//!
//! A caller opens a session with a [`ReservationScope`], binds it to a
//! context (or to none), reserves PM resources, binds them and then runs
//! register op batches through [`SessionManager::exec_reg_ops`] or the
//! request-code interface [`SessionManager::ioctl`].
//!
//! [`ReservationScope`]: regscope_shared::ReservationScope

pub mod audit;
pub mod config;
pub mod control;
pub mod convert;
pub mod error;
pub mod exec;
pub mod hal;
pub mod manager;
pub mod metrics;
pub mod reservation;
pub mod session;
pub mod staging;

pub use config::{DeviceConfig, ProfilerConfig};
pub use error::{ProfilerError, Result};
pub use exec::ExecReport;
pub use hal::{
    Capabilities, ContextRegistry, InMemoryContextRegistry, PowerController, RefCountedPower,
    RegisterOperationExecutor, SimulatedGpu,
};
pub use manager::SessionManager;
pub use reservation::{PmReservationTable, ReservationMode};
pub use session::{ReservationState, SessionInfo};
pub use staging::{RegOpBytes, UserOpsBuffer};
