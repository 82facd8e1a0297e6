//! Profiler error taxonomy

use regscope_shared::{ContextId, PmResourceType, ReservationScope, SessionHandle};

/// Errors surfaced by profiler session operations.
///
/// Every variant except the exec-time ones leaves the session untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfilerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("context is already bound to session {0}")]
    AlreadyBound(SessionHandle),

    #[error("{resource} is busy: {reason}")]
    ResourceBusy {
        resource: PmResourceType,
        reason: String,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0} scope profiling is not supported on this device")]
    UnsupportedScope(ReservationScope),

    #[error("out of memory allocating {0}")]
    NoMemory(&'static str),

    #[error("transfer fault at op {op_index}: {reason}")]
    TransferFault { op_index: usize, reason: String },

    #[error("register op execution failed in window starting at op {window_start}: {reason}")]
    HardwareExecution { window_start: usize, reason: String },

    #[error("device power-on failed: {0}")]
    PowerOn(String),

    #[error("unknown session handle {0}")]
    UnknownSession(SessionHandle),

    #[error("unrecognized request code 0x{0:08x}")]
    UnknownRequest(u32),
}

impl ProfilerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn stale_context(ctx: ContextId) -> Self {
        Self::InvalidState(format!("bound context {} no longer exists", ctx))
    }

    /// errno reported on the control channel
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_)
            | Self::InvalidState(_)
            | Self::AlreadyBound(_)
            | Self::UnsupportedScope(_) => libc::EINVAL,
            Self::ResourceBusy { .. } => libc::EBUSY,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
            Self::NoMemory(_) => libc::ENOMEM,
            Self::TransferFault { .. } => libc::EFAULT,
            Self::HardwareExecution { .. } | Self::PowerOn(_) => libc::EIO,
            Self::UnknownSession(_) => libc::EBADF,
            Self::UnknownRequest(_) => libc::ENOTTY,
        }
    }

    /// True for transient hardware or cross-session contention, false for
    /// caller misuse
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::ResourceBusy { .. } | Self::HardwareExecution { .. } | Self::PowerOn(_)
        )
    }

    /// Metrics / audit label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::AlreadyBound(_) => "already_bound",
            Self::ResourceBusy { .. } => "resource_busy",
            Self::Unsupported(_) => "unsupported",
            Self::UnsupportedScope(_) => "unsupported_scope",
            Self::NoMemory(_) => "no_memory",
            Self::TransferFault { .. } => "transfer_fault",
            Self::HardwareExecution { .. } => "hardware_execution",
            Self::PowerOn(_) => "power_on",
            Self::UnknownSession(_) => "unknown_session",
            Self::UnknownRequest(_) => "unknown_request",
        }
    }
}

pub type Result<T, E = ProfilerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ProfilerError::invalid_state("x").errno(), libc::EINVAL);
        assert_eq!(
            ProfilerError::ResourceBusy {
                resource: PmResourceType::Smpc,
                reason: "held".into()
            }
            .errno(),
            libc::EBUSY
        );
        assert_eq!(ProfilerError::UnknownRequest(0).errno(), libc::ENOTTY);
        assert_eq!(ProfilerError::NoMemory("staging").errno(), libc::ENOMEM);
    }

    #[test]
    fn test_contention_vs_misuse() {
        assert!(ProfilerError::PowerOn("timeout".into()).is_contention());
        assert!(!ProfilerError::invalid_argument("count").is_contention());
        assert!(!ProfilerError::Unsupported("smpc global".into()).is_contention());
    }

    #[test]
    fn test_display() {
        let err = ProfilerError::UnknownRequest(0x4010_5007);
        assert_eq!(err.to_string(), "unrecognized request code 0x40105007");
    }
}
