//! Audit logging for privileged profiler events.
//!
//! All events are emitted via `tracing` with a dedicated target so they can be
//! filtered and formatted (e.g. JSON) for audit pipelines.

use regscope_shared::{PmResourceType, ReservationScope, SessionHandle};
use tracing::{info, warn};

const AUDIT_TARGET: &str = "regscope::audit";

/// Log a profiler session being opened.
pub fn session_opened(session: SessionHandle, scope: ReservationScope) {
    info!(
        target: AUDIT_TARGET,
        event = "session_opened",
        session = %session,
        scope = %scope,
        result = "ok",
    );
}

/// Log a profiler session being closed with the reservations it dropped.
pub fn session_closed(session: SessionHandle, released: usize) {
    info!(
        target: AUDIT_TARGET,
        event = "session_closed",
        session = %session,
        released = released,
        result = "ok",
    );
}

/// Log a granted PM resource reservation.
pub fn reservation_granted(session: SessionHandle, resource: PmResourceType, ctxsw: bool) {
    info!(
        target: AUDIT_TARGET,
        event = "reservation_granted",
        session = %session,
        resource = %resource,
        ctxsw = ctxsw,
        result = "ok",
    );
}

/// Log a refused PM resource reservation.
pub fn reservation_denied(session: SessionHandle, resource: PmResourceType, reason: &str) {
    warn!(
        target: AUDIT_TARGET,
        event = "reservation_denied",
        session = %session,
        resource = %resource,
        result = "denied",
        reason = %reason,
    );
}

/// Log a released PM resource reservation.
pub fn reservation_released(session: SessionHandle, resource: PmResourceType) {
    info!(
        target: AUDIT_TARGET,
        event = "reservation_released",
        session = %session,
        resource = %resource,
        result = "ok",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_target_is_static() {
        assert_eq!(AUDIT_TARGET, "regscope::audit");
    }
}
