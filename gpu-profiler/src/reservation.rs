//! Cross-session PM resource reservation accounting.
//!
//! One table per device, keyed by resource type and guarded by its own lock.
//! Arbitration rules:
//!
//! - a global (non context-switched) reservation is exclusive: nobody else
//!   may hold the resource in any mode;
//! - a context-switched reservation for context C may coexist with other
//!   context-switched reservations for different contexts, but not with a
//!   global holder or a second holder for C.

use regscope_shared::{ContextId, PmResourceType, SessionHandle};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// How a reservation is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationMode {
    /// Device-global, persistent across context switches
    Global,
    /// Saved and restored with the given context
    ContextSwitched(ContextId),
}

impl ReservationMode {
    pub fn is_context_switched(&self) -> bool {
        matches!(self, Self::ContextSwitched(_))
    }
}

impl fmt::Display for ReservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::ContextSwitched(ctx) => write!(f, "ctxsw({})", ctx),
        }
    }
}

/// One owner of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub session: SessionHandle,
    pub mode: ReservationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Granted,
    /// The session already held the resource; its mode is unchanged
    AlreadyHeld(ReservationMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHeld,
}

/// Rejected reservation, naming the holder that blocks it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{resource} held by session {} in {} mode", .holder.session, .holder.mode)]
pub struct ReservationConflict {
    pub resource: PmResourceType,
    pub holder: Holder,
}

impl From<ReservationConflict> for crate::error::ProfilerError {
    fn from(conflict: ReservationConflict) -> Self {
        Self::ResourceBusy {
            resource: conflict.resource,
            reason: conflict.to_string(),
        }
    }
}

/// Device-wide reservation table shared by every session
#[derive(Debug, Default)]
pub struct PmReservationTable {
    holders: Mutex<HashMap<PmResourceType, Vec<Holder>>>,
}

impl PmReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_reserve(
        &self,
        resource: PmResourceType,
        session: SessionHandle,
        mode: ReservationMode,
    ) -> Result<ReserveOutcome, ReservationConflict> {
        let mut table = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        let holders = table.entry(resource).or_default();

        if let Some(own) = holders.iter().find(|h| h.session == session) {
            return Ok(ReserveOutcome::AlreadyHeld(own.mode));
        }

        let blocking = holders.iter().find(|h| match (mode, h.mode) {
            (ReservationMode::Global, _) | (_, ReservationMode::Global) => true,
            (ReservationMode::ContextSwitched(want), ReservationMode::ContextSwitched(held)) => {
                want == held
            }
        });
        if let Some(holder) = blocking {
            return Err(ReservationConflict {
                resource,
                holder: *holder,
            });
        }

        holders.push(Holder { session, mode });
        Ok(ReserveOutcome::Granted)
    }

    pub fn release(&self, resource: PmResourceType, session: SessionHandle) -> ReleaseOutcome {
        let mut table = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(holders) = table.get_mut(&resource) else {
            return ReleaseOutcome::NotHeld;
        };
        let before = holders.len();
        holders.retain(|h| h.session != session);
        if holders.len() < before {
            ReleaseOutcome::Released
        } else {
            ReleaseOutcome::NotHeld
        }
    }

    /// Drop every reservation held by `session`, returning what was freed
    pub fn release_all(&self, session: SessionHandle) -> Vec<PmResourceType> {
        let mut table = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        let mut freed = Vec::new();
        for (resource, holders) in table.iter_mut() {
            let before = holders.len();
            holders.retain(|h| h.session != session);
            if holders.len() < before {
                freed.push(*resource);
            }
        }
        freed.sort();
        freed
    }

    pub fn holders(&self, resource: PmResourceType) -> Vec<Holder> {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    pub fn holds(&self, resource: PmResourceType, session: SessionHandle) -> bool {
        self.holders(resource).iter().any(|h| h.session == session)
    }
}
