//! Per-session state and the PM resource reservation state machine
//!
//! ```text
//! CREATED → CONTEXT_BOUND → { RESOURCES_RESERVED ↔ PM_BOUND } → … → CLOSED
//! ```
//!
//! Every method here runs with the session's serialization lock held by the
//! [`SessionManager`](crate::manager::SessionManager).

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::hal::{ContextRegistry, PowerController, RegisterOperationExecutor};
use crate::reservation::{ReleaseOutcome, ReservationMode, ReserveOutcome};
use crate::staging::StagingArea;
use regscope_shared::{ContextId, PmResourceType, ReservationScope, SessionHandle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collaborators shared by every session of one device
pub(crate) struct Backend {
    pub executor: Arc<dyn RegisterOperationExecutor>,
    pub contexts: Arc<dyn ContextRegistry>,
    pub power: Arc<dyn PowerController>,
    pub config: ProfilerConfig,
}

/// Local view of one resource reservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationState {
    pub reserved: bool,
    pub context_switched: bool,
}

/// Snapshot of a session for callers and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub scope: ReservationScope,
    pub context_bound: bool,
    pub context: Option<ContextId>,
    pub reservations: BTreeMap<PmResourceType, ReservationState>,
    pub pm_bound: bool,
}

#[derive(Debug)]
pub struct ProfilerSession {
    handle: SessionHandle,
    scope: ReservationScope,
    context_bound: bool,
    context: Option<ContextId>,
    reservations: BTreeMap<PmResourceType, ReservationState>,
    /// Context each context-switched reservation follows
    reserved_for: BTreeMap<PmResourceType, ContextId>,
    pm_bound: bool,
    staging: StagingArea,
    closed: bool,
}

impl ProfilerSession {
    pub(crate) fn new(handle: SessionHandle, scope: ReservationScope, staging: StagingArea) -> Self {
        Self {
            handle,
            scope,
            context_bound: false,
            context: None,
            reservations: BTreeMap::new(),
            reserved_for: BTreeMap::new(),
            pm_bound: false,
            staging,
            closed: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn scope(&self) -> ReservationScope {
        self.scope
    }

    pub fn context_bound(&self) -> bool {
        self.context_bound
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn pm_bound(&self) -> bool {
        self.pm_bound
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn reservation(&self, resource: PmResourceType) -> ReservationState {
        self.reservations
            .get(&resource)
            .copied()
            .unwrap_or_default()
    }

    pub fn reserved_resources(&self) -> Vec<PmResourceType> {
        self.reservations
            .iter()
            .filter(|(_, state)| state.reserved)
            .map(|(resource, _)| *resource)
            .collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            handle: self.handle,
            scope: self.scope,
            context_bound: self.context_bound,
            context: self.context,
            reservations: self.reservations.clone(),
            pm_bound: self.pm_bound,
        }
    }

    pub(crate) fn staging_mut(&mut self) -> &mut StagingArea {
        &mut self.staging
    }

    /// Associate the session with a context group, or with none
    pub(crate) fn bind_context(&mut self, backend: &Backend, fd: Option<i32>) -> Result<()> {
        if self.context_bound {
            warn!("session {}: context info is already initialized", self.handle);
            return Err(ProfilerError::AlreadyBound(self.handle));
        }

        let Some(fd) = fd else {
            return match self.scope {
                ReservationScope::Device => {
                    self.context_bound = true;
                    debug!("session {}: device-wide, no context", self.handle);
                    Ok(())
                }
                ReservationScope::Context => Err(ProfilerError::invalid_argument(
                    "context scope session needs a context",
                )),
            };
        };

        let ctx = backend
            .contexts
            .resolve(fd)
            .ok_or_else(|| ProfilerError::invalid_argument(format!("invalid context fd {}", fd)))?;

        self.context = Some(ctx);
        self.context_bound = true;
        debug!("session {}: bound to {}", self.handle, ctx);
        Ok(())
    }

    /// Forget the bound context. Reservations stay; exec re-checks them.
    pub(crate) fn unbind_context(&mut self) {
        if let Some(ctx) = self.context.take() {
            debug!("session {}: unbound from {}", self.handle, ctx);
        }
        self.context_bound = false;
    }

    fn reservation_mode(
        &self,
        backend: &Backend,
        resource: PmResourceType,
        want_ctxsw: bool,
    ) -> Result<ReservationMode> {
        match self.scope {
            ReservationScope::Device if want_ctxsw => self
                .context
                .map(ReservationMode::ContextSwitched)
                .ok_or_else(|| {
                    ProfilerError::invalid_state("context must be bound to enable context switch")
                }),
            ReservationScope::Device => {
                if resource == PmResourceType::Smpc
                    && !backend.executor.capabilities().smpc_global_mode
                {
                    return Err(ProfilerError::Unsupported(
                        "SMPC global mode not supported".to_string(),
                    ));
                }
                Ok(ReservationMode::Global)
            }
            // Context sessions are always context switched
            ReservationScope::Context => self
                .context
                .map(ReservationMode::ContextSwitched)
                .ok_or_else(|| {
                    ProfilerError::invalid_state("context must be bound for context session")
                }),
        }
    }

    pub(crate) fn reserve(
        &mut self,
        backend: &Backend,
        resource: PmResourceType,
        want_ctxsw: bool,
    ) -> Result<ReservationState> {
        if !self.context_bound {
            return Err(ProfilerError::invalid_state("context info not initialized"));
        }
        if self.pm_bound {
            return Err(ProfilerError::invalid_state(
                "PM resources are bound; unbind before changing reservations",
            ));
        }

        let mode = self.reservation_mode(backend, resource, want_ctxsw)?;
        let held = match backend
            .executor
            .reserve_pm_resource(self.handle, resource, mode)?
        {
            ReserveOutcome::Granted => mode,
            ReserveOutcome::AlreadyHeld(existing) => {
                debug!(
                    "session {}: {} already reserved in {} mode",
                    self.handle, resource, existing
                );
                existing
            }
        };

        let state = ReservationState {
            reserved: true,
            context_switched: held.is_context_switched(),
        };
        self.reservations.insert(resource, state);
        match held {
            ReservationMode::ContextSwitched(ctx) => self.reserved_for.insert(resource, ctx),
            ReservationMode::Global => self.reserved_for.remove(&resource),
        };
        Ok(state)
    }

    pub(crate) fn release(
        &mut self,
        backend: &Backend,
        resource: PmResourceType,
    ) -> Result<ReleaseOutcome> {
        if self.pm_bound {
            return Err(ProfilerError::invalid_state(
                "PM resources are bound; unbind before changing reservations",
            ));
        }

        let outcome = backend
            .executor
            .release_pm_resource(self.handle, resource)?;
        if outcome == ReleaseOutcome::NotHeld {
            debug!("session {}: {} was not reserved", self.handle, resource);
        }
        self.reservations.remove(&resource);
        self.reserved_for.remove(&resource);
        Ok(outcome)
    }

    /// Fail unless the bound context (if any) still exists and every
    /// context-switched reservation is for the context bound now
    pub(crate) fn check_context_still_valid(&self, backend: &Backend) -> Result<()> {
        if let Some(ctx) = self.context {
            if !backend.contexts.is_live(ctx) {
                return Err(ProfilerError::stale_context(ctx));
            }
        }
        for (resource, reserved) in &self.reserved_for {
            match self.context {
                Some(ctx) if ctx == *reserved => {}
                Some(ctx) => {
                    return Err(ProfilerError::invalid_state(format!(
                        "{} is reserved for {}, session is bound to {}",
                        resource, reserved, ctx
                    )))
                }
                None => {
                    return Err(ProfilerError::invalid_state(format!(
                        "{} is reserved for {} but no context is bound",
                        resource, reserved
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn bind_pm(&mut self, backend: &Backend) -> Result<()> {
        if !self.context_bound {
            return Err(ProfilerError::invalid_state("context info not initialized"));
        }
        if self.pm_bound {
            return Ok(());
        }

        let resources = self.reserved_resources();
        if resources.is_empty() {
            debug!("session {}: nothing reserved, bind is a no-op", self.handle);
            return Ok(());
        }
        self.check_context_still_valid(backend)?;

        backend
            .executor
            .bind_pm_resources(self.handle, self.context, &resources)?;
        self.pm_bound = true;
        Ok(())
    }

    pub(crate) fn unbind_pm(&mut self, backend: &Backend) -> Result<()> {
        if !self.pm_bound {
            return Ok(());
        }
        let resources = self.reserved_resources();
        backend
            .executor
            .unbind_pm_resources(self.handle, &resources)?;
        self.pm_bound = false;
        Ok(())
    }

    /// Unconditional close path: unbind, release every reservation, drop
    /// the staging memory. Returns the resources that were released.
    pub(crate) fn teardown(&mut self, backend: &Backend) -> Vec<PmResourceType> {
        if self.pm_bound {
            let resources = self.reserved_resources();
            if let Err(e) = backend.executor.unbind_pm_resources(self.handle, &resources) {
                warn!("session {}: unbind during close failed: {}", self.handle, e);
            }
            self.pm_bound = false;
        }

        let released = backend
            .executor
            .release_all_pm_resources(self.handle)
            .unwrap_or_else(|e| {
                warn!(
                    "session {}: releasing reservations during close failed: {}",
                    self.handle, e
                );
                Vec::new()
            });

        self.reservations.clear();
        self.reserved_for.clear();
        self.context = None;
        self.context_bound = false;
        self.staging = StagingArea::default();
        self.closed = true;
        released
    }
}
