//! Profiler session manager
//!
//! Owns every open session. Each session sits behind its own mutex, held for
//! the whole of any operation on it; different sessions proceed in parallel
//! and only meet in the executor's reservation accounting.

use crate::audit;
use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::exec::{self, ExecReport};
use crate::hal::{ContextRegistry, PowerController, RegisterOperationExecutor};
use crate::metrics;
use crate::session::{Backend, ProfilerSession, ReservationState, SessionInfo};
use crate::staging::{StagingArea, UserOpsBuffer};
use anyhow::Context;
use regscope_shared::{ExecMode, PmResourceType, ReservationScope, SessionHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

type SessionSlot = Arc<Mutex<ProfilerSession>>;

pub struct SessionManager {
    backend: Backend,
    sessions: RwLock<HashMap<SessionHandle, SessionSlot>>,
    next_handle: AtomicU32,
}

impl SessionManager {
    /// Build a manager around one device's collaborators
    pub fn new(
        executor: Arc<dyn RegisterOperationExecutor>,
        contexts: Arc<dyn ContextRegistry>,
        power: Arc<dyn PowerController>,
        config: ProfilerConfig,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid configuration")?;
        info!(
            "profiler manager on {} backend: window={} ops, max_reg_ops={}",
            executor.name(),
            config.window_capacity(),
            config.max_reg_ops
        );
        Ok(Self {
            backend: Backend {
                executor,
                contexts,
                power,
                config,
            },
            sessions: RwLock::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.backend.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Open a session with the given reservation scope
    pub fn open(&self, scope: ReservationScope) -> Result<SessionHandle> {
        info!("request to open profiler session with scope {}", scope);

        let caps = self.backend.executor.capabilities();
        let supported = match scope {
            ReservationScope::Device => caps.profiler_device,
            ReservationScope::Context => caps.profiler_context,
        };
        if !supported {
            return Err(ProfilerError::UnsupportedScope(scope));
        }

        let staging = StagingArea::allocate(self.backend.config.window_capacity())?;
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = ProfilerSession::new(handle, scope, staging);

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(Mutex::new(session)));

        metrics::SESSIONS_OPEN.inc();
        audit::session_opened(handle, scope);
        info!(
            "profiler session with scope {} created with handle {}",
            scope, handle
        );
        Ok(handle)
    }

    /// Close a session: unbind, release every reservation, invalidate the
    /// handle. Only fails for handles that are not open.
    pub fn close(&self, handle: SessionHandle) -> Result<()> {
        let slot = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .ok_or(ProfilerError::UnknownSession(handle))?;

        // Waits for any in-flight operation on this session
        let mut session = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let released = session.teardown(&self.backend);
        for resource in &released {
            audit::reservation_released(handle, *resource);
        }

        metrics::SESSIONS_OPEN.dec();
        audit::session_closed(handle, released.len());
        info!("profiler session {} closed", handle);
        Ok(())
    }

    fn with_session<T>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut ProfilerSession, &Backend) -> Result<T>,
    ) -> Result<T> {
        let slot = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(ProfilerError::UnknownSession(handle))?;

        let mut session = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_closed() {
            return Err(ProfilerError::UnknownSession(handle));
        }
        f(&mut session, &self.backend)
    }

    /// Bind to the context behind `context_fd`, or to no context at all
    pub fn bind_context(&self, handle: SessionHandle, context_fd: Option<i32>) -> Result<()> {
        self.with_session(handle, |session, backend| {
            session.bind_context(backend, context_fd)
        })
    }

    pub fn unbind_context(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session, _| {
            session.unbind_context();
            Ok(())
        })
    }

    pub fn reserve_pm_resource(
        &self,
        handle: SessionHandle,
        resource: PmResourceType,
        context_switched: bool,
    ) -> Result<ReservationState> {
        self.with_session(handle, |session, backend| {
            match session.reserve(backend, resource, context_switched) {
                Ok(state) => {
                    audit::reservation_granted(handle, resource, state.context_switched);
                    Ok(state)
                }
                Err(e) => {
                    if matches!(e, ProfilerError::ResourceBusy { .. }) {
                        metrics::RESERVATION_CONFLICTS
                            .with_label_values(&[resource.label()])
                            .inc();
                    }
                    audit::reservation_denied(handle, resource, &e.to_string());
                    Err(e)
                }
            }
        })
    }

    pub fn release_pm_resource(&self, handle: SessionHandle, resource: PmResourceType) -> Result<()> {
        self.with_session(handle, |session, backend| {
            session.release(backend, resource)?;
            audit::reservation_released(handle, resource);
            Ok(())
        })
    }

    pub fn bind_pm_resources(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session, backend| session.bind_pm(backend))
    }

    pub fn unbind_pm_resources(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session, backend| session.unbind_pm(backend))
    }

    /// Execute `count` register ops from `ops`, writing results back in place
    pub fn exec_reg_ops(
        &self,
        handle: SessionHandle,
        ops: &mut dyn UserOpsBuffer,
        count: u32,
        mode: ExecMode,
    ) -> Result<ExecReport> {
        self.with_session(handle, |session, backend| {
            exec::exec_reg_ops(session, backend, ops, count, mode).map_err(|e| {
                warn!("session {}: REG_OPS failed: {}", handle, e);
                e
            })
        })
    }

    pub fn info(&self, handle: SessionHandle) -> Result<SessionInfo> {
        self.with_session(handle, |session, _| Ok(session.info()))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        for handle in handles {
            let _ = self.close(handle);
        }
    }
}
