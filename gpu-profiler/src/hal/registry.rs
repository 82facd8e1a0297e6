//! Execution-context-group lookup

use regscope_shared::ContextId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Resolves caller-supplied context references.
///
/// The registry owns context-group lifetime; sessions only keep the
/// [`ContextId`] and ask again whenever they need the context.
pub trait ContextRegistry: Send + Sync {
    /// Map a caller file descriptor to a context id
    fn resolve(&self, fd: i32) -> Option<ContextId>;

    /// Whether the context still exists
    fn is_live(&self, ctx: ContextId) -> bool;
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_fd: HashMap<i32, ContextId>,
    next_id: u64,
}

/// Registry backed by a map, used with the simulated backend
#[derive(Debug, Default)]
pub struct InMemoryContextRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemoryContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context group reachable through `fd`. Re-using an fd
    /// replaces the old group.
    pub fn insert(&self, fd: i32) -> ContextId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = ContextId(inner.next_id);
        inner.by_fd.insert(fd, id);
        debug!("context group {} created for fd {}", id, fd);
        id
    }

    /// Destroy the context group behind `fd`
    pub fn remove(&self, fd: i32) -> Option<ContextId> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.by_fd.remove(&fd);
        if let Some(id) = removed {
            debug!("context group {} destroyed", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_fd
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextRegistry for InMemoryContextRegistry {
    fn resolve(&self, fd: i32) -> Option<ContextId> {
        if fd < 0 {
            return None;
        }
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_fd
            .get(&fd)
            .copied()
    }

    fn is_live(&self, ctx: ContextId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_fd
            .values()
            .any(|id| *id == ctx)
    }
}
