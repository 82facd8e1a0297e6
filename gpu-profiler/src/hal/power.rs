//! Device power references

use crate::error::{ProfilerError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Power-on / idle reference counting provided by the power controller
pub trait PowerController: Send + Sync {
    /// Take a power-on reference, powering the device up if needed
    fn busy(&self) -> Result<()>;

    /// Drop a reference taken with [`busy`](Self::busy)
    fn idle(&self);
}

/// Scoped power-on reference; dropping it idles the device
pub struct PowerRef<'a> {
    power: &'a dyn PowerController,
}

impl<'a> PowerRef<'a> {
    pub fn acquire(power: &'a dyn PowerController) -> Result<Self> {
        power.busy()?;
        Ok(Self { power })
    }
}

impl Drop for PowerRef<'_> {
    fn drop(&mut self) {
        self.power.idle();
    }
}

/// Reference-counted power controller used with the simulated backend
#[derive(Debug, Default)]
pub struct RefCountedPower {
    refs: AtomicUsize,
    power_ons: AtomicU64,
    fail_next: AtomicBool,
}

impl RefCountedPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding power-on references
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Number of off → on transitions so far
    pub fn power_on_count(&self) -> u64 {
        self.power_ons.load(Ordering::Relaxed)
    }

    /// Make the next [`busy`](PowerController::busy) call fail
    pub fn fail_next_power_on(&self) {
        self.fail_next.store(true, Ordering::Release);
    }
}

impl PowerController for RefCountedPower {
    fn busy(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(ProfilerError::PowerOn("power rail did not come up".to_string()));
        }
        if self.refs.fetch_add(1, Ordering::AcqRel) == 0 {
            self.power_ons.fetch_add(1, Ordering::Relaxed);
            debug!("device powered on");
        }
        Ok(())
    }

    fn idle(&self) {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => debug!("device idle"),
            Ok(_) => {}
            Err(_) => warn!("unbalanced power idle ignored"),
        }
    }
}
