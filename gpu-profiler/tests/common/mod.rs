#![allow(dead_code)]

use regscope_profiler::{
    Capabilities, InMemoryContextRegistry, ProfilerConfig, RefCountedPower, SessionManager,
    SimulatedGpu,
};
use std::sync::Arc;

/// Base of the legacy HWPM register window in the simulated chip
pub const HWPM_BASE: u32 = 0x0024_0000;
/// Base of the SMPC register window in the simulated chip
pub const SMPC_BASE: u32 = 0x0041_9000;

/// A manager wired to the simulated backend, with handles on every
/// collaborator so tests can inspect them
pub struct Rig {
    pub gpu: Arc<SimulatedGpu>,
    pub contexts: Arc<InMemoryContextRegistry>,
    pub power: Arc<RefCountedPower>,
    pub mgr: SessionManager,
}

pub fn rig() -> Rig {
    rig_with(Capabilities::default(), base_config())
}

pub fn rig_with(caps: Capabilities, config: ProfilerConfig) -> Rig {
    let gpu = Arc::new(SimulatedGpu::new(caps));
    let contexts = Arc::new(InMemoryContextRegistry::new());
    let power = Arc::new(RefCountedPower::new());
    let mgr = SessionManager::new(gpu.clone(), contexts.clone(), power.clone(), config)
        .expect("valid config");
    Rig {
        gpu,
        contexts,
        power,
        mgr,
    }
}

/// Defaults that do not depend on the environment
pub fn base_config() -> ProfilerConfig {
    ProfilerConfig {
        window_bytes: 4096,
        max_reg_ops: 1024,
        max_arg_size: 32,
        ..ProfilerConfig::default()
    }
}
