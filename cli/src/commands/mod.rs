pub mod run;
pub mod stress;

use anyhow::{Context, Result};
use regscope_profiler::{
    InMemoryContextRegistry, ProfilerConfig, RefCountedPower, SessionManager, SimulatedGpu,
};
use std::path::Path;
use std::sync::Arc;

/// Simulated device plus the engine driving it
pub struct Device {
    pub gpu: Arc<SimulatedGpu>,
    pub contexts: Arc<InMemoryContextRegistry>,
    pub power: Arc<RefCountedPower>,
    pub manager: SessionManager,
}

impl Device {
    pub fn simulated(config: ProfilerConfig) -> Result<Self> {
        let gpu = Arc::new(SimulatedGpu::new(config.device.into()));
        let contexts = Arc::new(InMemoryContextRegistry::new());
        let power = Arc::new(RefCountedPower::new());
        let manager = SessionManager::new(gpu.clone(), contexts.clone(), power.clone(), config)
            .context("Failed to start profiler engine")?;
        Ok(Self {
            gpu,
            contexts,
            power,
            manager,
        })
    }
}

/// Config from `path` when given, else defaults (environment overrides apply)
pub fn load_config(path: Option<&Path>) -> Result<ProfilerConfig> {
    match path {
        Some(path) => ProfilerConfig::load(path),
        None => {
            let config = ProfilerConfig::default();
            config.validate().context("Invalid profiler config")?;
            Ok(config)
        }
    }
}
