//! Profiler engine configuration

use crate::hal::Capabilities;
use anyhow::Context;
use regscope_shared::protocol::ioctl::{ExecRegOpsArgs, ReservePmResourceArgs};
use regscope_shared::REG_OP_RECORD_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest argument size a request code can describe (14 bits)
const MAX_ENCODABLE_ARG_SIZE: usize = (1 << 14) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Bytes of caller ops staged at once
    pub window_bytes: usize,

    /// Max ops accepted in one EXEC_REG_OPS request
    pub max_reg_ops: u32,

    /// Max control-channel argument payload in bytes
    pub max_arg_size: usize,

    /// Simulated device capabilities
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub profiler_device: bool,
    pub profiler_context: bool,
    pub smpc_global_mode: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let caps = Capabilities::default();
        Self {
            profiler_device: caps.profiler_device,
            profiler_context: caps.profiler_context,
            smpc_global_mode: caps.smpc_global_mode,
        }
    }
}

impl From<DeviceConfig> for Capabilities {
    fn from(device: DeviceConfig) -> Self {
        Self {
            profiler_device: device.profiler_device,
            profiler_context: device.profiler_context,
            smpc_global_mode: device.smpc_global_mode,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            window_bytes: env_or("REGSCOPE_WINDOW_BYTES", 4096),
            max_reg_ops: env_or("REGSCOPE_MAX_REG_OPS", 1024),
            max_arg_size: env_or("REGSCOPE_MAX_ARG_SIZE", 32),
            device: DeviceConfig::default(),
        }
    }
}

impl ProfilerConfig {
    /// Number of ops that fit in one staging window
    pub fn window_capacity(&self) -> usize {
        self.window_bytes / REG_OP_RECORD_SIZE
    }

    /// Same configuration but with room for exactly `ops` ops per window
    pub fn with_window_capacity(mut self, ops: usize) -> Self {
        self.window_bytes = ops * REG_OP_RECORD_SIZE;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_capacity() == 0 {
            anyhow::bail!(
                "window_bytes must hold at least one {}-byte register op",
                REG_OP_RECORD_SIZE
            );
        }

        if self.max_reg_ops == 0 {
            anyhow::bail!("max_reg_ops must be greater than 0");
        }

        let largest_args = ExecRegOpsArgs::SIZE.max(ReservePmResourceArgs::SIZE) as usize;
        if self.max_arg_size < largest_args {
            anyhow::bail!(
                "max_arg_size {} is smaller than the largest request ({} bytes)",
                self.max_arg_size,
                largest_args
            );
        }

        if self.max_arg_size > MAX_ENCODABLE_ARG_SIZE {
            anyhow::bail!("max_arg_size too large (max {})", MAX_ENCODABLE_ARG_SIZE);
        }

        Ok(())
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse profiler config")?;
        config.validate().context("Invalid profiler config")?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}
