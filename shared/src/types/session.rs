//! Profiler session enums and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque profiler session handle, stable for the session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u32);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an execution-context-group, owned by the context registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Reservation scope chosen when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationScope {
    /// Device-wide reservation, optionally tied to one context
    Device,
    /// Bound to exactly one execution-context-group
    Context,
}

impl ReservationScope {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Context => "context",
        }
    }
}

impl fmt::Display for ReservationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for ReservationScope {
    type Err = SessionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "context" => Ok(Self::Context),
            _ => Err(SessionTypeError::UnknownScope(s.to_string())),
        }
    }
}

/// Hardware performance-monitoring resource types that can be reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmResourceType {
    /// Legacy HWPM counter blocks
    HwpmLegacy,
    /// SM performance counters
    Smpc,
}

impl PmResourceType {
    pub const ALL: [PmResourceType; 2] = [PmResourceType::HwpmLegacy, PmResourceType::Smpc];

    /// Raw value used on the control channel
    pub fn as_raw(&self) -> u32 {
        match self {
            Self::HwpmLegacy => 0,
            Self::Smpc => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HwpmLegacy => "hwpm_legacy",
            Self::Smpc => "smpc",
        }
    }
}

impl fmt::Display for PmResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<u32> for PmResourceType {
    type Error = SessionTypeError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::HwpmLegacy),
            1 => Ok(Self::Smpc),
            other => Err(SessionTypeError::UnknownResource(other)),
        }
    }
}

impl std::str::FromStr for PmResourceType {
    type Err = SessionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hwpm_legacy" | "hwpm" => Ok(Self::HwpmLegacy),
            "smpc" => Ok(Self::Smpc),
            _ => Err(SessionTypeError::UnknownResourceName(s.to_string())),
        }
    }
}

/// Atomicity contract for a register-operation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    AllOrNone,
    ContinueOnError,
}

impl ExecMode {
    pub const RAW_ALL_OR_NONE: u32 = 0;
    pub const RAW_CONTINUE_ON_ERROR: u32 = 1;

    /// Any value other than continue-on-error selects all-or-none
    pub fn from_raw(raw: u32) -> Self {
        if raw == Self::RAW_CONTINUE_ON_ERROR {
            Self::ContinueOnError
        } else {
            Self::AllOrNone
        }
    }

    pub fn as_raw(&self) -> u32 {
        match self {
            Self::AllOrNone => Self::RAW_ALL_OR_NONE,
            Self::ContinueOnError => Self::RAW_CONTINUE_ON_ERROR,
        }
    }
}

/// Errors decoding session enums from raw or textual values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionTypeError {
    #[error("unknown PM resource type {0}")]
    UnknownResource(u32),
    #[error("unknown PM resource name '{0}'")]
    UnknownResourceName(String),
    #[error("unknown reservation scope '{0}'")]
    UnknownScope(String),
}
