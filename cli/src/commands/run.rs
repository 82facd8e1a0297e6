//! Run command implementation
//!
//! Replays a JSON script of session steps against the simulated device:
//!
//! ```json
//! { "steps": [
//!     { "step": "open", "session": "a", "scope": "device" },
//!     { "step": "bind_context", "session": "a" },
//!     { "step": "reserve", "session": "a", "resource": "hwpm_legacy" },
//!     { "step": "bind_pm", "session": "a" },
//!     { "step": "exec", "session": "a", "ops": [
//!         { "kind": "write32", "offset": "0x240000", "value": 5 },
//!         { "kind": "read32", "offset": "0x240000" } ] },
//!     { "step": "close", "session": "a" }
//! ] }
//! ```
//!
//! Each step may carry `"expect": "<error kind>"`; without it the step is
//! expected to succeed.

use super::{load_config, Device};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use regscope_profiler::metrics;
use regscope_shared::{
    ExecMode, PmResourceType, ProfilerRegOp, RegOpKind, ReservationScope, SessionHandle,
};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Session script (JSON)
    pub script: PathBuf,

    /// Profiler config file (TOML)
    #[arg(short, long, env = "REGSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print Prometheus metrics when the script finishes
    #[arg(long)]
    pub metrics: bool,

    /// Stop at the first step with an unexpected outcome
    #[arg(long)]
    pub fail_fast: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,

    /// Expected error kind, `None` for success
    #[serde(default)]
    pub expect: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Action {
    CreateContext {
        fd: i32,
    },
    DestroyContext {
        fd: i32,
    },
    Open {
        session: String,
        scope: ReservationScope,
    },
    Close {
        session: String,
    },
    BindContext {
        session: String,
        #[serde(default)]
        fd: Option<i32>,
    },
    UnbindContext {
        session: String,
    },
    Reserve {
        session: String,
        resource: PmResourceType,
        #[serde(default)]
        ctxsw: bool,
    },
    Release {
        session: String,
        resource: PmResourceType,
    },
    BindPm {
        session: String,
    },
    UnbindPm {
        session: String,
    },
    /// Print the session state as JSON
    Info {
        session: String,
    },
    Exec {
        session: String,
        #[serde(default = "default_mode")]
        mode: ExecMode,
        /// Op count to request; defaults to the number of ops listed
        #[serde(default)]
        count: Option<u32>,
        ops: Vec<ScriptOp>,
    },
}

fn default_mode() -> ExecMode {
    ExecMode::AllOrNone
}

/// Register op as written in a script
#[derive(Debug, Deserialize)]
pub struct ScriptOp {
    pub kind: RegOpKind,
    #[serde(deserialize_with = "hex_or_int")]
    pub offset: u64,
    #[serde(default, deserialize_with = "hex_or_int")]
    pub value: u64,
    /// Read-modify-write mask; plain write when absent
    #[serde(default, deserialize_with = "opt_hex_or_int")]
    pub mask: Option<u64>,
}

impl ScriptOp {
    fn to_reg_op(&self) -> Result<ProfilerRegOp> {
        let offset = u32::try_from(self.offset)
            .with_context(|| format!("offset 0x{:x} does not fit in 32 bits", self.offset))?;
        if self.mask.is_some() && !self.kind.is_write() {
            anyhow::bail!(
                "mask given for {:?} at 0x{:x}; only writes take a mask",
                self.kind,
                offset
            );
        }
        let full_mask = match self.kind {
            RegOpKind::Write32 => u32::MAX as u64,
            RegOpKind::Write64 => u64::MAX,
            RegOpKind::Write08 => u8::MAX as u64,
            RegOpKind::Read32 | RegOpKind::Read64 | RegOpKind::Read08 => 0,
        };
        Ok(ProfilerRegOp::new(
            self.kind,
            offset,
            self.value,
            self.mask.unwrap_or(full_mask),
        ))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Text(String),
}

fn parse_number(text: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    }
}

fn hex_or_int<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match Number::deserialize(d)? {
        Number::Int(v) => Ok(v),
        Number::Text(s) => parse_number(&s).map_err(D::Error::custom),
    }
}

fn opt_hex_or_int<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    hex_or_int(d).map(Some)
}

struct Runner {
    device: Device,
    sessions: HashMap<String, SessionHandle>,
}

impl Runner {
    fn handle(&self, name: &str) -> Result<SessionHandle> {
        self.sessions
            .get(name)
            .copied()
            .with_context(|| format!("script refers to unopened session '{}'", name))
    }

    /// Apply one step. The outer error is a broken script, the inner one an
    /// engine outcome to compare against the step's expectation.
    fn apply(&mut self, action: &Action) -> Result<regscope_profiler::Result<String>> {
        let mgr = &self.device.manager;
        let outcome = match action {
            Action::CreateContext { fd } => {
                let ctx = self.device.contexts.insert(*fd);
                Ok(format!("created {} behind fd {}", ctx, fd))
            }
            Action::DestroyContext { fd } => {
                let ctx = self
                    .device
                    .contexts
                    .remove(*fd)
                    .with_context(|| format!("no context behind fd {}", fd))?;
                Ok(format!("destroyed {}", ctx))
            }
            Action::Open { session, scope } => match mgr.open(*scope) {
                Ok(handle) => {
                    self.sessions.insert(session.clone(), handle);
                    Ok(format!("opened {} session '{}' as {}", scope, session, handle))
                }
                Err(e) => Err(e),
            },
            Action::Close { session } => {
                let handle = self.handle(session)?;
                let closed = mgr.close(handle);
                if closed.is_ok() {
                    self.sessions.remove(session);
                }
                closed.map(|()| format!("closed '{}'", session))
            }
            Action::BindContext { session, fd } => mgr
                .bind_context(self.handle(session)?, *fd)
                .map(|()| match fd {
                    Some(fd) => format!("'{}' bound to fd {}", session, fd),
                    None => format!("'{}' bound to no context", session),
                }),
            Action::UnbindContext { session } => mgr
                .unbind_context(self.handle(session)?)
                .map(|()| format!("'{}' unbound", session)),
            Action::Reserve {
                session,
                resource,
                ctxsw,
            } => mgr
                .reserve_pm_resource(self.handle(session)?, *resource, *ctxsw)
                .map(|state| {
                    format!(
                        "'{}' reserved {} (context switched: {})",
                        session, resource, state.context_switched
                    )
                }),
            Action::Release { session, resource } => mgr
                .release_pm_resource(self.handle(session)?, *resource)
                .map(|()| format!("'{}' released {}", session, resource)),
            Action::BindPm { session } => mgr
                .bind_pm_resources(self.handle(session)?)
                .map(|()| format!("'{}' PM resources bound", session)),
            Action::UnbindPm { session } => mgr
                .unbind_pm_resources(self.handle(session)?)
                .map(|()| format!("'{}' PM resources unbound", session)),
            Action::Info { session } => match mgr.info(self.handle(session)?) {
                Ok(info) => Ok(serde_json::to_string(&info)?),
                Err(e) => Err(e),
            },
            Action::Exec {
                session,
                mode,
                count,
                ops,
            } => {
                let handle = self.handle(session)?;
                let mut reg_ops = ops
                    .iter()
                    .map(ScriptOp::to_reg_op)
                    .collect::<Result<Vec<_>>>()?;
                let count = count.unwrap_or(reg_ops.len() as u32);
                let result = mgr.exec_reg_ops(handle, &mut reg_ops, count, *mode);
                if result.is_ok() {
                    output::reg_ops(&reg_ops);
                }
                result.map(|report| {
                    format!(
                        "'{}' executed {} op(s) in {} window(s) (direct: {}, all passed: {})",
                        session, report.ops, report.windows, report.direct_ops, report.all_passed
                    )
                })
            }
        };
        Ok(outcome)
    }
}

fn outcome_kind(outcome: &regscope_profiler::Result<String>) -> &'static str {
    match outcome {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;
    let script: Script = serde_json::from_str(&text).context("Failed to parse script")?;
    let config = load_config(args.config.as_deref())?;

    output::info(&format!(
        "replaying {} step(s), window capacity {} ops",
        script.steps.len(),
        config.window_capacity()
    ));

    let mut runner = Runner {
        device: Device::simulated(config)?,
        sessions: HashMap::new(),
    };

    let mut mismatches = 0;
    for (i, step) in script.steps.iter().enumerate() {
        debug!("step {}: {:?}", i, step.action);
        let outcome = runner
            .apply(&step.action)
            .with_context(|| format!("step {} is invalid", i))?;

        let expected = step.expect.as_deref().unwrap_or("ok");
        let actual = outcome_kind(&outcome);
        match (&outcome, expected == actual) {
            (Ok(msg), true) => output::success(&format!("[{}] {}", i, msg)),
            (Err(e), true) => output::warning(&format!("[{}] expected failure: {}", i, e)),
            (Ok(msg), false) => {
                mismatches += 1;
                output::error(&format!("[{}] expected {}, but: {}", i, expected, msg));
            }
            (Err(e), false) => {
                mismatches += 1;
                output::error(&format!(
                    "[{}] expected {}, got {} (errno {}): {}",
                    i,
                    expected,
                    actual,
                    e.errno(),
                    e
                ));
            }
        }

        if mismatches > 0 && args.fail_fast {
            break;
        }
    }

    let open = runner.device.manager.session_count();
    if open > 0 {
        output::info(&format!("{} session(s) left open; closing", open));
    }
    drop(runner);

    if args.metrics {
        print!("{}", metrics::encode_metrics()?);
    }

    if mismatches > 0 {
        anyhow::bail!("{} step(s) did not match their expected outcome", mismatches);
    }
    Ok(())
}
