//! Stress command implementation
//!
//! Opens many device sessions at once and races them for one PM resource on
//! the tokio blocking pool, checking after each round that the reservation
//! table granted exactly as many sessions as the arbitration rules allow.

use super::{load_config, Device};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use regscope_profiler::ProfilerError;
use regscope_shared::{PmResourceType, ReservationScope, SessionHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Args, Debug)]
pub struct StressArgs {
    /// Concurrent sessions per round
    #[arg(short, long, default_value = "8")]
    pub sessions: usize,

    /// PM resource to race for: hwpm_legacy or smpc
    #[arg(short, long, default_value = "hwpm_legacy")]
    pub resource: PmResourceType,

    /// Request context-switched reservations
    #[arg(long)]
    pub ctxsw: bool,

    /// Contexts to spread sessions over when --ctxsw is set
    #[arg(long, default_value = "1")]
    pub contexts: usize,

    /// Rounds to run
    #[arg(long, default_value = "10")]
    pub rounds: usize,

    /// Profiler config file (TOML)
    #[arg(short, long, env = "REGSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Debug, Default)]
struct Tally {
    granted: usize,
    busy: usize,
}

pub async fn run(args: StressArgs) -> Result<()> {
    if args.sessions == 0 || args.rounds == 0 {
        anyhow::bail!("--sessions and --rounds must be greater than 0");
    }
    if args.ctxsw && args.contexts == 0 {
        anyhow::bail!("--contexts must be greater than 0 with --ctxsw");
    }

    let config = load_config(args.config.as_deref())?;
    let device = Arc::new(Device::simulated(config)?);

    let fds: Vec<i32> = if args.ctxsw {
        (0..args.contexts as i32).collect()
    } else {
        Vec::new()
    };
    for fd in &fds {
        device.contexts.insert(*fd);
    }

    let winners = expected_winners(&args);

    output::info(&format!(
        "{} round(s) of {} sessions racing for {} ({}), expecting {} winner(s) per round",
        args.rounds,
        args.sessions,
        args.resource,
        if args.ctxsw { "context switched" } else { "global" },
        winners
    ));

    let progress = ProgressBar::new(args.rounds as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} rounds")
            .context("Invalid progress template")?,
    );

    let mut total = Tally::default();
    for round in 0..args.rounds {
        let tally = race(&device, &args, &fds).await?;
        debug!("round {}: {:?}", round, tally);

        if tally.granted != winners {
            progress.abandon();
            anyhow::bail!(
                "round {}: {} reservation(s) granted, expected {}",
                round,
                tally.granted,
                winners
            );
        }
        total.granted += tally.granted;
        total.busy += tally.busy;
        progress.inc(1);
    }
    progress.finish_and_clear();

    if device.power.refs() != 0 {
        output::warning(&format!(
            "{} power reference(s) still held",
            device.power.refs()
        ));
    }
    output::success(&format!(
        "{} granted, {} refused as busy, reservation table consistent",
        total.granted, total.busy
    ));
    Ok(())
}

/// Each context admits one context-switched holder; global is exclusive
fn expected_winners(args: &StressArgs) -> usize {
    if args.ctxsw {
        args.contexts.min(args.sessions)
    } else {
        1
    }
}

/// One round: open, bind and race every session, then close them all
async fn race(device: &Arc<Device>, args: &StressArgs, fds: &[i32]) -> Result<Tally> {
    let mgr = &device.manager;
    let mut handles: Vec<SessionHandle> = Vec::with_capacity(args.sessions);
    for i in 0..args.sessions {
        let handle = mgr.open(ReservationScope::Device)?;
        let fd = (!fds.is_empty()).then(|| fds[i % fds.len()]);
        mgr.bind_context(handle, fd)?;
        handles.push(handle);
    }

    let mut tasks = Vec::with_capacity(handles.len());
    for handle in &handles {
        let device = device.clone();
        let handle = *handle;
        let (resource, ctxsw) = (args.resource, args.ctxsw);
        tasks.push(tokio::task::spawn_blocking(move || {
            device.manager.reserve_pm_resource(handle, resource, ctxsw)
        }));
    }

    let mut tally = Tally::default();
    for task in tasks {
        match task.await.context("Reservation task panicked")? {
            Ok(_) => tally.granted += 1,
            Err(ProfilerError::ResourceBusy { .. }) => tally.busy += 1,
            Err(e) => return Err(e).context("Reservation failed outright"),
        }
    }

    for handle in handles {
        mgr.close(handle)?;
    }

    let leftover = device.gpu.reservations().holders(args.resource);
    if !leftover.is_empty() {
        anyhow::bail!("{} reservation(s) survived session close", leftover.len());
    }
    Ok(tally)
}
