//! Command implementations.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use repoferry_coordinator::{CheckpointStore, Coordinator};
use repoferry_protocol::{AuthToken, CloneOptions, CloneStage, Progress};
use repoferry_transfer::{GitCliExecutor, SimulatedExecutor, TransferExecutor};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::CloneArgs;
use crate::config::Config;

/// Environment variable holding the token for authenticated clones.
const TOKEN_ENV: &str = "REPOFERRY_TOKEN";

/// Runs one clone to completion, or pauses it on Ctrl-C.
pub async fn clone(config: Config, args: CloneArgs) -> anyhow::Result<()> {
    let executor: Arc<dyn TransferExecutor> = if args.simulate {
        let sim = &config.simulation;
        Arc::new(
            SimulatedExecutor::new(sim.total_bytes, sim.total_objects)
                .with_steps(sim.steps)
                .with_step_delay(Duration::from_millis(sim.step_delay_ms)),
        )
    } else {
        Arc::new(
            GitCliExecutor::with_program(&config.git.program, Vec::new())
                .with_poll_interval(config.git.poll_interval()),
        )
    };
    let coordinator = Coordinator::new(config.coordinator, executor);

    let handle = coordinator.clone_repository(clone_options(args))?;
    eprintln!("operation {}", handle.id());
    let printer = tokio::spawn(print_progress(handle.subscribe()));

    tokio::select! {
        result = handle.wait() => {
            let _ = printer.await;
            let result = result.context("clone failed")?;
            println!(
                "cloned into {} ({}, {:.1}s{})",
                result.path,
                format_bytes(result.total_bytes),
                result.duration.as_secs_f64(),
                if result.resumed { ", resumed" } else { "" },
            );
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            printer.abort();
            handle.pause();
            eprintln!();
            eprintln!("paused; rerun with --id {} to resume", handle.id());
            Ok(())
        }
    }
}

fn clone_options(args: CloneArgs) -> CloneOptions {
    let mut options = CloneOptions::new(args.url, args.destination)
        .include_submodules(args.submodules);
    if let Some(branch) = args.branch {
        options = options.branch(branch);
    }
    if let Some(depth) = args.depth {
        options = options.depth(depth);
    }
    if let Some(attempts) = args.max_retries {
        options = options.max_retries(attempts);
    }
    if let Some(secs) = args.timeout {
        options = options.operation_timeout(Duration::from_secs(secs));
    }
    if let Some(id) = args.id {
        options = options.operation_id(id);
    }
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            options = options.auth_token(AuthToken::new(token));
        }
    }
    options
}

async fn print_progress(mut rx: broadcast::Receiver<Progress>) {
    loop {
        match rx.recv().await {
            Ok(progress) => {
                let done = progress.stage.is_terminal();
                let mut err = std::io::stderr().lock();
                let _ = write!(err, "\r\x1b[2K{}", progress_line(&progress));
                if done {
                    let _ = writeln!(err);
                    return;
                }
                let _ = err.flush();
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

/// Renders one status line: stage, percentage, bytes, and rate.
fn progress_line(progress: &Progress) -> String {
    let mut line = format!("{:<12} {:>5.1}%", progress.stage.as_str(), progress.percentage);
    if progress.total_bytes > 0 {
        line.push_str(&format!(
            "  {}/{}",
            format_bytes(progress.downloaded_bytes),
            format_bytes(progress.total_bytes)
        ));
    }
    if progress.speed > 0.0 && progress.stage != CloneStage::Completed {
        line.push_str(&format!(
            "  {}/s  eta {}",
            format_bytes(progress.speed as u64),
            format_eta(progress.eta)
        ));
    }
    if progress.stage == CloneStage::Error && !progress.message.is_empty() {
        line.push_str(&format!("  {}", progress.message));
    }
    line
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_eta(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, secs % 3600 / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Lists stored checkpoints, oldest first.
pub fn list_checkpoints(config: &Config) -> anyhow::Result<()> {
    let store = CheckpointStore::new(config.coordinator.resume_dir.clone());
    let checkpoints = store.list();
    if checkpoints.is_empty() {
        println!("no checkpoints in {}", store.dir().display());
        return Ok(());
    }

    for cp in checkpoints {
        let saved = chrono::DateTime::from_timestamp_millis(cp.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {:>5.1}%  {}/{}  {}  {} -> {}",
            cp.operation_id,
            cp.percentage(),
            format_bytes(cp.downloaded_bytes),
            format_bytes(cp.total_bytes),
            saved,
            cp.url,
            cp.destination,
        );
    }
    Ok(())
}

/// Deletes every stored checkpoint.
pub fn clear_checkpoints(config: &Config) -> anyhow::Result<()> {
    let store = CheckpointStore::new(config.coordinator.resume_dir.clone());
    let removed = store.clear();
    println!("removed {removed} checkpoint(s)");
    Ok(())
}
