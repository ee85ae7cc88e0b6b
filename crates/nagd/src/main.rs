//! nagd — the nag daemon.
//!
//! Loads a monitor configuration, starts one escalation loop per target and
//! keeps them running until told to stop:
//! - SIGHUP re-reads the configuration file and applies it in place
//! - SIGTERM / Ctrl-C stop every loop and exit
//! - a periodic status board line reports green/amber/red counts
//!
//! # Usage
//!
//! ```text
//! nagd run --config /etc/nag.toml --report-interval 300
//! nagd check --config /etc/nag.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use nag_core::{Health, MonitorConfig, ResolvedConfig};
use nag_health::{RacingProber, Supervisor};

#[derive(Parser)]
#[command(name = "nagd", about = "Endpoint monitor with escalating alerts", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every configured target until interrupted.
    Run {
        /// Path to the TOML configuration.
        #[arg(short, long, default_value = "/etc/nag.toml")]
        config: PathBuf,

        /// Status board interval in seconds (0 disables it).
        #[arg(long, default_value = "300")]
        report_interval: u64,
    },
    /// Validate a configuration file and print the resolved targets.
    Check {
        #[arg(short, long, default_value = "/etc/nag.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run {
            config,
            report_interval,
        } => run(config, report_interval).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nagd=debug,nag_health=debug,nag_notify=debug"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load(path: &Path) -> anyhow::Result<ResolvedConfig> {
    MonitorConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;

    println!("monitor: {}", config.monitor_name);
    for target in &config.targets {
        println!(
            "  {:<20} {}  timeouts {:?}/{:?}/{:?}  every {:?}",
            target.name,
            target.address,
            target.timeouts.short,
            target.timeouts.long,
            target.timeouts.patient,
            target.poll_interval,
        );
    }
    for tier in &config.tiers {
        let mode = if tier.repeat { "every cycle" } else { "once" };
        println!(
            "  tier {:<12} at {} failures ({}, {mode})",
            tier.channel, tier.threshold, tier.urgency
        );
    }
    Ok(())
}

async fn run(path: PathBuf, report_interval: u64) -> anyhow::Result<()> {
    let config = load(&path)?;
    info!(
        monitor = %config.monitor_name,
        targets = config.targets.len(),
        tiers = config.tiers.len(),
        "nag daemon starting"
    );

    let supervisor = Arc::new(Supervisor::new(
        Arc::new(config),
        Arc::new(RacingProber::http()),
    ));
    supervisor.start().await;
    debug!(targets = ?supervisor.active_targets().await, "monitoring");

    // ── Status board ───────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let report_handle = (report_interval > 0).then(|| {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(report_loop(
            supervisor,
            Duration::from_secs(report_interval),
            shutdown_rx,
        ))
    });

    // ── Signals ────────────────────────────────────────────────

    wait_for_signals(&supervisor, &path).await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    if let Some(handle) = report_handle {
        let _ = handle.await;
    }

    info!("nag daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(supervisor: &Supervisor, path: &Path) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => reload(supervisor, path).await,
            _ = terminate.recv() => return Ok(()),
            res = tokio::signal::ctrl_c() => {
                return res.context("waiting for Ctrl-C");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_supervisor: &Supervisor, _path: &Path) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")
}

/// Re-read the configuration; a file that fails to load leaves the running
/// snapshot in place.
async fn reload(supervisor: &Supervisor, path: &Path) {
    info!(path = %path.display(), "reloading configuration");
    match load(path) {
        Ok(config) => {
            let report = supervisor.reload(Arc::new(config)).await;
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                restarted = report.restarted.len(),
                unchanged = report.unchanged.len(),
                "configuration applied"
            );
            debug!(targets = ?supervisor.active_targets().await, "monitoring");
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "reload failed, keeping previous configuration");
        }
    }
}

async fn report_loop(
    supervisor: Arc<Supervisor>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; nothing has been probed yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let statuses = supervisor.statuses().await;
        let summary = nag_core::RagSummary::from_statuses(&statuses);
        info!(
            targets = summary.total(),
            green = summary.green,
            amber = summary.amber,
            red = summary.red,
            unknown = summary.unknown,
            "status board"
        );

        for status in &statuses {
            match status.health {
                Health::Red => warn!(
                    target_name = %status.name,
                    streak = status.streak,
                    "target down"
                ),
                Health::Amber => debug!(
                    target_name = %status.name,
                    streak = status.streak,
                    "target failing"
                ),
                _ => {}
            }
        }
    }
}
