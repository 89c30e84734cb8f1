use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use orchestrator::Orchestrator;
use tokio_util::sync::CancellationToken;

mod scheduler;

#[derive(Parser)]
#[command(name = "snaprelay")]
#[command(about = "snaprelay - export database tables to object storage and relay them to FTP partners")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<SnapRelayCommands>,
}

#[derive(Subcommand)]
enum SnapRelayCommands {
    /// Run a single pass, print its summary and exit
    RunOnce,
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for SnapRelayCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

/// Cancel `shutdown` once a signal arrives.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "Signal handling failed, shutting down");
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let command = cli.command.unwrap_or_default();
    if let SnapRelayCommands::Common(ref common_cmd) = command {
        if utils::handle_common_command(common_cmd, &config).await? {
            return Ok(ExitCode::SUCCESS);
        }
    }

    for problem in config.validate() {
        tracing::warn!(error = %problem, "Configuration problem, dependent phases will be skipped");
    }

    let schedule = config.schedule.clone();
    let orchestrator = Orchestrator::from_config(config);
    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    match command {
        SnapRelayCommands::RunOnce => {
            let report = scheduler::run_pass_with_deadline(
                &orchestrator,
                schedule.pass_timeout,
                &shutdown,
            )
            .await;
            println!("{report}");
            if report.has_errors() {
                return Ok(ExitCode::FAILURE);
            }
        }
        SnapRelayCommands::Common(_) => {
            tracing::info!(
                interval = ?schedule.interval,
                run_on_startup = schedule.run_on_startup,
                "snaprelay running, waiting for shutdown signal"
            );
            let passes = scheduler::run_scheduled(&orchestrator, &schedule, &shutdown)
                .await
                .context("Scheduler stopped")?;
            tracing::info!(passes, "snaprelay stopped");
        }
    }

    Ok(ExitCode::SUCCESS)
}
