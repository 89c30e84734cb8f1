//! Timer-driven execution of passes.

use std::time::Duration;

use common::config::ScheduleConfig;
use common::error::RelayError;
use orchestrator::{Orchestrator, PassReport};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Run passes every `schedule.interval` until `shutdown` is cancelled.
///
/// Returns the number of passes started, or a configuration error when the
/// schedule cannot drive a timer.
pub async fn run_scheduled(
    orchestrator: &Orchestrator,
    schedule: &ScheduleConfig,
    shutdown: &CancellationToken,
) -> Result<usize, RelayError> {
    schedule.validate()?;
    let mut ticker = interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !schedule.run_on_startup {
        // The first tick completes immediately
        ticker.tick().await;
    }

    let mut passes = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                passes += 1;
                tracing::debug!(pass = passes, "Scheduled pass due");
                run_pass_with_deadline(orchestrator, schedule.pass_timeout, shutdown).await;
            }
        }
    }
    Ok(passes)
}

/// Run one pass that is cancelled at `pass_timeout` or when `parent` is cancelled.
///
/// Work already started finishes; work not yet started is reported as cancelled.
pub async fn run_pass_with_deadline(
    orchestrator: &Orchestrator,
    pass_timeout: Option<Duration>,
    parent: &CancellationToken,
) -> PassReport {
    let cancel = parent.child_token();
    let pass = orchestrator.run_pass(&cancel);
    tokio::pin!(pass);

    let Some(limit) = pass_timeout else {
        return pass.await;
    };

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    tokio::select! {
        report = &mut pass => return report,
        _ = &mut deadline => {
            tracing::warn!(timeout = ?limit, "Pass deadline reached, cancelling remaining work");
            cancel.cancel();
        }
    }
    pass.await
}
