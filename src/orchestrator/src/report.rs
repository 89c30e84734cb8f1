use std::fmt;

use chrono::{DateTime, Utc};
use common::error::RelayError;
use dispatcher::DispatchReport;
use exporter::{ExportReport, PruneReport};

/// Item counts of one phase, used for the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} succeeded={} failed={} skipped={}",
            self.processed, self.succeeded, self.failed, self.skipped
        )
    }
}

/// Common view over the per-phase reports.
pub trait PhaseReport {
    fn summary(&self) -> PhaseSummary;

    fn fully_succeeded(&self) -> bool;
}

impl PhaseReport for PruneReport {
    fn summary(&self) -> PhaseSummary {
        PhaseSummary {
            processed: self.expired() + self.kept,
            succeeded: self.deleted.len() + self.already_gone.len(),
            failed: self.failures.len(),
            skipped: self.kept,
        }
    }

    fn fully_succeeded(&self) -> bool {
        PruneReport::fully_succeeded(self)
    }
}

impl PhaseReport for ExportReport {
    fn summary(&self) -> PhaseSummary {
        PhaseSummary {
            processed: self.outcomes.len(),
            succeeded: self.exported(),
            failed: self.failed() + self.desynced(),
            skipped: self.cancelled(),
        }
    }

    fn fully_succeeded(&self) -> bool {
        ExportReport::fully_succeeded(self)
    }
}

impl PhaseReport for DispatchReport {
    fn summary(&self) -> PhaseSummary {
        PhaseSummary {
            processed: self.attempts.len() + self.skips.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            skipped: self.skips.len() + self.cancelled(),
        }
    }

    fn fully_succeeded(&self) -> bool {
        DispatchReport::fully_succeeded(self)
    }
}

/// How a phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome<T> {
    Completed(T),
    /// A required store, catalog or setting was unavailable
    Skipped(RelayError),
    Disabled,
}

impl<T: PhaseReport> PhaseOutcome<T> {
    pub fn report(&self) -> Option<&T> {
        match self {
            PhaseOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// True when the phase was skipped for an error or reported item failures.
    pub fn has_errors(&self) -> bool {
        match self {
            PhaseOutcome::Completed(report) => !report.fully_succeeded(),
            PhaseOutcome::Skipped(_) => true,
            PhaseOutcome::Disabled => false,
        }
    }

    pub fn log(&self, phase: &str) {
        match self {
            PhaseOutcome::Completed(report) => {
                let summary = report.summary();
                tracing::info!(
                    phase,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Phase summary"
                );
            }
            PhaseOutcome::Skipped(error) => {
                tracing::error!(phase, kind = error.kind(), error = %error, "Phase skipped");
            }
            PhaseOutcome::Disabled => tracing::info!(phase, "Phase disabled"),
        }
    }

    fn describe(&self) -> String {
        match self {
            PhaseOutcome::Completed(report) => report.summary().to_string(),
            PhaseOutcome::Skipped(error) => format!("skipped ({error})"),
            PhaseOutcome::Disabled => "skipped (disabled)".to_string(),
        }
    }
}

/// Outcome of one retention, export and dispatch pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub retention: PhaseOutcome<PruneReport>,
    pub export: PhaseOutcome<ExportReport>,
    pub dispatch: PhaseOutcome<DispatchReport>,
}

impl PassReport {
    pub fn has_errors(&self) -> bool {
        self.retention.has_errors() || self.export.has_errors() || self.dispatch.has_errors()
    }

    pub fn log(&self) {
        self.retention.log("retention");
        self.export.log("export");
        self.dispatch.log("dispatch");
        tracing::info!(
            duration_ms = (self.finished_at - self.started_at).num_milliseconds(),
            has_errors = self.has_errors(),
            "Pass completed"
        );
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "retention: {}", self.retention.describe())?;
        writeln!(f, "export:    {}", self.export.describe())?;
        write!(f, "dispatch:  {}", self.dispatch.describe())
    }
}
