//! Composition of the retention, export and dispatch phases into one pass.

mod pass;
mod report;

pub use pass::Orchestrator;
pub use report::{PassReport, PhaseOutcome, PhaseReport, PhaseSummary};
