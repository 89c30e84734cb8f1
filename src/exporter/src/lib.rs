//! Export side of a pass: retention of aged artifacts and export of catalog
//! tables into CSV artifacts.

pub mod codec;
pub mod coordinator;
pub mod filename;
pub mod retention;

pub use coordinator::{ExportCoordinator, ExportOutcome, ExportReport, ExportStatus};
pub use retention::{PruneReport, RetentionManager};
