pub mod artifact;
pub mod export;
pub mod route;

pub use artifact::ArtifactMeta;
pub use export::{ExportDefinition, ResultSet};
pub use route::{Endpoint, Route, TransferDestination};
