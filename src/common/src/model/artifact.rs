use chrono::{DateTime, Utc};

/// Listing entry for a stored artifact. Content is fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// Final path segment of the object location, e.g. `Orders_20240201_120000.csv`
    pub name: String,
    /// Full object location including any configured prefix
    pub location: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

impl ArtifactMeta {
    /// Age of the artifact relative to `now`. Negative when the store clock runs ahead.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_modified
    }
}
