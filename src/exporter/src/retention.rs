//! Age-based pruning of stored artifacts.
//!
//! An artifact is deleted when it is strictly older than the configured
//! maximum age. A failed deletion is recorded and the pass moves on to the
//! next artifact. Artifacts removed by someone else between listing and
//! deleting are counted as already gone, not as failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::RetentionConfig;
use common::error::RelayError;
use common::model::ArtifactMeta;
use common::storage::{ArtifactStore, DeleteOutcome};

/// Result of a single pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Artifacts deleted, or that would have been deleted in dry-run mode
    pub deleted: Vec<String>,
    /// Number of artifacts younger than the threshold
    pub kept: usize,
    /// Expired artifacts that disappeared before we could delete them
    pub already_gone: Vec<String>,
    /// Artifacts whose deletion failed, with the error message
    pub failures: Vec<(String, String)>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn fully_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn expired(&self) -> usize {
        self.deleted.len() + self.already_gone.len() + self.failures.len()
    }

    pub fn log(&self) {
        if self.fully_succeeded() {
            tracing::info!(
                deleted = self.deleted.len(),
                kept = self.kept,
                already_gone = self.already_gone.len(),
                dry_run = self.dry_run,
                "Retention pass completed"
            );
        } else {
            tracing::warn!(
                deleted = self.deleted.len(),
                kept = self.kept,
                already_gone = self.already_gone.len(),
                failed = self.failures.len(),
                dry_run = self.dry_run,
                "Retention pass completed with failures"
            );
        }
    }
}

/// Deletes artifacts older than a maximum age.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    store: ArtifactStore,
    dry_run: bool,
}

impl RetentionManager {
    pub fn new(store: ArtifactStore, config: &RetentionConfig) -> Self {
        Self {
            store,
            dry_run: config.dry_run,
        }
    }

    /// Prune against the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the store cannot be listed. Failures of
    /// individual deletions are reported in the [`PruneReport`].
    pub async fn prune(&self, max_age: Duration) -> Result<PruneReport, RelayError> {
        self.prune_at(max_age, Utc::now()).await
    }

    /// Prune as if the current time were `now`.
    pub async fn prune_at(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<PruneReport, RelayError> {
        let artifacts = self.store.list().await?;
        let (expired, kept) = partition_by_age(artifacts, max_age, now);

        tracing::debug!(
            expired = expired.len(),
            kept = kept.len(),
            max_age = ?max_age,
            "Evaluated artifact ages"
        );

        let mut report = PruneReport {
            kept: kept.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        for artifact in expired {
            if self.dry_run {
                tracing::info!(
                    artifact = %artifact.name,
                    last_modified = %artifact.last_modified,
                    "Dry run: would delete expired artifact"
                );
                report.deleted.push(artifact.name);
                continue;
            }

            match self.store.delete(&artifact).await {
                Ok(DeleteOutcome::Deleted) => {
                    tracing::debug!(artifact = %artifact.name, "Deleted expired artifact");
                    report.deleted.push(artifact.name);
                }
                Ok(DeleteOutcome::AlreadyGone) => {
                    tracing::info!(
                        artifact = %artifact.name,
                        "Expired artifact was already removed"
                    );
                    report.already_gone.push(artifact.name);
                }
                Err(e) => {
                    tracing::warn!(
                        artifact = %artifact.name,
                        error = %e,
                        "Failed to delete expired artifact"
                    );
                    report.failures.push((artifact.name, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

/// Split artifacts into `(expired, kept)`. Expired means strictly older than `max_age`.
pub fn partition_by_age(
    artifacts: Vec<ArtifactMeta>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> (Vec<ArtifactMeta>, Vec<ArtifactMeta>) {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    artifacts
        .into_iter()
        .partition(|artifact| artifact.age(now) > max_age)
}
