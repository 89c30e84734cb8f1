//! Fan-out of artifacts to their routed destinations.
//!
//! Routes join artifacts by exact filename. Every artifact is fetched once and
//! sent to each of its destinations in priority order. A failure for one
//! artifact and destination pair never affects another pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::catalog::ExportCatalog;
use common::config::DispatchConfig;
use common::error::RelayError;
use common::model::{ArtifactMeta, Endpoint, Route, TransferDestination};
use common::storage::{ArtifactStore, FetchError};
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressCallback, ProgressTracker};
use crate::secrets::SecretResolver;
use crate::transfer::{TransferClient, TransferError};

pub const MISSING_CREDENTIAL: &str = "missing credential";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Sent { bytes: u64 },
    Failed { reason: String },
    /// The pass was cancelled before this transfer started
    Cancelled,
}

/// Result for one artifact and destination pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAttempt {
    pub artifact: String,
    pub destination_id: i64,
    pub endpoint: Endpoint,
    pub outcome: TransferOutcome,
}

impl TransferAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Sent { .. })
    }

    pub fn error(&self) -> Option<RelayError> {
        match &self.outcome {
            TransferOutcome::Failed { reason } => Some(RelayError::item(
                format!("{} -> {}", self.artifact, self.endpoint),
                reason,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No eligible route carries this filename
    NoMapping,
    /// The artifact disappeared between listing and fetching
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    pub artifact: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempts: Vec<TransferAttempt>,
    pub skips: Vec<SkipRecord>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.attempts.iter().filter(|a| a.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, TransferOutcome::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, TransferOutcome::Cancelled))
            .count()
    }

    pub fn fully_succeeded(&self) -> bool {
        self.succeeded() == self.attempts.len()
    }

    pub fn log(&self) {
        tracing::info!(
            attempts = self.attempts.len(),
            succeeded = self.succeeded(),
            failed = self.failed(),
            cancelled = self.cancelled(),
            skipped = self.skips.len(),
            "Dispatch pass completed"
        );
    }
}

/// Sends stored artifacts to the destinations their routes name.
pub struct Dispatcher {
    catalog: Arc<dyn ExportCatalog>,
    store: ArtifactStore,
    secrets: Arc<dyn SecretResolver>,
    client: Arc<dyn TransferClient>,
    transfer_timeout: Duration,
    max_concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<dyn ExportCatalog>,
        store: ArtifactStore,
        secrets: Arc<dyn SecretResolver>,
        client: Arc<dyn TransferClient>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            secrets,
            client,
            transfer_timeout: config.transfer_timeout,
            max_concurrency: config.max_concurrency.max(1),
            progress: None,
        }
    }

    /// Replace the default debug-logging progress reporting.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Dispatch every stored artifact to its routed destinations.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the routes or the artifact listing
    /// cannot be read. Transfer failures are reported per pair.
    pub async fn dispatch(&self, cancel: &CancellationToken) -> Result<DispatchReport, RelayError> {
        let routes = self
            .catalog
            .eligible_routes()
            .await
            .map_err(|e| RelayError::connection("catalog", e))?;
        let artifacts = self.store.list().await?;

        let mut by_filename: HashMap<String, Vec<Route>> = HashMap::new();
        for route in routes {
            by_filename.entry(route.filename.clone()).or_default().push(route);
        }

        tracing::debug!(
            artifacts = artifacts.len(),
            routed_files = by_filename.len(),
            "Starting dispatch pass"
        );

        let by_filename = &by_filename;
        let mut results: Vec<(usize, ArtifactResult)> =
            stream::iter(artifacts.into_iter().enumerate())
                .map(|(idx, artifact)| async move {
                    let routes = by_filename
                        .get(&artifact.name)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    (idx, self.dispatch_artifact(artifact, routes, cancel).await)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut report = DispatchReport::default();
        for (_, result) in results {
            match result {
                ArtifactResult::Skipped(skip) => report.skips.push(skip),
                ArtifactResult::Attempted(attempts) => report.attempts.extend(attempts),
            }
        }
        Ok(report)
    }

    async fn dispatch_artifact(
        &self,
        artifact: ArtifactMeta,
        routes: &[Route],
        cancel: &CancellationToken,
    ) -> ArtifactResult {
        if routes.is_empty() {
            tracing::warn!(artifact = %artifact.name, "No active route for artifact, skipping");
            return ArtifactResult::Skipped(SkipRecord {
                artifact: artifact.name,
                reason: SkipReason::NoMapping,
            });
        }

        if cancel.is_cancelled() {
            return ArtifactResult::Attempted(
                routes
                    .iter()
                    .map(|route| {
                        attempt(&artifact.name, &route.destination, TransferOutcome::Cancelled)
                    })
                    .collect(),
            );
        }

        let content = match self.store.fetch_artifact(&artifact).await {
            Ok(content) => content,
            Err(FetchError::Vanished(_)) => {
                tracing::info!(artifact = %artifact.name, "Artifact vanished before dispatch");
                return ArtifactResult::Skipped(SkipRecord {
                    artifact: artifact.name,
                    reason: SkipReason::Vanished,
                });
            }
            Err(e) => {
                tracing::warn!(artifact = %artifact.name, error = %e, "Failed to fetch artifact");
                let reason = format!("fetch failed: {e}");
                return ArtifactResult::Attempted(
                    routes
                        .iter()
                        .map(|route| {
                            attempt(
                                &artifact.name,
                                &route.destination,
                                TransferOutcome::Failed {
                                    reason: reason.clone(),
                                },
                            )
                        })
                        .collect(),
                );
            }
        };

        let mut attempts = Vec::with_capacity(routes.len());
        for route in routes {
            let outcome = if cancel.is_cancelled() {
                TransferOutcome::Cancelled
            } else {
                self.transfer(&artifact.name, &route.destination, content.clone())
                    .await
            };
            attempts.push(attempt(&artifact.name, &route.destination, outcome));
        }
        ArtifactResult::Attempted(attempts)
    }

    async fn transfer(
        &self,
        artifact: &str,
        destination: &TransferDestination,
        content: Bytes,
    ) -> TransferOutcome {
        let endpoint = destination.endpoint();

        let username = self.secrets.resolve(&destination.username_secret).await;
        let password = self.secrets.resolve(&destination.password_secret).await;
        let (Some(username), Some(password)) = (username, password) else {
            tracing::error!(
                artifact = %artifact,
                destination = %endpoint,
                username_secret = %destination.username_secret,
                password_secret = %destination.password_secret,
                "Transfer credentials not found, skipping destination"
            );
            return TransferOutcome::Failed {
                reason: MISSING_CREDENTIAL.to_string(),
            };
        };

        let progress = match &self.progress {
            Some(callback) => ProgressTracker::new(content.len() as u64, callback.clone()),
            None => ProgressTracker::logging(content.len() as u64, artifact, &endpoint.to_string()),
        };

        let result = tokio::time::timeout(
            self.transfer_timeout,
            self.send(&endpoint, &username, &password, artifact, content, progress),
        )
        .await;

        match result {
            Ok(Ok(bytes)) => {
                tracing::info!(
                    artifact = %artifact,
                    destination = %endpoint,
                    bytes,
                    "Transferred artifact"
                );
                TransferOutcome::Sent { bytes }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    artifact = %artifact,
                    destination = %endpoint,
                    error = %e,
                    "Transfer failed"
                );
                TransferOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    artifact = %artifact,
                    destination = %endpoint,
                    timeout = ?self.transfer_timeout,
                    "Transfer timed out"
                );
                TransferOutcome::Failed {
                    reason: format!("transfer timed out after {:?}", self.transfer_timeout),
                }
            }
        }
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        username: &str,
        password: &str,
        remote_name: &str,
        content: Bytes,
        progress: ProgressTracker,
    ) -> Result<u64, TransferError> {
        let mut session = self.client.connect(endpoint).await?;

        let sent = match session.authenticate(username, password).await {
            Ok(()) => session.send(remote_name, content, progress).await,
            Err(e) => Err(e),
        };

        // The file is delivered once the send succeeds; a failed goodbye is only logged
        if let Err(e) = session.close().await {
            tracing::warn!(destination = %endpoint, error = %e, "Failed to close transfer session");
        }
        sent
    }
}

enum ArtifactResult {
    Skipped(SkipRecord),
    Attempted(Vec<TransferAttempt>),
}

fn attempt(
    artifact: &str,
    destination: &TransferDestination,
    outcome: TransferOutcome,
) -> TransferAttempt {
    TransferAttempt {
        artifact: artifact.to_string(),
        destination_id: destination.id,
        endpoint: destination.endpoint(),
        outcome,
    }
}
