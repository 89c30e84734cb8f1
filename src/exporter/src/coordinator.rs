//! Export of active catalog definitions into CSV artifacts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::catalog::ExportCatalog;
use common::config::{DatabaseConfig, ExportConfig};
use common::error::RelayError;
use common::model::ExportDefinition;
use common::storage::ArtifactStore;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::filename::derive_filename;

/// Step of an export that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Query,
    Serialize,
    Write,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Query => "query",
            ExportStage::Serialize => "serialize",
            ExportStage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Exported {
        filename: String,
        rows: usize,
        bytes: usize,
    },
    Failed {
        stage: ExportStage,
        reason: String,
    },
    /// The artifact was written but the catalog still points at the previous file
    Desynced {
        filename: String,
        reason: String,
    },
    /// The pass was cancelled before this definition started
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub definition_id: i64,
    pub table: String,
    pub status: ExportStatus,
}

impl ExportOutcome {
    /// The outcome as an error, when it is one.
    pub fn error(&self) -> Option<RelayError> {
        match &self.status {
            ExportStatus::Failed { stage, reason } => Some(RelayError::item(
                format!("export {}", self.table),
                format!("{stage} failed: {reason}"),
            )),
            ExportStatus::Desynced { filename, reason } => Some(RelayError::Desync {
                definition_id: self.definition_id,
                filename: filename.clone(),
                message: reason.clone(),
            }),
            ExportStatus::Exported { .. } | ExportStatus::Cancelled => None,
        }
    }
}

/// Outcomes of one export pass, in definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub outcomes: Vec<ExportOutcome>,
}

impl ExportReport {
    fn count(&self, predicate: impl Fn(&ExportStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }

    pub fn exported(&self) -> usize {
        self.count(|s| matches!(s, ExportStatus::Exported { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ExportStatus::Failed { .. }))
    }

    pub fn desynced(&self) -> usize {
        self.count(|s| matches!(s, ExportStatus::Desynced { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, ExportStatus::Cancelled))
    }

    pub fn fully_succeeded(&self) -> bool {
        self.exported() == self.outcomes.len()
    }

    pub fn log(&self) {
        tracing::info!(
            processed = self.outcomes.len(),
            exported = self.exported(),
            failed = self.failed(),
            desynced = self.desynced(),
            cancelled = self.cancelled(),
            "Export pass completed"
        );
    }
}

/// Exports every active definition to the artifact store.
pub struct ExportCoordinator {
    catalog: Arc<dyn ExportCatalog>,
    store: ArtifactStore,
    query_timeout: Duration,
    max_concurrency: usize,
}

impl ExportCoordinator {
    pub fn new(
        catalog: Arc<dyn ExportCatalog>,
        store: ArtifactStore,
        database: &DatabaseConfig,
        export: &ExportConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            query_timeout: database.query_timeout,
            max_concurrency: export.max_concurrency.max(1),
        }
    }

    /// Export all active definitions, stamping filenames with the current time.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the definition list cannot be read.
    /// Every other failure is reported per definition.
    pub async fn run_exports(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ExportReport, RelayError> {
        self.run_exports_at(Utc::now(), cancel).await
    }

    /// Export all active definitions as of `now`.
    pub async fn run_exports_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ExportReport, RelayError> {
        let definitions = self
            .catalog
            .active_definitions()
            .await
            .map_err(|e| RelayError::connection("catalog", e))?;

        tracing::debug!(
            definitions = definitions.len(),
            max_concurrency = self.max_concurrency,
            "Starting export pass"
        );

        let mut outcomes: Vec<(usize, ExportOutcome)> =
            stream::iter(definitions.into_iter().enumerate())
                .map(|(idx, definition)| async move {
                    (idx, self.export_one(definition, now, cancel).await)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        Ok(ExportReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        })
    }

    async fn export_one(
        &self,
        definition: ExportDefinition,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ExportOutcome {
        let table = definition.qualified_name();
        let status = if cancel.is_cancelled() {
            tracing::info!(definition_id = definition.id, table = %table, "Export cancelled");
            ExportStatus::Cancelled
        } else {
            self.export_definition(&definition, now).await
        };

        ExportOutcome {
            definition_id: definition.id,
            table,
            status,
        }
    }

    async fn export_definition(
        &self,
        definition: &ExportDefinition,
        now: DateTime<Utc>,
    ) -> ExportStatus {
        let table = definition.qualified_name();
        let failed = |stage: ExportStage, reason: String| {
            tracing::warn!(
                definition_id = definition.id,
                table = %table,
                stage = %stage,
                error = %reason,
                "Export failed"
            );
            ExportStatus::Failed { stage, reason }
        };

        let query = self.catalog.fetch_rows(definition);
        let rows = match tokio::time::timeout(self.query_timeout, query).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return failed(ExportStage::Query, e.to_string()),
            Err(_) => {
                return failed(
                    ExportStage::Query,
                    format!("query timed out after {:?}", self.query_timeout),
                );
            }
        };

        let content = match codec::encode(&rows) {
            Ok(content) => content,
            Err(e) => return failed(ExportStage::Serialize, e.to_string()),
        };

        let filename = derive_filename(definition, now);
        let bytes = content.len();
        if let Err(e) = self.store.put(&filename, content).await {
            return failed(ExportStage::Write, e.to_string());
        }

        if let Err(e) = self
            .catalog
            .record_export(definition.id, now, &filename)
            .await
        {
            let error = RelayError::Desync {
                definition_id: definition.id,
                filename: filename.clone(),
                message: e.to_string(),
            };
            tracing::error!(
                definition_id = definition.id,
                table = %table,
                error = %error,
                "Artifact written but export bookkeeping was not updated"
            );
            return ExportStatus::Desynced {
                filename,
                reason: e.to_string(),
            };
        }

        tracing::info!(
            definition_id = definition.id,
            table = %table,
            filename = %filename,
            rows = rows.row_count(),
            bytes,
            "Exported table"
        );
        ExportStatus::Exported {
            filename,
            rows: rows.row_count(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::catalog::CatalogError;
    use common::model::{ResultSet, Route};
    use common::testing::{InMemoryCatalog, utc};
    use object_store::memory::InMemory;

    fn definition(
        id: i64,
        table: &str,
        filename: Option<&str>,
        is_active: bool,
    ) -> ExportDefinition {
        ExportDefinition {
            id,
            schema_name: "dbo".to_string(),
            table_name: table.to_string(),
            filename: filename.map(str::to_string),
            is_active,
            last_exported_at: None,
        }
    }

    fn orders() -> ResultSet {
        ResultSet::new(vec!["id".into(), "customer".into()])
            .with_row([Some("1"), Some("Ada, Ltd")])
            .with_row([Some("2"), None])
    }

    fn store() -> ArtifactStore {
        ArtifactStore::new(Arc::new(InMemory::new()), None)
    }

    fn coordinator(catalog: Arc<dyn ExportCatalog>, store: ArtifactStore) -> ExportCoordinator {
        ExportCoordinator::new(
            catalog,
            store,
            &DatabaseConfig::default(),
            &ExportConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_export_writes_artifact_and_bookkeeping() {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(
            definition(1, "Orders", Some("Orders_20240101_000000.csv"), true),
            orders(),
        );
        let store = store();
        let now = utc(2024, 2, 1, 12, 0, 0);

        let report = coordinator(Arc::new(catalog.clone()), store.clone())
            .run_exports_at(now, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.fully_succeeded());
        assert!(matches!(
            &report.outcomes[0].status,
            ExportStatus::Exported { filename, rows: 2, .. }
                if filename == "Orders_20240201_120000.csv"
        ));

        let content = store.fetch("Orders_20240201_120000.csv").await.unwrap();
        assert_eq!(codec::decode(&content).unwrap(), orders());

        let updated = catalog.definition(1).unwrap();
        assert_eq!(updated.filename.as_deref(), Some("Orders_20240201_120000.csv"));
        assert_eq!(updated.last_exported_at, Some(now));
    }

    #[tokio::test]
    async fn test_query_failure_does_not_stop_other_definitions() {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(definition(1, "Broken", None, true), orders());
        catalog.add_definition(definition(2, "Orders", None, true), orders());
        catalog.add_definition(definition(3, "Legacy", None, false), orders());
        catalog.fail_query(1);

        let report = coordinator(Arc::new(catalog.clone()), store())
            .run_exports_at(utc(2024, 2, 1, 12, 0, 0), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<i64> = report.outcomes.iter().map(|o| o.definition_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(matches!(
            report.outcomes[0].status,
            ExportStatus::Failed { stage: ExportStage::Query, .. }
        ));
        assert_eq!(report.exported(), 1);
        assert_eq!(report.failed(), 1);
        assert!(catalog.definition(1).unwrap().filename.is_none());
    }

    #[tokio::test]
    async fn test_failed_bookkeeping_is_reported_as_desync() {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(definition(1, "Orders", None, true), orders());
        catalog.fail_update(1);
        let store = store();

        let report = coordinator(Arc::new(catalog), store.clone())
            .run_exports_at(utc(2024, 2, 1, 12, 0, 0), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.desynced(), 1);
        let error = report.outcomes[0].error().unwrap();
        assert_eq!(error.kind(), "desync");
        // The artifact itself was written
        assert!(store.fetch("dbo_Orders_20240201_120000.csv").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(definition(1, "Orders", None, true), orders());
        catalog.add_definition(definition(2, "Customers", None, true), orders());
        let store = store();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = coordinator(Arc::new(catalog.clone()), store.clone())
            .run_exports(&cancel)
            .await
            .unwrap();

        assert_eq!(report.cancelled(), 2);
        assert!(store.list().await.unwrap().is_empty());
        assert!(catalog.recorded_exports().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_definitions_are_a_connection_error() {
        let catalog = InMemoryCatalog::new();
        catalog.set_unavailable(true);

        let result = coordinator(Arc::new(catalog), store())
            .run_exports(&CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Connection { .. })));
    }

    /// Catalog whose export query never finishes in time.
    struct SlowCatalog(InMemoryCatalog);

    #[async_trait]
    impl ExportCatalog for SlowCatalog {
        async fn active_definitions(&self) -> Result<Vec<ExportDefinition>, CatalogError> {
            self.0.active_definitions().await
        }

        async fn fetch_rows(
            &self,
            definition: &ExportDefinition,
        ) -> Result<ResultSet, CatalogError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.0.fetch_rows(definition).await
        }

        async fn record_export(
            &self,
            definition_id: i64,
            exported_at: DateTime<Utc>,
            filename: &str,
        ) -> Result<(), CatalogError> {
            self.0.record_export(definition_id, exported_at, filename).await
        }

        async fn eligible_routes(&self) -> Result<Vec<Route>, CatalogError> {
            self.0.eligible_routes().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_fails_definition() {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(definition(1, "Orders", None, true), orders());

        let report = coordinator(Arc::new(SlowCatalog(catalog)), store())
            .run_exports(&CancellationToken::new())
            .await
            .unwrap();

        match &report.outcomes[0].status {
            ExportStatus::Failed { stage, reason } => {
                assert_eq!(*stage, ExportStage::Query);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }
}
