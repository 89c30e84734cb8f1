use std::sync::Arc;

use chrono::Utc;
use common::catalog::{CatalogProvider, ExportCatalog, SqlCatalogProvider};
use common::config::Configuration;
use common::error::RelayError;
use common::storage::ArtifactStore;
use dispatcher::progress::ProgressCallback;
use dispatcher::{Dispatcher, EnvSecretResolver, FtpTransferClient, SecretResolver, TransferClient};
use exporter::{ExportCoordinator, RetentionManager};
use tokio_util::sync::CancellationToken;

use crate::report::{PassReport, PhaseOutcome};

/// Runs retention, export and dispatch in sequence.
///
/// Every collaborator is injected; [`Orchestrator::from_config`] wires the
/// production implementations.
pub struct Orchestrator {
    config: Configuration,
    store: Result<ArtifactStore, RelayError>,
    catalogs: Arc<dyn CatalogProvider>,
    secrets: Arc<dyn SecretResolver>,
    client: Arc<dyn TransferClient>,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// `store` is a `Result` so a misconfigured store skips only the phases needing it.
    pub fn new(
        config: Configuration,
        store: Result<ArtifactStore, RelayError>,
        catalogs: Arc<dyn CatalogProvider>,
        secrets: Arc<dyn SecretResolver>,
        client: Arc<dyn TransferClient>,
    ) -> Self {
        Self {
            config,
            store,
            catalogs,
            secrets,
            client,
            progress: None,
        }
    }

    pub fn from_config(config: Configuration) -> Self {
        let store = ArtifactStore::from_config(&config.storage);
        if let Err(e) = &store {
            tracing::warn!(error = %e, "Object store unavailable");
        }
        let catalogs = SqlCatalogProvider::new(
            config.database.dsn.clone(),
            config.database.max_connections,
        );
        let secrets = EnvSecretResolver::from_config(&config.secrets);
        let client = FtpTransferClient::from_config(&config.dispatch);

        Self::new(
            config,
            store,
            Arc::new(catalogs),
            Arc::new(secrets),
            Arc::new(client),
        )
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run one pass. Failures end up in the report, never as an error.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> PassReport {
        let started_at = Utc::now();
        tracing::info!("Starting pass");

        let retention = self.run_retention().await;

        let needs_catalog = self.config.export.enabled || self.config.dispatch.enabled;
        let catalog = match (&self.store, needs_catalog) {
            (_, false) => None,
            (Err(e), true) => Some(Err(e.clone())),
            (Ok(_), true) => Some(self.catalogs.open().await),
        };

        let export = self.run_export(catalog.as_ref(), cancel).await;
        let dispatch = self.run_dispatch(catalog.as_ref(), cancel).await;

        if let Some(Ok(catalog)) = &catalog {
            catalog.close().await;
            tracing::debug!("Catalog closed");
        }

        let report = PassReport {
            started_at,
            finished_at: Utc::now(),
            retention,
            export,
            dispatch,
        };
        report.log();
        report
    }

    async fn run_retention(&self) -> PhaseOutcome<exporter::PruneReport> {
        if !self.config.retention.enabled {
            return PhaseOutcome::Disabled;
        }
        let store = match &self.store {
            Ok(store) => store.clone(),
            Err(e) => return PhaseOutcome::Skipped(e.clone()),
        };

        let manager = RetentionManager::new(store, &self.config.retention);
        match manager.prune(self.config.retention.max_age).await {
            Ok(report) => {
                report.log();
                PhaseOutcome::Completed(report)
            }
            Err(e) => PhaseOutcome::Skipped(e),
        }
    }

    async fn run_export(
        &self,
        catalog: Option<&Result<Arc<dyn ExportCatalog>, RelayError>>,
        cancel: &CancellationToken,
    ) -> PhaseOutcome<exporter::ExportReport> {
        if !self.config.export.enabled {
            return PhaseOutcome::Disabled;
        }
        let (store, catalog) = match self.dependencies(catalog) {
            Ok(deps) => deps,
            Err(e) => return PhaseOutcome::Skipped(e),
        };

        let coordinator = ExportCoordinator::new(
            catalog,
            store,
            &self.config.database,
            &self.config.export,
        );
        match coordinator.run_exports(cancel).await {
            Ok(report) => {
                report.log();
                PhaseOutcome::Completed(report)
            }
            Err(e) => PhaseOutcome::Skipped(e),
        }
    }

    async fn run_dispatch(
        &self,
        catalog: Option<&Result<Arc<dyn ExportCatalog>, RelayError>>,
        cancel: &CancellationToken,
    ) -> PhaseOutcome<dispatcher::DispatchReport> {
        if !self.config.dispatch.enabled {
            return PhaseOutcome::Disabled;
        }
        let (store, catalog) = match self.dependencies(catalog) {
            Ok(deps) => deps,
            Err(e) => return PhaseOutcome::Skipped(e),
        };

        let mut dispatcher = Dispatcher::new(
            catalog,
            store,
            self.secrets.clone(),
            self.client.clone(),
            &self.config.dispatch,
        );
        if let Some(progress) = &self.progress {
            dispatcher = dispatcher.with_progress(progress.clone());
        }

        match dispatcher.dispatch(cancel).await {
            Ok(report) => {
                report.log();
                PhaseOutcome::Completed(report)
            }
            Err(e) => PhaseOutcome::Skipped(e),
        }
    }

    fn dependencies(
        &self,
        catalog: Option<&Result<Arc<dyn ExportCatalog>, RelayError>>,
    ) -> Result<(ArtifactStore, Arc<dyn ExportCatalog>), RelayError> {
        let store = self.store.clone()?;
        match catalog {
            Some(Ok(catalog)) => Ok((store, catalog.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Err(RelayError::config("catalog was not opened")),
        }
    }
}
