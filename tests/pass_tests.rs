use std::sync::Arc;

use common::catalog::{ExportCatalog, SqlCatalog, SqlCatalogProvider};
use common::config::Configuration;
use common::error::RelayError;
use common::storage::{ArtifactStore, create_object_store_from_dsn};
use dispatcher::testing::RecordingTransferClient;
use dispatcher::{MapSecretResolver, TransferOutcome};
use exporter::ExportStatus;
use orchestrator::{Orchestrator, PhaseOutcome};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn seed_catalog(dsn: &str) {
    let catalog = SqlCatalog::connect(dsn, 1).await.unwrap();
    let pool = catalog.sqlite_pool().unwrap();
    for stmt in [
        "CREATE TABLE orders (id INTEGER, customer TEXT, note TEXT)",
        "INSERT INTO orders VALUES (1, 'Ada, Ltd', NULL), (2, 'Bob', 'rush')",
        "INSERT INTO export_tables (export_table_id, schema_name, table_name, csv_file_name, is_active) VALUES (1, 'main', 'orders', NULL, 1)",
        "INSERT INTO transfer_servers (transfer_server_id, host, port, protocol, username_secret_name, password_secret_name, is_active) VALUES (10, 'partner-a', 21, 'FTP', 'A_USER', 'A_PASS', 1)",
        "INSERT INTO transfer_servers (transfer_server_id, host, port, protocol, username_secret_name, password_secret_name, is_active) VALUES (11, 'partner-b', 21, 'FTP', 'B_USER', 'B_PASS', 1)",
        "INSERT INTO export_table_routes (export_table_id, transfer_server_id, priority, is_active) VALUES (1, 11, 2, 1)",
        "INSERT INTO export_table_routes (export_table_id, transfer_server_id, priority, is_active) VALUES (1, 10, 1, 1)",
    ] {
        sqlx::query(stmt).execute(pool).await.unwrap();
    }
    catalog.close().await;
}

fn sqlite_dsn(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("relay.db").display())
}

#[tokio::test]
async fn test_pass_exports_table_and_delivers_it_to_every_partner() {
    let dir = TempDir::new().unwrap();
    let dsn = sqlite_dsn(&dir);
    seed_catalog(&dsn).await;

    let storage_dsn = format!("file://{}", dir.path().join("artifacts").display());
    let store = ArtifactStore::new(create_object_store_from_dsn(&storage_dsn).unwrap(), None);
    let client = RecordingTransferClient::new();
    // partner-b has no password configured
    let secrets = MapSecretResolver::new()
        .with_secret("A_USER", "relay")
        .with_secret("A_PASS", "secret")
        .with_secret("B_USER", "relay");

    let orchestrator = Orchestrator::new(
        Configuration::default(),
        Ok(store.clone()),
        Arc::new(SqlCatalogProvider::new(Some(dsn.clone()), 1)),
        Arc::new(secrets),
        Arc::new(client.clone()),
    );
    let report = orchestrator.run_pass(&CancellationToken::new()).await;

    let export = report.export.report().expect("export ran");
    let ExportStatus::Exported { filename, rows, .. } = &export.outcomes[0].status else {
        panic!("export failed: {:?}", export.outcomes[0]);
    };
    assert!(filename.starts_with("main_orders_"));
    assert!(filename.ends_with(".csv"));
    assert_eq!(*rows, 2);

    let stored = store.fetch(filename).await.unwrap();
    assert_eq!(&stored[..], b"id,customer,note\n1,\"Ada, Ltd\",\n2,Bob,rush\n");

    let dispatch = report.dispatch.report().expect("dispatch ran");
    assert_eq!(dispatch.attempts.len(), 2);
    assert_eq!(dispatch.attempts[0].endpoint.host, "partner-a");
    assert!(dispatch.attempts[0].succeeded());
    assert_eq!(
        dispatch.attempts[1].outcome,
        TransferOutcome::Failed {
            reason: "missing credential".to_string()
        }
    );
    assert!(report.has_errors());

    let deliveries = client.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(&deliveries[0].remote_name, filename);
    assert_eq!(deliveries[0].content, stored);
    assert!(client.connects().iter().all(|e| e.host == "partner-a"));

    let catalog = SqlCatalog::connect(&dsn, 1).await.unwrap();
    let definitions = catalog.active_definitions().await.unwrap();
    assert_eq!(definitions[0].filename.as_ref(), Some(filename));
    assert!(definitions[0].last_exported_at.is_some());
    catalog.close().await;
}

#[tokio::test]
async fn test_pass_from_configuration_without_storage_skips_everything() {
    let dir = TempDir::new().unwrap();
    let mut config = Configuration::default();
    config.database.dsn = Some(sqlite_dsn(&dir));

    let report = Orchestrator::from_config(config)
        .run_pass(&CancellationToken::new())
        .await;

    assert!(matches!(report.retention, PhaseOutcome::Skipped(RelayError::Config(_))));
    assert!(matches!(report.export, PhaseOutcome::Skipped(RelayError::Config(_))));
    assert!(matches!(report.dispatch, PhaseOutcome::Skipped(RelayError::Config(_))));
    assert!(report.has_errors());
}

#[tokio::test]
async fn test_pass_from_configuration_with_empty_catalog() {
    let dir = TempDir::new().unwrap();
    let mut config = Configuration::default();
    config.database.dsn = Some(sqlite_dsn(&dir));
    config.storage.dsn = Some("memory://".to_string());

    let report = Orchestrator::from_config(config)
        .run_pass(&CancellationToken::new())
        .await;

    assert!(report.export.report().unwrap().outcomes.is_empty());
    assert!(report.dispatch.report().unwrap().attempts.is_empty());
    assert!(!report.has_errors());
    assert!(report.to_string().contains("export:"));
}
