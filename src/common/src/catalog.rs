//! Relational catalog of export definitions, transfer destinations and routes.

mod cells;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{query, Column, Executor, PgPool, Row, SqlitePool, Statement, TypeInfo};

use crate::error::RelayError;
use crate::model::{ExportDefinition, ResultSet, Route, TransferDestination};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    #[error("export definition {0} does not exist")]
    DefinitionNotFound(i64),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Access to the export catalog for the duration of one pass.
#[async_trait]
pub trait ExportCatalog: Send + Sync {
    /// Active export definitions in catalog order.
    async fn active_definitions(&self) -> Result<Vec<ExportDefinition>, CatalogError>;

    /// Run the export query of a definition.
    async fn fetch_rows(&self, definition: &ExportDefinition) -> Result<ResultSet, CatalogError>;

    /// Store the export time and the filename written, as one update keyed by id.
    async fn record_export(
        &self,
        definition_id: i64,
        exported_at: DateTime<Utc>,
        filename: &str,
    ) -> Result<(), CatalogError>;

    /// Eligible routes ordered by ascending priority.
    async fn eligible_routes(&self) -> Result<Vec<Route>, CatalogError>;

    /// Release the underlying connections.
    async fn close(&self) {}
}

/// Opens a catalog at the start of each pass.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn ExportCatalog>, RelayError>;
}

/// Provider connecting a fresh [`SqlCatalog`] per pass.
#[derive(Debug, Clone)]
pub struct SqlCatalogProvider {
    dsn: Option<String>,
    max_connections: u32,
}

impl SqlCatalogProvider {
    pub fn new(dsn: Option<String>, max_connections: u32) -> Self {
        Self {
            dsn,
            max_connections,
        }
    }
}

#[async_trait]
impl CatalogProvider for SqlCatalogProvider {
    async fn open(&self) -> Result<Arc<dyn ExportCatalog>, RelayError> {
        let dsn = self
            .dsn
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RelayError::config("database.dsn is not set"))?;
        let catalog = SqlCatalog::connect(dsn, self.max_connections)
            .await
            .map_err(|e| RelayError::connection("catalog", e))?;
        Ok(Arc::new(catalog))
    }
}

/// Catalog backed by PostgreSQL or SQLite.
#[derive(Clone, Debug)]
pub enum SqlCatalog {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl SqlCatalog {
    /// Connect and create the catalog tables if they do not exist.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, CatalogError> {
        tracing::debug!(backend = backend_name(dsn), "Connecting to catalog database");

        let catalog = if dsn.starts_with("sqlite:") {
            let options = SqlitePoolOptions::new();
            // Every connection to an in-memory database sees its own database
            let options = if dsn.contains(":memory:") || dsn.contains("mode=memory") {
                options
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                options.max_connections(max_connections.max(1))
            };
            let dsn = if dsn.contains(":memory:") || dsn.contains("mode=") {
                dsn.to_string()
            } else if dsn.contains('?') {
                format!("{dsn}&mode=rwc")
            } else {
                format!("{dsn}?mode=rwc")
            };
            SqlCatalog::Sqlite(options.connect(&dsn).await?)
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect(dsn)
                .await?;
            SqlCatalog::Postgres(pool)
        };

        catalog.init().await?;
        tracing::debug!("Catalog schema initialized");
        Ok(catalog)
    }

    async fn init(&self) -> Result<(), sqlx::Error> {
        match self {
            SqlCatalog::Sqlite(pool) => {
                query(
                    r#"
                CREATE TABLE IF NOT EXISTS export_tables (
                    export_table_id INTEGER PRIMARY KEY,
                    schema_name TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    csv_file_name TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    last_exported_at TEXT
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    r#"
                CREATE TABLE IF NOT EXISTS transfer_servers (
                    transfer_server_id INTEGER PRIMARY KEY,
                    host TEXT NOT NULL,
                    port INTEGER NOT NULL DEFAULT 21,
                    protocol TEXT NOT NULL DEFAULT 'FTP',
                    username_secret_name TEXT NOT NULL,
                    password_secret_name TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    r#"
                CREATE TABLE IF NOT EXISTS export_table_routes (
                    export_table_id INTEGER NOT NULL REFERENCES export_tables(export_table_id),
                    transfer_server_id INTEGER NOT NULL REFERENCES transfer_servers(transfer_server_id),
                    priority INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    PRIMARY KEY (export_table_id, transfer_server_id)
                )"#,
                )
                .execute(pool)
                .await?;
            }
            SqlCatalog::Postgres(pool) => {
                query(
                    r#"
                CREATE TABLE IF NOT EXISTS export_tables (
                    export_table_id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    schema_name TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    csv_file_name TEXT,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    last_exported_at TIMESTAMPTZ
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    r#"
                CREATE TABLE IF NOT EXISTS transfer_servers (
                    transfer_server_id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    host TEXT NOT NULL,
                    port INT NOT NULL DEFAULT 21,
                    protocol TEXT NOT NULL DEFAULT 'FTP',
                    username_secret_name TEXT NOT NULL,
                    password_secret_name TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    r#"
                CREATE TABLE IF NOT EXISTS export_table_routes (
                    export_table_id BIGINT NOT NULL REFERENCES export_tables(export_table_id),
                    transfer_server_id BIGINT NOT NULL REFERENCES transfer_servers(transfer_server_id),
                    priority INT NOT NULL DEFAULT 0,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    PRIMARY KEY (export_table_id, transfer_server_id)
                )"#,
                )
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// SQLite pool, when the catalog is SQLite-backed.
    pub fn sqlite_pool(&self) -> Option<&SqlitePool> {
        match self {
            SqlCatalog::Sqlite(pool) => Some(pool),
            SqlCatalog::Postgres(_) => None,
        }
    }
}

#[async_trait]
impl ExportCatalog for SqlCatalog {
    async fn active_definitions(&self) -> Result<Vec<ExportDefinition>, CatalogError> {
        match self {
            SqlCatalog::Sqlite(pool) => {
                let rows = query(
                    r#"
                SELECT export_table_id, schema_name, table_name, csv_file_name, last_exported_at
                FROM export_tables
                WHERE is_active = 1
                ORDER BY export_table_id
                "#,
                )
                .fetch_all(pool)
                .await?;

                let mut definitions = Vec::with_capacity(rows.len());
                for row in rows {
                    let last_exported_at: Option<String> = row.try_get("last_exported_at")?;
                    let last_exported_at = last_exported_at
                        .map(|ts| {
                            DateTime::parse_from_rfc3339(&ts)
                                .map(|ts| ts.with_timezone(&Utc))
                                .map_err(|_| sqlx::Error::Decode("Invalid timestamp format".into()))
                        })
                        .transpose()?;
                    definitions.push(ExportDefinition {
                        id: row.try_get("export_table_id")?,
                        schema_name: row.try_get("schema_name")?,
                        table_name: row.try_get("table_name")?,
                        filename: row.try_get("csv_file_name")?,
                        is_active: true,
                        last_exported_at,
                    });
                }
                Ok(definitions)
            }
            SqlCatalog::Postgres(pool) => {
                let rows = query(
                    r#"
                SELECT export_table_id, schema_name, table_name, csv_file_name, last_exported_at
                FROM export_tables
                WHERE is_active
                ORDER BY export_table_id
                "#,
                )
                .fetch_all(pool)
                .await?;

                let mut definitions = Vec::with_capacity(rows.len());
                for row in rows {
                    definitions.push(ExportDefinition {
                        id: row.try_get("export_table_id")?,
                        schema_name: row.try_get("schema_name")?,
                        table_name: row.try_get("table_name")?,
                        filename: row.try_get("csv_file_name")?,
                        is_active: true,
                        last_exported_at: row.try_get("last_exported_at")?,
                    });
                }
                Ok(definitions)
            }
        }
    }

    async fn fetch_rows(&self, definition: &ExportDefinition) -> Result<ResultSet, CatalogError> {
        let table = qualified_table(&definition.schema_name, &definition.table_name)?;
        let sql = format!("SELECT * FROM {table}");

        match self {
            SqlCatalog::Sqlite(pool) => {
                let statement = pool.prepare(&sql).await?;
                let columns = statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                let rows = statement.query().fetch_all(pool).await?;
                cells::sqlite_result_set(columns, &rows)
            }
            SqlCatalog::Postgres(pool) => {
                let statement = pool.prepare(&sql).await?;
                let typed: Vec<(String, String)> = statement
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
                    .collect();
                let rows = if typed
                    .iter()
                    .all(|(_, type_name)| cells::postgres_renders_natively(type_name))
                {
                    statement.query().fetch_all(pool).await?
                } else {
                    let projected = cells::postgres_text_projection(&typed, &table)?;
                    query(&projected).fetch_all(pool).await?
                };
                let columns = typed.into_iter().map(|(name, _)| name).collect();
                cells::postgres_result_set(columns, &rows)
            }
        }
    }

    async fn record_export(
        &self,
        definition_id: i64,
        exported_at: DateTime<Utc>,
        filename: &str,
    ) -> Result<(), CatalogError> {
        let result = match self {
            SqlCatalog::Sqlite(pool) => {
                let stmt = r#"
                UPDATE export_tables SET last_exported_at = ?, csv_file_name = ?
                WHERE export_table_id = ?
                "#;
                query(stmt)
                    .bind(exported_at.to_rfc3339())
                    .bind(filename)
                    .bind(definition_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            SqlCatalog::Postgres(pool) => {
                let stmt = r#"
                UPDATE export_tables SET last_exported_at = $1, csv_file_name = $2
                WHERE export_table_id = $3
                "#;
                query(stmt)
                    .bind(exported_at)
                    .bind(filename)
                    .bind(definition_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if result == 0 {
            return Err(CatalogError::DefinitionNotFound(definition_id));
        }
        Ok(())
    }

    async fn eligible_routes(&self) -> Result<Vec<Route>, CatalogError> {
        let rows = match self {
            SqlCatalog::Sqlite(pool) => {
                let rows = query(
                    r#"
                SELECT et.export_table_id, et.csv_file_name, r.priority,
                       ts.transfer_server_id, ts.host, ts.port, ts.protocol,
                       ts.username_secret_name, ts.password_secret_name
                FROM export_tables AS et
                JOIN export_table_routes AS r ON et.export_table_id = r.export_table_id
                JOIN transfer_servers AS ts ON r.transfer_server_id = ts.transfer_server_id
                WHERE et.is_active = 1 AND r.is_active = 1 AND ts.is_active = 1
                  AND et.csv_file_name IS NOT NULL
                ORDER BY r.priority, et.export_table_id, ts.transfer_server_id
                "#,
                )
                .fetch_all(pool)
                .await?;

                let mut routes = Vec::with_capacity(rows.len());
                for row in rows {
                    let port: i64 = row.try_get("port")?;
                    routes.push(route_from_parts(
                        row.try_get("export_table_id")?,
                        row.try_get("csv_file_name")?,
                        decode_priority(row.try_get("priority")?)?,
                        TransferDestination {
                            id: row.try_get("transfer_server_id")?,
                            host: row.try_get("host")?,
                            port: decode_port(port)?,
                            protocol: row.try_get("protocol")?,
                            username_secret: row.try_get("username_secret_name")?,
                            password_secret: row.try_get("password_secret_name")?,
                        },
                    ));
                }
                routes
            }
            SqlCatalog::Postgres(pool) => {
                let rows = query(
                    r#"
                SELECT et.export_table_id, et.csv_file_name, r.priority,
                       ts.transfer_server_id, ts.host, ts.port, ts.protocol,
                       ts.username_secret_name, ts.password_secret_name
                FROM export_tables AS et
                JOIN export_table_routes AS r ON et.export_table_id = r.export_table_id
                JOIN transfer_servers AS ts ON r.transfer_server_id = ts.transfer_server_id
                WHERE et.is_active AND r.is_active AND ts.is_active
                  AND et.csv_file_name IS NOT NULL
                ORDER BY r.priority, et.export_table_id, ts.transfer_server_id
                "#,
                )
                .fetch_all(pool)
                .await?;

                let mut routes = Vec::with_capacity(rows.len());
                for row in rows {
                    let port: i32 = row.try_get("port")?;
                    routes.push(route_from_parts(
                        row.try_get("export_table_id")?,
                        row.try_get("csv_file_name")?,
                        row.try_get("priority")?,
                        TransferDestination {
                            id: row.try_get("transfer_server_id")?,
                            host: row.try_get("host")?,
                            port: decode_port(port.into())?,
                            protocol: row.try_get("protocol")?,
                            username_secret: row.try_get("username_secret_name")?,
                            password_secret: row.try_get("password_secret_name")?,
                        },
                    ));
                }
                routes
            }
        };
        Ok(rows)
    }

    async fn close(&self) {
        match self {
            SqlCatalog::Sqlite(pool) => pool.close().await,
            SqlCatalog::Postgres(pool) => pool.close().await,
        }
    }
}

fn route_from_parts(
    export_table_id: i64,
    filename: String,
    priority: i32,
    destination: TransferDestination,
) -> Route {
    Route {
        export_table_id,
        filename,
        priority,
        destination,
    }
}

fn decode_port(port: i64) -> Result<u16, sqlx::Error> {
    u16::try_from(port).map_err(|_| sqlx::Error::Decode(format!("Invalid port {port}").into()))
}

fn decode_priority(priority: i64) -> Result<i32, sqlx::Error> {
    i32::try_from(priority)
        .map_err(|_| sqlx::Error::Decode(format!("Invalid priority {priority}").into()))
}

fn backend_name(dsn: &str) -> &'static str {
    if dsn.starts_with("sqlite:") {
        "sqlite"
    } else {
        "postgres"
    }
}

/// Quote an identifier for use in generated SQL.
fn quote_identifier(identifier: &str) -> Result<String, CatalogError> {
    if identifier.trim().is_empty() || identifier.contains('\0') {
        return Err(CatalogError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(format!("\"{}\"", identifier.replace('"', "\"\"")))
}

/// `"schema"."table"`, or just `"table"` when no schema is set.
pub fn qualified_table(schema: &str, table: &str) -> Result<String, CatalogError> {
    let table = quote_identifier(table)?;
    if schema.trim().is_empty() {
        Ok(table)
    } else {
        Ok(format!("{}.{}", quote_identifier(schema)?, table))
    }
}
