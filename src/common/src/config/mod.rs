use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::error::RelayError;

const ENV_PREFIX: &str = "SNAPRELAY__";
const DEFAULT_CONFIG_FILE: &str = "snaprelay.toml";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Catalog DSN (`postgres://...` or `sqlite://...`)
    pub dsn: Option<String>,
    /// Upper bound for a single export query
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            query_timeout: Duration::from_secs(300),
            max_connections: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Object store DSN (`memory://`, `file:///path`, `s3://host/bucket`, `az://account/container`)
    pub dsn: Option<String>,
    /// Optional key prefix inside the bucket or container
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Env: SNAPRELAY__RETENTION__ENABLED
    pub enabled: bool,
    /// Artifacts strictly older than this are deleted.
    ///
    /// Env: SNAPRELAY__RETENTION__MAX_AGE
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Log deletions without executing them.
    ///
    /// Env: SNAPRELAY__RETENTION__DRY_RUN
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: Duration::from_secs(3 * 24 * 3600), // 3 days
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    pub enabled: bool,
    /// Number of definitions exported concurrently
    pub max_concurrency: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub enabled: bool,
    /// Number of artifacts dispatched concurrently
    pub max_concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound for one artifact/destination transfer, including connect
    #[serde(with = "humantime_serde")]
    pub transfer_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 4,
            connect_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(600),
        }
    }
}

/// Secret lookup reads environment variables, optionally namespaced.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub run_on_startup: bool,
    /// Deadline for a single pass; in-flight items finish, queued items are cancelled
    #[serde(with = "humantime_serde", default)]
    pub pass_timeout: Option<Duration>,
}

impl ScheduleConfig {
    /// Settings the scheduler cannot run without.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.interval.is_zero() {
            return Err(RelayError::config("schedule.interval must be positive"));
        }
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            run_on_startup: true,
            pass_timeout: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Relational catalog holding export definitions and routes
    pub database: DatabaseConfig,
    /// Object storage for exported artifacts
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub export: ExportConfig,
    pub dispatch: DispatchConfig,
    pub secrets: SecretsConfig,
    pub schedule: ScheduleConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn database_dsn(&self) -> Result<&str, RelayError> {
        non_blank(self.database.dsn.as_deref())
            .ok_or_else(|| RelayError::config("database.dsn is not set"))
    }

    pub fn storage_dsn(&self) -> Result<&str, RelayError> {
        non_blank(self.storage.dsn.as_deref())
            .ok_or_else(|| RelayError::config("storage.dsn is not set"))
    }

    /// Check everything a full pass needs; returns every problem found.
    pub fn validate(&self) -> Vec<RelayError> {
        let mut problems = Vec::new();
        if let Err(e) = self.database_dsn() {
            problems.push(e);
        }
        if let Err(e) = self.storage_dsn() {
            problems.push(e);
        }
        if self.retention.max_age.is_zero() {
            problems.push(RelayError::config("retention.max_age must be positive"));
        }
        if self.export.max_concurrency == 0 {
            problems.push(RelayError::config("export.max_concurrency must be at least 1"));
        }
        if self.dispatch.max_concurrency == 0 {
            problems.push(RelayError::config(
                "dispatch.max_concurrency must be at least 1",
            ));
        }
        if let Err(e) = self.schedule.validate() {
            problems.push(e);
        }
        problems
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
