use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that inspect configuration without running a pass
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Run passes on the configured schedule (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging; `RUST_LOG` takes precedence over the CLI flags
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(&redacted(config))
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let config = redacted(config);
            println!("snaprelay configuration:");
            println!("========================");
            println!(
                "Database DSN: {}",
                config.database.dsn.as_deref().unwrap_or("<unset>")
            );
            println!(
                "Storage DSN: {}",
                config.storage.dsn.as_deref().unwrap_or("<unset>")
            );
            if let Some(prefix) = &config.storage.prefix {
                println!("Storage prefix: {prefix}");
            }
            println!(
                "Retention: enabled={} max_age={:?} dry_run={}",
                config.retention.enabled, config.retention.max_age, config.retention.dry_run
            );
            println!(
                "Export: enabled={} max_concurrency={}",
                config.export.enabled, config.export.max_concurrency
            );
            println!(
                "Dispatch: enabled={} max_concurrency={} transfer_timeout={:?}",
                config.dispatch.enabled,
                config.dispatch.max_concurrency,
                config.dispatch.transfer_timeout
            );
            println!(
                "Schedule: every {:?}, run on startup: {}",
                config.schedule.interval, config.schedule.run_on_startup
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration");

        let problems = config.validate();
        if !problems.is_empty() {
            for problem in &problems {
                tracing::error!(error = %problem, "Invalid configuration");
            }
            anyhow::bail!("configuration has {} problem(s)", problems.len());
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require running passes
    pub async fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
    ) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }

    /// Copy of the configuration with DSN passwords masked
    pub fn redacted(config: &Configuration) -> Configuration {
        let mut config = config.clone();
        config.database.dsn = config.database.dsn.as_deref().map(mask_password);
        config.storage.dsn = config.storage.dsn.as_deref().map(mask_password);
        config
    }

    fn mask_password(dsn: &str) -> String {
        match url::Url::parse(dsn) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            _ => dsn.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_common_commands_default() {
        assert!(matches!(CommonCommands::default(), CommonCommands::Start));
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_redacted_masks_dsn_passwords() {
        let mut config = Configuration::default();
        config.database.dsn = Some("postgres://relay:hunter2@db:5432/relay".to_string());
        config.storage.dsn = Some("memory://".to_string());

        let redacted = utils::redacted(&config);
        let dsn = redacted.database.dsn.unwrap();
        assert!(!dsn.contains("hunter2"));
        assert!(dsn.contains("****"));
        assert_eq!(redacted.storage.dsn.as_deref(), Some("memory://"));
    }
}
