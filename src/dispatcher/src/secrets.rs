//! Lookup of transfer credentials by secret name.

use std::collections::HashMap;

use async_trait::async_trait;
use common::config::SecretsConfig;

/// Resolves a secret name to its value.
///
/// A missing or blank secret resolves to `None`.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
///
/// With a prefix of `FTP_`, the secret `PARTNER_PASSWORD` is read from
/// `FTP_PARTNER_PASSWORD`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretResolver {
    prefix: Option<String>,
}

impl EnvSecretResolver {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn from_config(config: &SecretsConfig) -> Self {
        Self::new(config.prefix.clone())
    }

    fn variable_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, name: &str) -> Option<String> {
        let variable = self.variable_name(name);
        match std::env::var(&variable) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => {
                tracing::debug!(secret = %variable, "Secret not found in environment");
                None
            }
        }
    }
}

/// Fixed set of secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapSecretResolver {
    secrets: HashMap<String, String>,
}

impl MapSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl FromIterator<(String, String)> for MapSecretResolver {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            secrets: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SecretResolver for MapSecretResolver {
    async fn resolve(&self, name: &str) -> Option<String> {
        self.secrets
            .get(name)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }
}
