//! Error taxonomy shared by every phase of a pass.

use thiserror::Error;

/// Errors surfaced by the retention, export and dispatch phases.
///
/// Per-item failures never abort a phase; they are carried in the phase
/// reports. Only `Config` and `Connection` end a phase early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Required configuration is missing or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// A store or catalog could not be reached
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// One definition export or one artifact/destination transfer failed
    #[error("{subject}: {message}")]
    Item { subject: String, message: String },

    /// The artifact was written but the catalog bookkeeping was not updated
    #[error("artifact {filename} written but bookkeeping for definition {definition_id} is stale: {message}")]
    Desync {
        definition_id: i64,
        filename: String,
        message: String,
    },
}

impl RelayError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn item(subject: impl Into<String>, message: impl ToString) -> Self {
        Self::Item {
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    /// Short kind label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::Connection { .. } => "connection",
            RelayError::Item { .. } => "item",
            RelayError::Desync { .. } => "desync",
        }
    }
}
