use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote server artifacts can be transferred to.
///
/// Credentials are referenced by secret name and resolved at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDestination {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub username_secret: String,
    pub password_secret: String,
}

impl TransferDestination {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
        }
    }
}

/// Network address and protocol of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            self.protocol.to_ascii_lowercase(),
            self.host,
            self.port
        )
    }
}

/// An eligible routing rule joined with its destination.
///
/// Only returned when the rule, its export definition and its destination are
/// all active and the definition has a current filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub export_table_id: i64,
    /// Current filename of the export definition (the join key)
    pub filename: String,
    pub priority: i32,
    pub destination: TransferDestination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let destination = TransferDestination {
            id: 1,
            host: "ftp.example.com".to_string(),
            port: 21,
            protocol: "FTP".to_string(),
            username_secret: "FTP_USER".to_string(),
            password_secret: "FTP_PASS".to_string(),
        };
        assert_eq!(
            destination.endpoint().to_string(),
            "ftp://ftp.example.com:21"
        );
    }
}
