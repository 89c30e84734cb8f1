//! Transfer protocol clients.
//!
//! A [`TransferClient`] opens one [`TransferSession`] per artifact and
//! destination. The FTP implementation drives the blocking `suppaftp` stream
//! on tokio's blocking pool.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::config::DispatchConfig;
use common::model::Endpoint;
use suppaftp::FtpStream;
use suppaftp::types::FileType;

use crate::progress::{ProgressReader, ProgressTracker};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Authenticate(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("close failed: {0}")]
    Close(String),

    #[error("session is no longer usable")]
    SessionLost,
}

/// Opens sessions to remote destinations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn TransferSession>, TransferError>;
}

/// An open connection to one destination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferSession: Send {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TransferError>;

    /// Store `content` under `remote_name`, returning the number of bytes sent.
    async fn send(
        &mut self,
        remote_name: &str,
        content: Bytes,
        progress: ProgressTracker,
    ) -> Result<u64, TransferError>;

    async fn close(&mut self) -> Result<(), TransferError>;
}

/// FTP client in binary transfer mode.
#[derive(Debug, Clone)]
pub struct FtpTransferClient {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl FtpTransferClient {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.connect_timeout, config.transfer_timeout)
    }

    async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, TransferError> {
        tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| TransferError::Connect(format!("cannot resolve {}: {e}", endpoint.host)))?
            .next()
            .ok_or_else(|| TransferError::Connect(format!("no address for {}", endpoint.host)))
    }
}

#[async_trait]
impl TransferClient for FtpTransferClient {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransferSession>, TransferError> {
        if !endpoint.protocol.eq_ignore_ascii_case("ftp") {
            return Err(TransferError::UnsupportedProtocol(endpoint.protocol.clone()));
        }

        let addr = Self::resolve(endpoint).await?;
        let connect_timeout = self.connect_timeout;
        let io_timeout = self.io_timeout;

        tracing::debug!(endpoint = %endpoint, %addr, "Connecting to FTP server");
        let stream = tokio::task::spawn_blocking(move || {
            let stream = FtpStream::connect_timeout(addr, connect_timeout)
                .map_err(|e| TransferError::Connect(e.to_string()))?;
            stream
                .get_ref()
                .set_read_timeout(Some(io_timeout))
                .and_then(|()| stream.get_ref().set_write_timeout(Some(io_timeout)))
                .map_err(|e| TransferError::Connect(e.to_string()))?;
            Ok::<_, TransferError>(stream)
        })
        .await
        .map_err(|e| TransferError::Connect(e.to_string()))??;

        Ok(Box::new(FtpSession {
            stream: Some(stream),
        }))
    }
}

struct FtpSession {
    stream: Option<FtpStream>,
}

impl FtpSession {
    /// Run a blocking operation on the stream, handing it back afterwards.
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T, TransferError> + Send + 'static,
    {
        let mut stream = self.stream.take().ok_or(TransferError::SessionLost)?;
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|_| TransferError::SessionLost)?;
        self.stream = Some(stream);
        result
    }
}

#[async_trait]
impl TransferSession for FtpSession {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TransferError> {
        let username = username.to_string();
        let password = password.to_string();
        self.with_stream(move |stream| {
            stream
                .login(username.as_str(), password.as_str())
                .map_err(|e| TransferError::Authenticate(e.to_string()))?;
            stream
                .transfer_type(FileType::Binary)
                .map_err(|e| TransferError::Authenticate(e.to_string()))
        })
        .await
    }

    async fn send(
        &mut self,
        remote_name: &str,
        content: Bytes,
        progress: ProgressTracker,
    ) -> Result<u64, TransferError> {
        let remote_name = remote_name.to_string();
        self.with_stream(move |stream| {
            let mut reader = ProgressReader::new(Cursor::new(content), progress);
            stream
                .put_file(remote_name.as_str(), &mut reader)
                .map_err(|e| TransferError::Send(e.to_string()))
        })
        .await
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        let result = self
            .with_stream(|stream| stream.quit().map_err(|e| TransferError::Close(e.to_string())))
            .await;
        self.stream = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_protocol_is_rejected_before_connecting() {
        let client = FtpTransferClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let endpoint = Endpoint {
            host: "sftp.example.invalid".to_string(),
            port: 22,
            protocol: "SFTP".to_string(),
        };

        let result = client.connect(&endpoint).await;
        assert!(matches!(
            result,
            Err(TransferError::UnsupportedProtocol(protocol)) if protocol == "SFTP"
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        // Bind then drop a listener to get a local port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = FtpTransferClient::new(Duration::from_secs(2), Duration::from_secs(2));
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            protocol: "ftp".to_string(),
        };

        let result = client.connect(&endpoint).await;
        assert!(matches!(result, Err(TransferError::Connect(_))));
    }

    #[test]
    fn test_error_messages_name_the_step() {
        assert!(
            TransferError::Authenticate("530 Login incorrect".into())
                .to_string()
                .starts_with("authentication failed")
        );
        assert!(TransferError::Send("timed out".into()).to_string().starts_with("send failed"));
    }
}
