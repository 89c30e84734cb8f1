//! In-process transfer client recording every delivery.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use common::model::Endpoint;

use crate::progress::ProgressTracker;
use crate::transfer::{TransferClient, TransferError, TransferSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub remote_name: String,
    pub content: Bytes,
}

#[derive(Debug, Default)]
struct State {
    deliveries: Vec<Delivery>,
    connects: Vec<Endpoint>,
    unreachable: HashSet<String>,
    rejecting_login: HashSet<String>,
}

/// Transfer client that keeps delivered files in memory.
///
/// Hosts can be marked unreachable (connect fails) or as rejecting logins.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransferClient {
    state: Arc<Mutex<State>>,
}

impl RecordingTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("transfer state poisoned")
    }

    pub fn set_unreachable(&self, host: &str) {
        self.state().unreachable.insert(host.to_string());
    }

    pub fn reject_login(&self, host: &str) {
        self.state().rejecting_login.insert(host.to_string());
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state().deliveries.clone()
    }

    pub fn connects(&self) -> Vec<Endpoint> {
        self.state().connects.clone()
    }
}

#[async_trait]
impl TransferClient for RecordingTransferClient {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransferSession>, TransferError> {
        let mut state = self.state();
        state.connects.push(endpoint.clone());
        if state.unreachable.contains(&endpoint.host) {
            return Err(TransferError::Connect(format!(
                "{endpoint}: connection refused"
            )));
        }
        Ok(Box::new(RecordingSession {
            endpoint: endpoint.clone(),
            username: None,
            state: self.state.clone(),
        }))
    }
}

struct RecordingSession {
    endpoint: Endpoint,
    username: Option<String>,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl TransferSession for RecordingSession {
    async fn authenticate(&mut self, username: &str, _password: &str) -> Result<(), TransferError> {
        let rejected = self
            .state
            .lock()
            .expect("transfer state poisoned")
            .rejecting_login
            .contains(&self.endpoint.host);
        if rejected {
            return Err(TransferError::Authenticate("530 Login incorrect".to_string()));
        }
        self.username = Some(username.to_string());
        Ok(())
    }

    async fn send(
        &mut self,
        remote_name: &str,
        content: Bytes,
        mut progress: ProgressTracker,
    ) -> Result<u64, TransferError> {
        let username = self.username.clone().ok_or(TransferError::SessionLost)?;
        progress.record(content.len());
        let sent = content.len() as u64;
        self.state
            .lock()
            .expect("transfer state poisoned")
            .deliveries
            .push(Delivery {
                host: self.endpoint.host.clone(),
                port: self.endpoint.port,
                username,
                remote_name: remote_name.to_string(),
                content,
            });
        Ok(sent)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}
