//! Request channel into a running guardian.
//!
//! The guardian owns its session, monitor and probe and is driven from a
//! single task. Other tasks talk to it through a [`ControlHandle`]; every
//! request carries a oneshot for the reply, so callers observe the same
//! `Result` the direct call would have returned.

use tokio::sync::{mpsc, oneshot};

use crate::error::{GuardianError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianStatus {
    pub interface: String,
    pub active: bool,
    pub authorized: bool,
    /// Live probe result at the time the status was taken.
    pub interface_up: bool,
}

#[derive(Debug)]
pub enum ControlRequest {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    RequestAuthorization(oneshot::Sender<Result<()>>),
    ClearAuthorization(oneshot::Sender<()>),
    Status(oneshot::Sender<GuardianStatus>),
}

#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

/// Create a handle and the receiver to pass to `AwdlGuardian::run`.
pub fn control_channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<ControlRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ControlHandle { tx }, rx)
}

impl ControlHandle {
    pub async fn start(&self) -> Result<()> {
        self.call(ControlRequest::Start).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(ControlRequest::Stop).await?
    }

    pub async fn request_authorization(&self) -> Result<()> {
        self.call(ControlRequest::RequestAuthorization).await?
    }

    pub async fn clear_authorization(&self) -> Result<()> {
        self.call(ControlRequest::ClearAuthorization).await
    }

    pub async fn status(&self) -> Result<GuardianStatus> {
        self.call(ControlRequest::Status).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ControlRequest) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| GuardianError::ControlClosed)?;
        reply_rx.await.map_err(|_| GuardianError::ControlClosed)
    }
}
