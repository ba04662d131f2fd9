//! Endpoints of the message channel.

use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::debug;

use super::message::{ProcessEvent, WorkerCommand, WorkerEvent, WorkerRequest};
use crate::error::ChannelError;
use crate::process::{Process, ProcessData};

/// Client-side slot holding the sender of the currently active worker.
///
/// Empty until a worker is attached; cleared on detach or when the worker's
/// receiver turns out to be closed.
#[derive(Debug, Default)]
pub struct WorkerLink {
    tx: RwLock<Option<mpsc::Sender<WorkerCommand>>>,
}

impl WorkerLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous one.
    pub async fn attach(&self, tx: mpsc::Sender<WorkerCommand>) {
        *self.tx.write().await = Some(tx);
    }

    /// Drop the worker's sender. Returns `true` if one was attached.
    pub async fn detach(&self) -> bool {
        self.tx.write().await.take().is_some()
    }

    pub async fn is_active(&self) -> bool {
        self.tx
            .read()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver a command to the active worker.
    pub async fn send(&self, command: WorkerCommand) -> Result<(), ChannelError> {
        let name = command.name();
        let Some(tx) = self.tx.read().await.clone() else {
            return Err(ChannelError::WorkerNotActive { message: name });
        };

        if tx.send(command).await.is_err() {
            let mut slot = self.tx.write().await;
            if slot.as_ref().is_some_and(|current| current.same_channel(&tx)) {
                *slot = None;
            }
            debug!(message = name, "Worker receiver closed; link cleared");
            return Err(ChannelError::WorkerNotActive { message: name });
        }
        Ok(())
    }
}

/// Worker-side handle for notifying the client and querying its store.
#[derive(Debug, Clone)]
pub struct ClientLink {
    tx: mpsc::Sender<WorkerEvent>,
    request_timeout: Duration,
}

impl ClientLink {
    pub fn new(tx: mpsc::Sender<WorkerEvent>, request_timeout: Duration) -> Self {
        Self {
            tx,
            request_timeout,
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, event: ProcessEvent) -> Result<(), ChannelError> {
        self.tx
            .send(WorkerEvent::Notify(event))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Current kind and payload of a process, `None` if the client has no record.
    pub async fn request_process_data(
        &self,
        process_id: &str,
    ) -> Result<Option<ProcessData>, ChannelError> {
        let process_id = process_id.to_string();
        self.request(|reply| WorkerRequest::ProcessData { process_id, reply })
            .await
    }

    /// Every persisted process.
    pub async fn request_all_processes(&self) -> Result<Vec<Process>, ChannelError> {
        self.request(|reply| WorkerRequest::AllProcesses { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkerRequest,
    ) -> Result<T, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = build(reply_tx);
        let name = request.name();

        let round_trip = async {
            self.tx
                .send(WorkerEvent::Request(request))
                .await
                .map_err(|_| ChannelError::Closed)?;
            reply_rx
                .await
                .map_err(|_| ChannelError::ReplyDropped { request: name })
        };

        tokio::time::timeout(self.request_timeout, round_trip)
            .await
            .map_err(|_| ChannelError::RequestTimedOut {
                request: name,
                timeout: self.request_timeout,
            })?
    }
}
