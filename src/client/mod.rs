//! Orchestration client: the foreground API over the store and the worker.
//!
//! Every worker notification is written to the store first, then handed to
//! registered listeners, then published on the broadcast stream.

pub mod listeners;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{
    ClientLink, MessageType, ProcessEvent, WorkerCommand, WorkerEvent, WorkerLink, WorkerRequest,
};
use crate::config::OrchestratorConfig;
use crate::error::{ProcessError, Result};
use crate::process::{Process, ProcessFilter, ProcessKind, ProcessResult, ProcessStatus};
use crate::store::ProcessStore;
use crate::worker::{ExecutorRegistry, Worker, WorkerHandle};

pub use listeners::{Listener, ListenerId, ListenerRegistry};

/// State shared between the public API and the inbound event loop.
struct ClientInner {
    store: Arc<dyn ProcessStore>,
    listeners: ListenerRegistry,
    events: broadcast::Sender<ProcessEvent>,
}

/// Public entry point for starting, stopping, listing and deleting processes.
pub struct OrchestratorClient {
    inner: Arc<ClientInner>,
    config: OrchestratorConfig,
    worker: WorkerLink,
    event_tx: mpsc::Sender<WorkerEvent>,
    event_loop: JoinHandle<()>,
}

impl OrchestratorClient {
    /// Create a client and start its inbound event loop. Must be called
    /// within a tokio runtime.
    pub fn new(store: Arc<dyn ProcessStore>, config: OrchestratorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (events, _) = broadcast::channel(config.channel_capacity);
        let inner = Arc::new(ClientInner {
            store,
            listeners: ListenerRegistry::new(),
            events,
        });
        let event_loop = tokio::spawn(run_event_loop(Arc::clone(&inner), event_rx));

        Self {
            inner,
            config,
            worker: WorkerLink::new(),
            event_tx,
            event_loop,
        }
    }

    // ── Worker lifecycle ────────────────────────────────────────────

    /// Start a worker, make it the active one and fire `Sync` so it re-arms
    /// every process persisted as running.
    pub async fn spawn_worker(&self, executors: ExecutorRegistry) -> Result<WorkerHandle> {
        let (command_tx, command_rx) = mpsc::channel(self.config.channel_capacity);
        let link = ClientLink::new(self.event_tx.clone(), self.config.request_timeout);
        let handle = Worker::new(command_rx, link, executors, &self.config).spawn();

        self.worker.attach(command_tx).await;
        self.worker.send(WorkerCommand::Sync).await?;
        info!("Worker attached; sync requested");
        Ok(handle)
    }

    /// Drop the active worker's command sender, tearing its timers down.
    /// Persisted state is untouched.
    pub async fn detach_worker(&self) -> bool {
        let detached = self.worker.detach().await;
        if detached {
            info!("Worker detached");
        }
        detached
    }

    pub async fn is_worker_active(&self) -> bool {
        self.worker.is_active().await
    }

    // ── Processes ───────────────────────────────────────────────────

    /// Persist a new `Pending` process and ask the worker to arm it.
    ///
    /// The process is saved before the worker is contacted, so it exists
    /// even when the send fails with `WorkerNotActive`.
    pub async fn start_process(
        &self,
        id: &str,
        kind: ProcessKind,
        payload: serde_json::Value,
    ) -> Result<Process> {
        if id.trim().is_empty() {
            return Err(ProcessError::InvalidPayload {
                id: id.to_string(),
                reason: "process id must not be empty".into(),
            }
            .into());
        }
        if !payload.is_object() {
            return Err(ProcessError::InvalidPayload {
                id: id.to_string(),
                reason: "payload must be a JSON object".into(),
            }
            .into());
        }

        let process = Process::new(id, kind, payload);
        self.inner.store.save_process(&process).await?;
        info!(process_id = %id, kind = %kind, "Process saved as pending");

        self.worker
            .send(WorkerCommand::Init {
                process_id: process.id.clone(),
                kind,
                payload: process.payload.clone(),
            })
            .await?;
        Ok(process)
    }

    /// Ask the worker to cancel the process's timer. The status becomes
    /// `Stopped` once the worker confirms.
    pub async fn stop_process(&self, id: &str) -> Result<()> {
        self.require_process(id).await?;
        self.worker
            .send(WorkerCommand::Stop {
                process_id: id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Stop (best effort) and delete a process together with its results.
    pub async fn delete_process(&self, id: &str) -> Result<()> {
        self.require_process(id).await?;

        if let Err(e) = self
            .worker
            .send(WorkerCommand::Stop {
                process_id: id.to_string(),
            })
            .await
        {
            warn!(process_id = %id, "Deleting without stopping: {e}");
        }

        if !self.inner.store.delete_process(id).await? {
            return Err(ProcessError::NotFound { id: id.to_string() }.into());
        }
        info!(process_id = %id, "Process deleted");
        Ok(())
    }

    pub async fn list_processes(&self, filter: ProcessFilter) -> Result<Vec<Process>> {
        Ok(self.inner.store.list_processes(filter).await?)
    }

    pub async fn get_process(&self, id: &str) -> Result<Process> {
        self.require_process(id).await
    }

    /// Results newest first, optionally bounded. Unknown ids yield an empty list.
    pub async fn get_results(&self, id: &str, limit: Option<usize>) -> Result<Vec<ProcessResult>> {
        Ok(self.inner.store.list_results(id, limit).await?)
    }

    /// Stop every stored process (best effort), then wipe all stored state.
    ///
    /// Errored, completed and pending processes can still hold a timer, and
    /// once the store is empty nothing could reach it again.
    pub async fn clear_all(&self) -> Result<()> {
        let processes = self
            .inner
            .store
            .list_processes(ProcessFilter::default())
            .await?;

        let stops = processes.iter().map(|p| {
            self.worker.send(WorkerCommand::Stop {
                process_id: p.id.clone(),
            })
        });
        let failed = join_all(stops)
            .await
            .into_iter()
            .filter(|r| r.is_err())
            .count();
        if failed > 0 {
            warn!(failed, "Some processes could not be stopped before clearing");
        }

        self.inner.store.clear_all().await?;
        info!(stopped = processes.len() - failed, "All processes cleared");
        Ok(())
    }

    async fn require_process(&self, id: &str) -> Result<Process> {
        self.inner
            .store
            .get_process(id)
            .await?
            .ok_or_else(|| ProcessError::NotFound { id: id.to_string() }.into())
    }

    // ── Listeners ───────────────────────────────────────────────────

    pub async fn add_listener<F>(&self, message_type: MessageType, listener: F) -> ListenerId
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .add(message_type, Arc::new(listener))
            .await
    }

    pub async fn remove_listener(&self, message_type: MessageType, id: ListenerId) -> bool {
        self.inner.listeners.remove(message_type, id).await
    }

    /// Stream of every applied worker event, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    // ── Settings ────────────────────────────────────────────────────

    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.inner.store.get_setting(key).await?)
    }

    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        Ok(self.inner.store.set_setting(key, value).await?)
    }

    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        Ok(self.inner.store.delete_setting(key).await?)
    }
}

impl Drop for OrchestratorClient {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

// ── Inbound event loop ──────────────────────────────────────────────

async fn run_event_loop(inner: Arc<ClientInner>, mut events: mpsc::Receiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Notify(event) => {
                inner.apply(&event).await;
                inner.listeners.dispatch(&event).await;
                // No subscribers is fine.
                let _ = inner.events.send(event);
            }
            WorkerEvent::Request(request) => inner.answer(request).await,
        }
    }
    debug!("Client event loop finished");
}

impl ClientInner {
    /// Mirror a worker event into the store.
    async fn apply(&self, event: &ProcessEvent) {
        match event {
            ProcessEvent::ProcessStopped { process_id, .. } => {
                self.transition(process_id, ProcessStatus::Stopped, None)
                    .await;
            }
            ProcessEvent::StatusChanged {
                process_id,
                status,
                error_message,
                ..
            } => {
                self.transition(process_id, *status, error_message.as_deref())
                    .await;
            }
            ProcessEvent::ExecutionResult {
                process_id,
                kind,
                data,
                timestamp,
            } => match self.store.get_process(process_id).await {
                Ok(Some(_)) => {
                    if let Err(e) = self
                        .store
                        .append_result(process_id, *kind, data, *timestamp)
                        .await
                    {
                        error!(process_id = %process_id, "Failed to store result: {e}");
                    }
                }
                Ok(None) => {
                    debug!(process_id = %process_id, "Dropping result for unknown process");
                }
                Err(e) => error!(process_id = %process_id, "Failed to store result: {e}"),
            },
        }
    }

    async fn transition(&self, process_id: &str, status: ProcessStatus, message: Option<&str>) {
        let current = match self.store.get_process(process_id).await {
            Ok(Some(process)) => process.status,
            Ok(None) => {
                debug!(process_id = %process_id, status = %status, "Status for unknown process ignored");
                return;
            }
            Err(e) => {
                error!(process_id = %process_id, "Failed to load process for status update: {e}");
                return;
            }
        };

        if !current.can_transition_to(status) {
            debug!(
                process_id = %process_id,
                from = %current,
                to = %status,
                "Ignoring stale status transition"
            );
            return;
        }

        match self.store.update_status(process_id, status, message).await {
            Ok(_) => debug!(process_id = %process_id, status = %status, "Status updated"),
            Err(e) => error!(process_id = %process_id, "Failed to update status: {e}"),
        }
    }

    /// Answer a worker round trip from the store.
    async fn answer(&self, request: WorkerRequest) {
        match request {
            WorkerRequest::ProcessData { process_id, reply } => {
                let data = match self.store.get_process(&process_id).await {
                    Ok(process) => process.map(|p| p.data()),
                    Err(e) => {
                        warn!(process_id = %process_id, "Process data request failed: {e}");
                        None
                    }
                };
                let _ = reply.send(data);
            }
            WorkerRequest::AllProcesses { reply } => {
                let processes = self
                    .store
                    .list_processes(ProcessFilter::default())
                    .await
                    .unwrap_or_else(|e| {
                        warn!("All-processes request failed: {e}");
                        Vec::new()
                    });
                let _ = reply.send(processes);
            }
        }
    }
}
