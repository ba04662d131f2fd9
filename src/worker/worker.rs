//! Worker command loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ClientLink, ProcessEvent, WorkerCommand};
use crate::config::OrchestratorConfig;
use crate::process::ProcessStatus;
use crate::worker::executor::ExecutorRegistry;
use crate::worker::scheduler::Scheduler;

/// The isolated execution context: receives commands and owns the scheduler.
pub struct Worker {
    commands: mpsc::Receiver<WorkerCommand>,
    link: ClientLink,
    scheduler: Arc<Scheduler>,
}

/// Inspection and teardown handle for a spawned worker.
///
/// Holds no command sender; the worker stops when every sender is dropped.
pub struct WorkerHandle {
    scheduler: Arc<Scheduler>,
    task: JoinHandle<()>,
}

impl Worker {
    pub fn new(
        commands: mpsc::Receiver<WorkerCommand>,
        link: ClientLink,
        executors: ExecutorRegistry,
        config: &OrchestratorConfig,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(link.clone(), executors, config));
        Self {
            commands,
            link,
            scheduler,
        }
    }

    /// Run the command loop on a new task.
    pub fn spawn(self) -> WorkerHandle {
        let scheduler = Arc::clone(&self.scheduler);
        let task = tokio::spawn(self.run());
        WorkerHandle { scheduler, task }
    }

    /// Apply commands strictly in arrival order until the channel closes.
    async fn run(mut self) {
        info!("Worker started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }
        self.scheduler.shutdown().await;
        info!("Worker command channel closed; worker stopped");
    }

    async fn handle(&self, command: WorkerCommand) {
        debug!(command = command.name(), "Worker received command");
        match command {
            WorkerCommand::Init {
                process_id,
                kind,
                payload,
            } => {
                self.scheduler.arm(&process_id, kind, payload).await;
            }
            WorkerCommand::Stop { process_id } => {
                let had_timer = self.scheduler.disarm(&process_id).await;
                if !had_timer {
                    debug!(process_id = %process_id, "Stop for process without a timer");
                }
                if let Err(e) = self.link.notify(ProcessEvent::stopped(&process_id)).await {
                    debug!(process_id = %process_id, "Dropping stop notification: {e}");
                }
            }
            WorkerCommand::Sync => self.sync().await,
        }
    }

    /// Re-arm every process the store reports as running.
    async fn sync(&self) {
        let processes = match self.link.request_all_processes().await {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Sync could not load processes: {e}");
                return;
            }
        };

        let mut rearmed = 0usize;
        for process in processes
            .into_iter()
            .filter(|p| p.status == ProcessStatus::Running)
        {
            self.scheduler
                .arm(&process.id, process.kind, process.payload)
                .await;
            rearmed += 1;
        }
        info!(rearmed, "Sync complete");
    }
}

impl WorkerHandle {
    pub async fn is_armed(&self, process_id: &str) -> bool {
        self.scheduler.is_armed(process_id).await
    }

    pub async fn armed_processes(&self) -> Vec<String> {
        self.scheduler.armed_processes().await
    }

    /// Check if the command loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the command loop and abort every timer.
    pub async fn shutdown(self) {
        self.task.abort();
        self.scheduler.shutdown().await;
    }
}
