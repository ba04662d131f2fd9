//! Timer scheduler: one cancellable timer task per armed process.
//!
//! Each timer task owns a `JoinSet` of in-flight ticks, so aborting the timer
//! also aborts any tick still running for that process. Ticks are started on
//! the interval regardless of whether the previous tick has finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ClientLink, ProcessEvent};
use crate::config::OrchestratorConfig;
use crate::error::ExecutionError;
use crate::process::{ProcessData, ProcessKind, ProcessStatus, payload_interval};
use crate::worker::executor::ExecutorRegistry;
use crate::worker::retry::RetryPolicy;

/// Tracked timer task.
#[derive(Debug)]
struct TimerHandle {
    task: JoinHandle<()>,
}

/// Everything a timer task needs, shared with its ticks.
struct TimerContext {
    process_id: String,
    /// Payload captured at arm time, used when the client has no fresher copy.
    fallback: ProcessData,
    link: ClientLink,
    executors: Arc<ExecutorRegistry>,
    default_interval: Duration,
    retry: RetryPolicy,
}

/// What a finished tick reports back to its timer.
struct TickReport {
    /// Interval declared by the payload the tick actually ran with.
    interval: Duration,
    outcome: Result<(), String>,
}

/// Owns the timers of every armed process.
pub struct Scheduler {
    link: ClientLink,
    executors: Arc<ExecutorRegistry>,
    default_interval: Duration,
    retry: RetryPolicy,
    timers: Arc<RwLock<HashMap<String, TimerHandle>>>,
}

impl Scheduler {
    pub fn new(link: ClientLink, executors: ExecutorRegistry, config: &OrchestratorConfig) -> Self {
        Self {
            link,
            executors: Arc::new(executors),
            default_interval: config.default_interval,
            retry: config.retry.clone(),
            timers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Arm a timer for `process_id`, replacing any existing one.
    ///
    /// Reports `Running` and starts the first tick immediately.
    pub async fn arm(&self, process_id: &str, kind: ProcessKind, payload: serde_json::Value) {
        let mut timers = self.timers.write().await;

        if let Some(previous) = timers.remove(process_id) {
            previous.task.abort();
            debug!(process_id = %process_id, "Replaced existing timer");
        }

        notify(&self.link, ProcessEvent::status(process_id, ProcessStatus::Running)).await;

        let interval = payload_interval(&payload, self.default_interval);
        let ctx = Arc::new(TimerContext {
            process_id: process_id.to_string(),
            fallback: ProcessData { kind, payload },
            link: self.link.clone(),
            executors: Arc::clone(&self.executors),
            default_interval: self.default_interval,
            retry: self.retry.clone(),
        });
        let task = tokio::spawn(run_timer(ctx, interval));
        timers.insert(process_id.to_string(), TimerHandle { task });

        info!(
            process_id = %process_id,
            kind = %kind,
            interval_ms = interval.as_millis() as u64,
            "Process armed"
        );
    }

    /// Cancel the timer for `process_id`. Returns `true` if one existed.
    pub async fn disarm(&self, process_id: &str) -> bool {
        let mut timers = self.timers.write().await;
        match timers.remove(process_id) {
            Some(tracked) => {
                if !tracked.task.is_finished() {
                    tracked.task.abort();
                }
                info!(process_id = %process_id, "Process disarmed");
                true
            }
            None => false,
        }
    }

    /// Check if a live timer exists for `process_id`.
    pub async fn is_armed(&self, process_id: &str) -> bool {
        self.timers
            .read()
            .await
            .get(process_id)
            .is_some_and(|t| !t.task.is_finished())
    }

    /// Ids with a live timer, sorted.
    pub async fn armed_processes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .timers
            .read()
            .await
            .iter()
            .filter(|(_, t)| !t.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Abort every timer.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.write().await;
        let count = timers.len();
        for (_, tracked) in timers.drain() {
            tracked.task.abort();
        }
        if count > 0 {
            info!(count, "Scheduler shut down; timers aborted");
        }
    }
}

/// Send a notification; a missing client is not the timer's problem.
async fn notify(link: &ClientLink, event: ProcessEvent) {
    if let Err(e) = link.notify(event).await {
        debug!("Dropping worker notification: {e}");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Timer loop for one process. A zero interval runs a single tick and then
/// idles until aborted.
async fn run_timer(ctx: Arc<TimerContext>, mut interval: Duration) {
    let mut ticks = JoinSet::new();
    let mut failures: u32 = 0;
    let mut last_start = Instant::now();
    ticks.spawn(run_tick(Arc::clone(&ctx)));

    loop {
        let deadline = (!interval.is_zero())
            .then(|| last_start + ctx.retry.next_delay(interval, failures));

        tokio::select! {
            _ = sleep_until(deadline) => {
                last_start = Instant::now();
                ticks.spawn(run_tick(Arc::clone(&ctx)));
            }
            Some(joined) = ticks.join_next() => {
                let report = match joined {
                    Ok(report) => report,
                    Err(e) => TickReport {
                        interval,
                        outcome: Err(format!("tick aborted: {e}")),
                    },
                };
                interval = report.interval;

                match report.outcome {
                    Ok(()) => failures = 0,
                    Err(last) => {
                        failures = failures.saturating_add(1);
                        if ctx.retry.should_give_up(failures) {
                            let gave_up = ExecutionError::GaveUp { failures, last };
                            warn!(process_id = %ctx.process_id, "{gave_up}");
                            let event = ProcessEvent::error(&ctx.process_id, gave_up.to_string());
                            notify(&ctx.link, event).await;
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// One tick: fetch the latest data, execute, report.
async fn run_tick(ctx: Arc<TimerContext>) -> TickReport {
    let process_id = ctx.process_id.as_str();

    let data = match ctx.link.request_process_data(process_id).await {
        Ok(Some(data)) => data,
        Ok(None) => ctx.fallback.clone(),
        Err(e) => {
            debug!(process_id = %process_id, "Using payload from arm time: {e}");
            ctx.fallback.clone()
        }
    };
    let interval = payload_interval(&data.payload, ctx.default_interval);

    let outcome = match ctx.executors.execute(data.kind, process_id, &data.payload).await {
        Ok(output) => {
            debug!(process_id = %process_id, kind = %data.kind, "Tick succeeded");
            let status = if interval.is_zero() {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Running
            };
            notify(&ctx.link, ProcessEvent::result(process_id, data.kind, output)).await;
            notify(&ctx.link, ProcessEvent::status(process_id, status)).await;
            Ok(())
        }
        Err(e) => {
            warn!(process_id = %process_id, kind = %data.kind, "Tick failed: {e}");
            let message = e.to_string();
            notify(&ctx.link, ProcessEvent::error(process_id, message.clone())).await;
            Err(message)
        }
    };

    TickReport { interval, outcome }
}
