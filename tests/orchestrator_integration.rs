//! End-to-end tests: client + worker + in-memory libSQL store.
//!
//! Status changes arrive asynchronously, so assertions poll the store or a
//! subscription with a deadline instead of sleeping for a fixed time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

use process_orchestrator::channel::{MessageType, ProcessEvent};
use process_orchestrator::client::OrchestratorClient;
use process_orchestrator::config::OrchestratorConfig;
use process_orchestrator::error::{Error, ExecutionError, ProcessError};
use process_orchestrator::process::{ProcessFilter, ProcessKind, ProcessStatus};
use process_orchestrator::store::{LibSqlBackend, ProcessStore};
use process_orchestrator::worker::{Executor, ExecutorRegistry, RetryPolicy};

/// Maximum time any wait is allowed to take before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy::fixed(),
        ..OrchestratorConfig::default()
    }
}

async fn new_client() -> (OrchestratorClient, Arc<dyn ProcessStore>) {
    let store: Arc<dyn ProcessStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let client = OrchestratorClient::new(Arc::clone(&store), test_config());
    (client, store)
}

fn default_executors() -> ExecutorRegistry {
    ExecutorRegistry::with_defaults(&test_config())
}

async fn wait_for_status(client: &OrchestratorClient, id: &str, status: ProcessStatus) {
    let reached = timeout(TEST_TIMEOUT, async {
        loop {
            if let Ok(p) = client.get_process(id).await
                && p.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "process {id} never reached {status}");
}

/// Wait for the first event on `stream` matching `pred`.
async fn wait_for_event(
    stream: &mut broadcast::Receiver<ProcessEvent>,
    pred: impl Fn(&ProcessEvent) -> bool,
) -> ProcessEvent {
    timeout(TEST_TIMEOUT, async {
        loop {
            match stream.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Data-processing stand-in that counts ticks.
struct CountingExecutor {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Executor for CountingExecutor {
    fn kind(&self) -> ProcessKind {
        ProcessKind::DataProcessing
    }

    async fn execute(&self, _process_id: &str, _payload: &Value) -> Result<Value, ExecutionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"tick": n}))
    }
}

// ── Lifecycle properties ─────────────────────────────────────────────

#[tokio::test]
async fn start_is_pending_even_without_worker() {
    let (client, _store) = new_client().await;

    let result = client
        .start_process("offline", ProcessKind::ApiPolling, json!({"endpoint": "http://127.0.0.1:1"}))
        .await;
    assert!(result.is_err());

    let process = client.get_process("offline").await.unwrap();
    assert_eq!(process.status, ProcessStatus::Pending);
    assert!(!client.is_worker_active().await);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (client, _store) = new_client().await;
    let _worker = client.spawn_worker(default_executors()).await.unwrap();

    client
        .start_process(
            "gen",
            ProcessKind::ContentGeneration,
            json!({"template": "tick", "interval_ms": 60_000}),
        )
        .await
        .unwrap();
    wait_for_status(&client, "gen", ProcessStatus::Running).await;

    client.stop_process("gen").await.unwrap();
    client.stop_process("gen").await.unwrap();
    wait_for_status(&client, "gen", ProcessStatus::Stopped).await;

    // Give the second confirmation time to land; status must not move.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        client.get_process("gen").await.unwrap().status,
        ProcessStatus::Stopped
    );
}

#[tokio::test]
async fn delete_removes_process_and_results() {
    let (client, _store) = new_client().await;
    let _worker = client.spawn_worker(default_executors()).await.unwrap();
    let mut events = client.subscribe();

    client
        .start_process(
            "doomed",
            ProcessKind::ContentGeneration,
            json!({"template": "x", "interval_ms": 50}),
        )
        .await
        .unwrap();
    for _ in 0..2 {
        wait_for_event(&mut events, |e| e.message_type() == MessageType::ExecutionResult).await;
    }
    assert!(!client.get_results("doomed", None).await.unwrap().is_empty());

    client.delete_process("doomed").await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(client.get_results("doomed", None).await.unwrap().is_empty());
    assert!(matches!(
        client.get_process("doomed").await,
        Err(Error::Process(ProcessError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn restart_rearms_without_duplicate_timers() {
    let (client, _store) = new_client().await;
    let calls = Arc::new(AtomicU32::new(0));
    let mut executors = default_executors();
    executors.register(Arc::new(CountingExecutor {
        calls: Arc::clone(&calls),
    }));
    let worker = client.spawn_worker(executors).await.unwrap();

    let payload = json!({"data": [], "steps": [], "interval_ms": 200});
    client
        .start_process("p", ProcessKind::DataProcessing, payload.clone())
        .await
        .unwrap();
    client
        .start_process("p", ProcessKind::DataProcessing, payload)
        .await
        .unwrap();
    wait_for_status(&client, "p", ProcessStatus::Running).await;

    calls.store(0, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let ticks = calls.load(Ordering::SeqCst);

    // One timer ticks 2-3 times in 500ms; two timers would tick 4-6 times.
    assert!((2..=4).contains(&ticks), "saw {ticks} ticks");
    assert_eq!(worker.armed_processes().await, vec!["p".to_string()]);
}

#[tokio::test]
async fn sync_rearms_exactly_running_processes() {
    let (client, store) = new_client().await;
    let first = client.spawn_worker(default_executors()).await.unwrap();

    let slow = json!({"template": "x", "interval_ms": 60_000});
    for id in ["keep-1", "keep-2", "stop-me"] {
        client
            .start_process(id, ProcessKind::ContentGeneration, slow.clone())
            .await
            .unwrap();
        wait_for_status(&client, id, ProcessStatus::Running).await;
    }
    client
        .start_process(
            "once",
            ProcessKind::ContentGeneration,
            json!({"template": "x", "interval_ms": 0}),
        )
        .await
        .unwrap();
    wait_for_status(&client, "once", ProcessStatus::Completed).await;
    client.stop_process("stop-me").await.unwrap();
    wait_for_status(&client, "stop-me", ProcessStatus::Stopped).await;

    // A persisted error must not be re-armed either.
    client
        .start_process("broken", ProcessKind::ContentGeneration, slow.clone())
        .await
        .unwrap();
    wait_for_status(&client, "broken", ProcessStatus::Running).await;

    // Simulated worker-context teardown: the in-memory timers are lost.
    assert!(client.detach_worker().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.armed_processes().await.is_empty());

    store
        .update_status("broken", ProcessStatus::Error, Some("boom"))
        .await
        .unwrap();

    let second = client.spawn_worker(default_executors()).await.unwrap();
    let rearmed = timeout(TEST_TIMEOUT, async {
        loop {
            let armed = second.armed_processes().await;
            if armed.len() >= 2 {
                return armed;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(rearmed, vec!["keep-1".to_string(), "keep-2".to_string()]);

    let running = client
        .list_processes(ProcessFilter::default().with_status(ProcessStatus::Running))
        .await
        .unwrap();
    assert_eq!(running.len(), 2);
}

// ── Executor scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn pipeline_with_failing_map_still_emits_result() {
    let (client, _store) = new_client().await;
    let _worker = client.spawn_worker(default_executors()).await.unwrap();
    let mut events = client.subscribe();

    let payload = json!({
        "interval_ms": 0,
        "data": [
            {"sku": "a", "qty": 3, "price": 2},
            {"sku": "b", "qty": 0, "price": 5},
            {"sku": "c", "qty": 1, "price": 10}
        ],
        "steps": [
            {"type": "filter", "predicate":
                {"op": "gt", "left": {"op": "field", "path": "qty"}, "right": {"op": "literal", "value": 0}}},
            {"type": "map", "expr":
                {"op": "div", "left": {"op": "field", "path": "price"}, "right": {"op": "literal", "value": 0}}},
            {"type": "map", "merge": true, "expr": {"op": "object", "fields": {
                "total": {"op": "mul", "left": {"op": "field", "path": "qty"}, "right": {"op": "field", "path": "price"}}
            }}},
            {"type": "sort", "key": {"op": "field", "path": "total"}, "descending": true}
        ]
    });
    client
        .start_process("pipeline", ProcessKind::DataProcessing, payload)
        .await
        .unwrap();

    let event = wait_for_event(&mut events, |e| e.message_type() == MessageType::ExecutionResult).await;
    let ProcessEvent::ExecutionResult { data, .. } = event else {
        unreachable!()
    };
    assert_eq!(
        data,
        json!([
            {"sku": "c", "qty": 1, "price": 10, "total": 10},
            {"sku": "a", "qty": 3, "price": 2, "total": 6}
        ])
    );

    wait_for_status(&client, "pipeline", ProcessStatus::Completed).await;
    assert_eq!(client.get_results("pipeline", None).await.unwrap()[0].data, data);
}

#[tokio::test]
async fn polling_http_500_reports_error_and_stays_armed() {
    let app = Router::new().route(
        "/status",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "maintenance") }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (client, _store) = new_client().await;
    let worker = client.spawn_worker(default_executors()).await.unwrap();
    let mut events = client.subscribe();

    client
        .start_process(
            "poll",
            ProcessKind::ApiPolling,
            json!({"endpoint": format!("http://127.0.0.1:{port}/status"), "interval_ms": 0}),
        )
        .await
        .unwrap();

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ProcessEvent::StatusChanged { status: ProcessStatus::Error, .. })
    })
    .await;
    let ProcessEvent::StatusChanged { error_message, .. } = event else {
        unreachable!()
    };
    assert!(error_message.unwrap().contains("500"));

    wait_for_status(&client, "poll", ProcessStatus::Error).await;
    let stored = client.get_process("poll").await.unwrap();
    assert!(stored.error_message.unwrap().contains("500"));
    assert!(worker.is_armed("poll").await);
    assert!(client.get_results("poll", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn content_generation_samples_list_values() {
    let (client, _store) = new_client().await;
    let _worker = client.spawn_worker(default_executors()).await.unwrap();
    let mut events = client.subscribe();

    client
        .start_process(
            "greet",
            ProcessKind::ContentGeneration,
            json!({"template": "Hello {{name}}", "variables": {"name": ["A", "B"]}, "count": 3, "interval_ms": 0}),
        )
        .await
        .unwrap();

    let event = wait_for_event(&mut events, |e| e.message_type() == MessageType::ExecutionResult).await;
    let ProcessEvent::ExecutionResult { data, kind, .. } = event else {
        unreachable!()
    };
    assert_eq!(kind, ProcessKind::ContentGeneration);
    let rendered = data.as_array().unwrap();
    assert_eq!(rendered.len(), 3);
    assert!(rendered.iter().all(|s| s == "Hello A" || s == "Hello B"));
}

// ── Store-facing behaviour ───────────────────────────────────────────

#[tokio::test]
async fn clear_all_stops_running_and_wipes_store() {
    let (client, _store) = new_client().await;
    let worker = client.spawn_worker(default_executors()).await.unwrap();

    client
        .start_process(
            "gen",
            ProcessKind::ContentGeneration,
            json!({"template": "x", "interval_ms": 60_000}),
        )
        .await
        .unwrap();
    wait_for_status(&client, "gen", ProcessStatus::Running).await;
    client.set_setting("theme", &json!("dark")).await.unwrap();

    client.clear_all().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!worker.is_armed("gen").await);
    assert!(client.list_processes(ProcessFilter::default()).await.unwrap().is_empty());
    assert!(client.get_results("gen", None).await.unwrap().is_empty());
    assert!(client.get_setting("theme").await.unwrap().is_none());
}

#[tokio::test]
async fn clear_all_stops_errored_and_idle_timers() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().route(
        "/down",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, "down")
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (client, _store) = new_client().await;
    let worker = client.spawn_worker(default_executors()).await.unwrap();

    client
        .start_process(
            "failing",
            ProcessKind::ApiPolling,
            json!({"endpoint": format!("http://127.0.0.1:{port}/down"), "interval_ms": 50}),
        )
        .await
        .unwrap();
    client
        .start_process(
            "once",
            ProcessKind::ContentGeneration,
            json!({"template": "x", "interval_ms": 0}),
        )
        .await
        .unwrap();
    wait_for_status(&client, "failing", ProcessStatus::Error).await;
    wait_for_status(&client, "once", ProcessStatus::Completed).await;
    assert!(worker.is_armed("failing").await);
    assert!(worker.is_armed("once").await);

    client.clear_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!worker.is_armed("failing").await);
    assert!(!worker.is_armed("once").await);
    let after_clear = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), after_clear);
}

#[tokio::test]
async fn results_are_newest_first_and_bounded() {
    let (client, _store) = new_client().await;
    let calls = Arc::new(AtomicU32::new(0));
    let mut executors = default_executors();
    executors.register(Arc::new(CountingExecutor {
        calls: Arc::clone(&calls),
    }));
    let _worker = client.spawn_worker(executors).await.unwrap();
    let mut events = client.subscribe();

    client
        .start_process("count", ProcessKind::DataProcessing, json!({"interval_ms": 30}))
        .await
        .unwrap();
    for _ in 0..3 {
        wait_for_event(&mut events, |e| e.message_type() == MessageType::ExecutionResult).await;
    }
    client.stop_process("count").await.unwrap();
    wait_for_status(&client, "count", ProcessStatus::Stopped).await;

    let all = client.get_results("count", None).await.unwrap();
    assert!(all.len() >= 3);
    let latest = client.get_results("count", Some(2)).await.unwrap();
    assert_eq!(latest.len(), 2);
    assert!(latest[0].data["tick"].as_u64() > latest[1].data["tick"].as_u64());
    assert_eq!(latest[0].id, all[0].id);
}
