//! Background task execution engine.
//!
//! `submit` registers the task and spawns one tokio worker, returning the
//! handle before any work runs; the interactive surface never blocks on a
//! task. Each task gets its own broadcast channel for live updates plus a
//! persistent buffer for historical retrieval. A fault inside a worker,
//! including a panic, is caught at the task boundary and becomes a
//! classified terminal outcome; the engine itself never dies with a task.

use crate::config::{ConfigHandle, Configuration};
use crate::documents::{DocumentRenderer, MarkdownRenderer};
use crate::providers::{build_provider, ChatProvider};
use crate::scrape::{HttpFetcher, PageFetcher};
use crate::tasks::{self, TaskRun, WorkerContext};
use desk_agent_sdk::{
    async_trait, LogLevel, RuntimeResult, TaskError, TaskEvent, TaskHandle, TaskKind, TaskOutcome,
    TaskRequest, TaskRuntime, TaskStatus, TaskUpdate,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

/// Per-task channel capacity. A lagging subscriber loses oldest updates;
/// the buffer keeps the full history.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Builds the active provider from a configuration snapshot. Injected so
/// tests can substitute a scripted provider.
pub type ProviderFactory =
    Arc<dyn Fn(&Configuration) -> anyhow::Result<Arc<dyn ChatProvider>> + Send + Sync>;

/// Internal execution state for a submitted task
struct TaskState {
    kind: TaskKind,
    status: TaskStatus,
    handle: TaskHandle,
    events_tx: broadcast::Sender<TaskUpdate>,
    /// Persistent buffer of all events for historical retrieval
    events: Arc<Mutex<Vec<TaskEvent>>>,
    outcome: Option<TaskOutcome>,
}

/// Emits ordered [`TaskEvent`]s for one task: broadcast to live subscribers
/// and appended to the history buffer.
#[derive(Clone)]
pub(crate) struct Reporter {
    task_id: Uuid,
    sequence: Arc<AtomicU64>,
    tx: broadcast::Sender<TaskUpdate>,
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl Reporter {
    fn new(
        task_id: Uuid,
        tx: broadcast::Sender<TaskUpdate>,
        events: Arc<Mutex<Vec<TaskEvent>>>,
    ) -> Self {
        Self {
            task_id,
            sequence: Arc::new(AtomicU64::new(0)),
            tx,
            events,
        }
    }

    fn emit(&self, level: LogLevel, message: String) {
        let event = TaskEvent {
            task_id: self.task_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            level,
            message,
            timestamp: chrono::Local::now(),
        };
        if let Ok(mut buffer) = self.events.lock() {
            buffer.push(event.clone());
        }
        // No subscribers is fine; the buffer retains everything
        let _ = self.tx.send(TaskUpdate::Log { event });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }
}

/// In-process task runtime with one worker per submission
pub struct TaskEngine {
    config: ConfigHandle,
    tasks: Arc<Mutex<HashMap<Uuid, TaskState>>>,
    provider_factory: ProviderFactory,
    renderer: Arc<dyn DocumentRenderer>,
    fetcher: Arc<dyn PageFetcher>,
}

impl TaskEngine {
    /// Engine with the default collaborators (live provider, Markdown
    /// renderer, HTTP fetcher)
    pub fn new(config: ConfigHandle) -> anyhow::Result<Self> {
        let timeout = {
            let snapshot = config.read().expect("config handle poisoned");
            Duration::from_secs(snapshot.request_timeout_secs)
        };
        let fetcher = HttpFetcher::new(timeout)?;
        Ok(Self::with_collaborators(
            config,
            Arc::new(build_provider),
            Arc::new(MarkdownRenderer),
            Arc::new(fetcher),
        ))
    }

    pub fn with_collaborators(
        config: ConfigHandle,
        provider_factory: ProviderFactory,
        renderer: Arc<dyn DocumentRenderer>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            provider_factory,
            renderer,
            fetcher,
        }
    }

    /// Drop state for finished tasks, freeing their event buffers
    pub fn cleanup_finished(&self) {
        let mut tasks = self.tasks.lock().expect("task map poisoned");
        tasks.retain(|_, state| !state.status.is_terminal());
    }

    /// Write the buffered event transcript of a task to the configured logs
    /// directory and return the file path
    pub fn save_transcript(&self, task_id: &Uuid) -> RuntimeResult<PathBuf> {
        let (kind, events) = {
            let tasks = self.tasks.lock().expect("task map poisoned");
            let state = tasks
                .get(task_id)
                .ok_or_else(|| format!("task {task_id} not found"))?;
            let events = state.events.lock().expect("event buffer poisoned").clone();
            (state.kind, events)
        };

        let logs_dir = {
            let config = self.config.read().expect("config handle poisoned");
            config.paths.logs.clone()
        };
        std::fs::create_dir_all(&logs_dir)?;

        let short = &task_id.simple().to_string()[..8];
        let path = logs_dir.join(format!("task_{}_{short}.log", kind.slug()));

        let mut content = format!(
            "Transcript generated: {}\n{}\n\n",
            chrono::Local::now().format("%d/%m/%Y %H:%M:%S"),
            "=".repeat(50)
        );
        for event in events {
            content.push_str(&format!(
                "{:>4} [{:?}] {} {}\n",
                event.sequence,
                event.level,
                event.timestamp.format("%H:%M:%S"),
                event.message
            ));
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    fn set_running(tasks: &Mutex<HashMap<Uuid, TaskState>>, task_id: &Uuid) {
        let mut map = tasks.lock().expect("task map poisoned");
        if let Some(state) = map.get_mut(task_id) {
            state.status = TaskStatus::Running;
        }
    }

    /// Record the terminal outcome exactly once and broadcast it last
    fn finalize(
        tasks: &Mutex<HashMap<Uuid, TaskState>>,
        task_id: &Uuid,
        events_tx: &broadcast::Sender<TaskUpdate>,
        outcome: TaskOutcome,
    ) {
        {
            let mut map = tasks.lock().expect("task map poisoned");
            if let Some(state) = map.get_mut(task_id) {
                if state.outcome.is_some() {
                    return;
                }
                state.status = outcome.status();
                state.outcome = Some(outcome.clone());
            }
        }
        let _ = events_tx.send(TaskUpdate::Finished {
            task_id: *task_id,
            outcome,
        });
    }
}

#[async_trait]
impl TaskRuntime for TaskEngine {
    async fn submit(&self, request: TaskRequest) -> RuntimeResult<TaskHandle> {
        let kind = request.payload.kind();
        let task_id = Uuid::new_v4();
        let handle = TaskHandle::new(task_id, kind);

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let events = Arc::new(Mutex::new(Vec::new()));

        // Snapshot the configuration at submit time; a wizard commit in
        // flight is either fully visible or not at all
        let config = self
            .config
            .read()
            .expect("config handle poisoned")
            .clone();

        let state = TaskState {
            kind,
            status: TaskStatus::Pending,
            handle: handle.clone(),
            events_tx: events_tx.clone(),
            events: events.clone(),
            outcome: None,
        };
        self.tasks
            .lock()
            .expect("task map poisoned")
            .insert(task_id, state);

        let reporter = Reporter::new(task_id, events_tx.clone(), events);
        let ctx = WorkerContext {
            config,
            handle: handle.clone(),
            reporter: reporter.clone(),
            provider_factory: self.provider_factory.clone(),
            renderer: self.renderer.clone(),
            fetcher: self.fetcher.clone(),
        };
        let tasks = self.tasks.clone();

        debug!(task_id = %task_id, kind = kind.slug(), "task submitted");

        tokio::spawn(async move {
            Self::set_running(&tasks, &task_id);
            reporter.info(format!("{} task started", kind.slug()));

            let result = AssertUnwindSafe(tasks::run(&request, &ctx))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(TaskRun::Done(output))) => {
                    reporter.info("task completed");
                    TaskOutcome::Success { output }
                }
                Ok(Ok(TaskRun::Cancelled)) => {
                    reporter.warn("task cancelled");
                    TaskOutcome::Cancelled
                }
                Ok(Err(err)) => {
                    reporter.error(format!("task failed: {err}"));
                    TaskOutcome::Failed { error: err }
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    error!(task_id = %task_id, "worker panicked: {message}");
                    reporter.error(format!("task panicked: {message}"));
                    TaskOutcome::Failed {
                        error: TaskError::Internal(format!("task panicked: {message}")),
                    }
                }
            };

            Self::finalize(&tasks, &task_id, &ctx.reporter.tx, outcome);
        });

        Ok(handle)
    }

    async fn subscribe(
        &self,
        task_id: &Uuid,
    ) -> RuntimeResult<broadcast::Receiver<TaskUpdate>> {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let state = tasks
            .get(task_id)
            .ok_or_else(|| format!("task {task_id} not found"))?;
        Ok(state.events_tx.subscribe())
    }

    async fn events(&self, task_id: &Uuid, limit: Option<usize>) -> RuntimeResult<Vec<TaskEvent>> {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let state = tasks
            .get(task_id)
            .ok_or_else(|| format!("task {task_id} not found"))?;

        let buffer = state.events.lock().expect("event buffer poisoned");
        let events = if let Some(limit) = limit {
            buffer.iter().rev().take(limit).rev().cloned().collect()
        } else {
            buffer.clone()
        };
        Ok(events)
    }

    async fn status(&self, task_id: &Uuid) -> RuntimeResult<TaskStatus> {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let state = tasks
            .get(task_id)
            .ok_or_else(|| format!("task {task_id} not found"))?;
        Ok(state.status)
    }

    async fn outcome(&self, task_id: &Uuid) -> RuntimeResult<Option<TaskOutcome>> {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let state = tasks
            .get(task_id)
            .ok_or_else(|| format!("task {task_id} not found"))?;
        Ok(state.outcome.clone())
    }

    async fn cancel(&self, task_id: &Uuid) -> RuntimeResult<()> {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let state = tasks
            .get(task_id)
            .ok_or_else(|| format!("task {task_id} not found"))?;
        state.handle.request_cancel();
        Ok(())
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_handle;
    use desk_agent_sdk::{ProviderError, TaskOutput, TaskPayload, ValidationError};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Scripted provider for engine tests
    struct MockProvider {
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
        response: Result<String, ProviderError>,
        panics: bool,
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        fn validate(&self) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn query(&self, _prompt: &str, _system: Option<&str>) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("scripted provider panic");
            }
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.response.clone()
        }

        async fn probe(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct EngineFixture {
        engine: TaskEngine,
        calls: Arc<AtomicUsize>,
        gate: Arc<Semaphore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(response: Result<String, ProviderError>, panics: bool, gated: bool) -> EngineFixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.paths.documents = dir.path().join("documents");
        config.paths.presentations = dir.path().join("presentations");
        config.paths.logs = dir.path().join("logs");
        config.paths.temp = dir.path().join("temp");

        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let provider = Arc::new(MockProvider {
            calls: calls.clone(),
            gate: gated.then(|| gate.clone()),
            response,
            panics,
        });

        let factory: ProviderFactory = {
            let provider = provider.clone();
            Arc::new(move |_: &Configuration| Ok(provider.clone() as Arc<dyn ChatProvider>))
        };

        let engine = TaskEngine::with_collaborators(
            config_handle(config),
            factory,
            Arc::new(MarkdownRenderer),
            Arc::new(NoFetcher),
        );
        EngineFixture {
            engine,
            calls,
            gate,
            _dir: dir,
        }
    }

    struct NoFetcher;

    #[async_trait]
    impl crate::scrape::PageFetcher for NoFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _selector: Option<&str>,
        ) -> Result<desk_agent_sdk::PageData, crate::scrape::FetchError> {
            Err(crate::scrape::FetchError::Request("no network".to_string()))
        }
    }

    async fn wait_outcome(engine: &TaskEngine, task_id: &Uuid) -> TaskOutcome {
        loop {
            if let Some(outcome) = engine.outcome(task_id).await.unwrap() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn doc_request(title: &str) -> TaskRequest {
        TaskRequest::new(TaskPayload::GenerateDocument {
            title: title.to_string(),
            content: "Hello".to_string(),
            filename: None,
        })
    }

    fn query_request() -> TaskRequest {
        TaskRequest::new(TaskPayload::LlmQuery {
            prompt: "question".to_string(),
            system: None,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_returns_while_work_is_still_pending() {
        let fx = fixture(Ok("answer".to_string()), false, true);

        let handle = fx.engine.submit(query_request()).await.unwrap();
        // The provider is gated shut: the task cannot have finished
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fx.engine.outcome(&handle.id).await.unwrap().is_none());

        fx.gate.add_permits(1);
        let outcome = wait_outcome(&fx.engine, &handle.id).await;
        assert!(matches!(
            outcome,
            TaskOutcome::Success {
                output: TaskOutput::LlmResponse { .. }
            }
        ));
    }

    #[tokio::test]
    async fn events_are_ordered_and_terminal_update_is_last() {
        let fx = fixture(Ok("answer".to_string()), false, false);

        let handle = fx.engine.submit(doc_request("Ordered")).await.unwrap();
        let mut rx = fx.engine.subscribe(&handle.id).await.unwrap();

        let mut sequences = Vec::new();
        let mut finished = false;
        while let Ok(update) = rx.recv().await {
            match update {
                TaskUpdate::Log { event } => {
                    assert!(!finished, "log event arrived after the terminal outcome");
                    sequences.push(event.sequence);
                }
                TaskUpdate::Finished { task_id, outcome } => {
                    assert_eq!(task_id, handle.id);
                    assert_eq!(outcome.status(), TaskStatus::Completed);
                    finished = true;
                    break;
                }
            }
        }
        assert!(finished);
        assert!(!sequences.is_empty());
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));

        // The buffered history agrees with the live stream order
        let buffered = fx.engine.events(&handle.id, None).await.unwrap();
        let buffered_seqs: Vec<u64> = buffered.iter().map(|e| e.sequence).collect();
        assert_eq!(buffered_seqs, sequences);
    }

    #[tokio::test]
    async fn concurrent_documents_never_share_an_output_path() {
        let fx = fixture(Ok("answer".to_string()), false, false);

        let mut handles = Vec::new();
        for _ in 0..5 {
            handles.push(fx.engine.submit(doc_request("Same Title")).await.unwrap());
        }

        let mut paths = std::collections::HashSet::new();
        for handle in &handles {
            match wait_outcome(&fx.engine, &handle.id).await {
                TaskOutcome::Success {
                    output: TaskOutput::Document { path },
                } => {
                    assert!(paths.insert(path));
                }
                other => panic!("expected document success, got {other:?}"),
            }
        }
        assert_eq!(paths.len(), 5);
    }

    #[tokio::test]
    async fn document_succeeds_while_query_hits_unreachable_provider() {
        let fx = fixture(
            Err(ProviderError::Unreachable("connection refused".to_string())),
            false,
            false,
        );

        let doc = fx.engine.submit(doc_request("Hello")).await.unwrap();
        let query = fx.engine.submit(query_request()).await.unwrap();

        assert!(matches!(
            wait_outcome(&fx.engine, &doc.id).await,
            TaskOutcome::Success { .. }
        ));
        match wait_outcome(&fx.engine, &query.id).await {
            TaskOutcome::Failed {
                error: TaskError::Provider(ProviderError::Unreachable(_)),
            } => {}
            other => panic!("expected unreachable provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_before_network_call_yields_cancelled_without_provider_error() {
        let fx = fixture(Ok("answer".to_string()), false, false);

        // On the current-thread test runtime the worker does not run until
        // this future awaits, so the flag is set before the first checkpoint
        let handle = fx.engine.submit(query_request()).await.unwrap();
        fx.engine.cancel(&handle.id).await.unwrap();

        let outcome = wait_outcome(&fx.engine, &handle.id).await;
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);

        let events = fx.engine.events(&handle.id, None).await.unwrap();
        assert!(!events
            .iter()
            .any(|e| e.message.contains("failed")));
    }

    #[tokio::test]
    async fn worker_panic_becomes_internal_error_and_engine_survives() {
        let fx = fixture(Ok("answer".to_string()), true, false);

        let handle = fx.engine.submit(query_request()).await.unwrap();
        match wait_outcome(&fx.engine, &handle.id).await {
            TaskOutcome::Failed {
                error: TaskError::Internal(message),
            } => assert!(message.contains("panicked")),
            other => panic!("expected internal error, got {other:?}"),
        }

        // The engine still accepts and completes new work
        let doc = fx.engine.submit(doc_request("After Panic")).await.unwrap();
        assert!(matches!(
            wait_outcome(&fx.engine, &doc.id).await,
            TaskOutcome::Success { .. }
        ));
    }

    #[tokio::test]
    async fn scrape_failure_is_classified_as_fetch_error() {
        let fx = fixture(Ok("answer".to_string()), false, false);

        let handle = fx
            .engine
            .submit(TaskRequest::new(TaskPayload::Scrape {
                url: "http://example.test".to_string(),
                selector: None,
            }))
            .await
            .unwrap();

        match wait_outcome(&fx.engine, &handle.id).await {
            TaskOutcome::Failed {
                error: TaskError::Fetch(message),
            } => assert!(message.contains("no network")),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_task_ids_are_rejected() {
        let fx = fixture(Ok("answer".to_string()), false, false);
        let missing = Uuid::new_v4();
        assert!(fx.engine.status(&missing).await.is_err());
        assert!(fx.engine.cancel(&missing).await.is_err());
        assert!(fx.engine.events(&missing, None).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_drops_finished_tasks_only() {
        let fx = fixture(Ok("answer".to_string()), false, true);

        let done = fx.engine.submit(doc_request("Done")).await.unwrap();
        wait_outcome(&fx.engine, &done.id).await;

        let gated = fx.engine.submit(query_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        fx.engine.cleanup_finished();
        assert!(fx.engine.status(&done.id).await.is_err());
        assert!(fx.engine.status(&gated.id).await.is_ok());

        fx.gate.add_permits(1);
        wait_outcome(&fx.engine, &gated.id).await;
    }

    #[tokio::test]
    async fn transcript_contains_the_buffered_events() {
        let fx = fixture(Ok("answer".to_string()), false, false);

        let handle = fx.engine.submit(doc_request("Transcript")).await.unwrap();
        wait_outcome(&fx.engine, &handle.id).await;

        let path = fx.engine.save_transcript(&handle.id).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("task started"));
        assert!(content.contains("task completed"));
    }
}
