//! Shared task protocol for desk-agent surfaces.
//!
//! Any interactive surface (the CLI driver, a GUI shell, an IPC bridge) talks
//! to the task engine through the types here and the [`TaskRuntime`] trait.
//! The engine implementation lives in the `desk-agent` crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Kinds of work the engine knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GenerateDocument,
    GeneratePresentation,
    Scrape,
    LlmQuery,
    ProcessText,
}

impl TaskKind {
    /// Short stable name, used for display and output file naming
    pub fn slug(&self) -> &'static str {
        match self {
            TaskKind::GenerateDocument => "document",
            TaskKind::GeneratePresentation => "presentation",
            TaskKind::Scrape => "scrape",
            TaskKind::LlmQuery => "llm_query",
            TaskKind::ProcessText => "process_text",
        }
    }
}

/// One slide of a presentation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    pub title: String,
    pub content: String,
}

/// Text-processing modes, each backed by its own prompt template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextTask {
    Analyze,
    Summarize,
    Translate,
    Improve,
    ExtractKeywords,
}

/// Kind-specific task input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    GenerateDocument {
        title: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    GeneratePresentation {
        title: String,
        slides: Vec<SlideContent>,
    },
    Scrape {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    LlmQuery {
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        system: Option<String>,
    },
    ProcessText {
        text: String,
        mode: TextTask,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::GenerateDocument { .. } => TaskKind::GenerateDocument,
            TaskPayload::GeneratePresentation { .. } => TaskKind::GeneratePresentation,
            TaskPayload::Scrape { .. } => TaskKind::Scrape,
            TaskPayload::LlmQuery { .. } => TaskKind::LlmQuery,
            TaskPayload::ProcessText { .. } => TaskKind::ProcessText,
        }
    }
}

/// A submitted unit of work. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub payload: TaskPayload,
    pub submitted_at: chrono::DateTime<chrono::Local>,
}

impl TaskRequest {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            submitted_at: chrono::Local::now(),
        }
    }
}

/// Task lifecycle status for surface display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Severity of a task log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Ordered log/progress notification for a single task.
///
/// Sequence numbers are per task and non-decreasing; no ordering holds across
/// different tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub sequence: u64,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

/// A link found while scraping a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub text: String,
    pub href: String,
}

/// An image reference found while scraping a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    pub alt: String,
    pub src: String,
}

/// Structured result of a scrape task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<PageLink>,
    pub images: Vec<PageImage>,
    /// Present only when the request carried a selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,
    pub content_length: usize,
    pub fetched_at: chrono::DateTime<chrono::Local>,
}

/// Successful task result, one variant per kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOutput {
    Document { path: PathBuf },
    Presentation { path: PathBuf },
    Page { data: PageData },
    LlmResponse { text: String },
    ProcessedText { text: String },
}

/// Provider/task boundary failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ProviderError {
    #[error("authentication rejected by provider")]
    AuthFailed,
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("provider unreachable: {0}")]
    Unreachable(String),
}

/// Field-level rejection raised during wizard validation.
///
/// Never escapes the wizard: it blocks the transition and is handed back to
/// the surface for re-entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Classified terminal error for a task.
///
/// Payloads are plain strings so outcomes stay `Clone` across the broadcast
/// channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum TaskError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("render failed: {0}")]
    Render(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("io failed: {0}")]
    Io(String),
    #[error("task failed: {0}")]
    Internal(String),
}

/// Exactly one terminal outcome is recorded per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { output: TaskOutput },
    Failed { error: TaskError },
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Items delivered to event subscribers.
///
/// For a given task the stream is zero or more `Log` items in sequence order
/// followed by exactly one `Finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskUpdate {
    Log { event: TaskEvent },
    Finished { task_id: Uuid, outcome: TaskOutcome },
}

/// Handle returned on submission.
///
/// Carries the task identity and the cooperative cancellation flag; the
/// worker checks the flag between logical steps.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: Uuid,
    pub kind: TaskKind,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new(id: Uuid, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result type for runtime-level operations (unknown ids and the like)
pub type RuntimeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Runtime trait for task submission and observation.
/// This provides a unified API for any surface consuming the engine.
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Submit a task for background execution. Returns before work begins.
    async fn submit(&self, request: TaskRequest) -> RuntimeResult<TaskHandle>;

    /// Subscribe to live updates from a task
    async fn subscribe(
        &self,
        task_id: &Uuid,
    ) -> RuntimeResult<tokio::sync::broadcast::Receiver<TaskUpdate>>;

    /// Get buffered events for a task, newest-last, optionally limited
    async fn events(&self, task_id: &Uuid, limit: Option<usize>) -> RuntimeResult<Vec<TaskEvent>>;

    /// Current status of a task
    async fn status(&self, task_id: &Uuid) -> RuntimeResult<TaskStatus>;

    /// Terminal outcome, if the task has finished
    async fn outcome(&self, task_id: &Uuid) -> RuntimeResult<Option<TaskOutcome>>;

    /// Request cooperative cancellation of a running task
    async fn cancel(&self, task_id: &Uuid) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_mapping() {
        let payload = TaskPayload::LlmQuery {
            prompt: "hello".to_string(),
            system: None,
        };
        assert_eq!(payload.kind(), TaskKind::LlmQuery);

        let payload = TaskPayload::GenerateDocument {
            title: "t".to_string(),
            content: "c".to_string(),
            filename: None,
        };
        assert_eq!(payload.kind(), TaskKind::GenerateDocument);
    }

    #[test]
    fn outcome_status_mapping() {
        let ok = TaskOutcome::Success {
            output: TaskOutput::LlmResponse {
                text: "hi".to_string(),
            },
        };
        assert_eq!(ok.status(), TaskStatus::Completed);

        let failed = TaskOutcome::Failed {
            error: TaskError::Provider(ProviderError::Unreachable("refused".to_string())),
        };
        assert_eq!(failed.status(), TaskStatus::Failed);
        assert_eq!(TaskOutcome::Cancelled.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn handle_cancel_flag() {
        let handle = TaskHandle::new(Uuid::new_v4(), TaskKind::Scrape);
        assert!(!handle.cancel_requested());
        let clone = handle.clone();
        clone.request_cancel();
        // Clones share the flag
        assert!(handle.cancel_requested());
    }

    #[test]
    fn event_serde_round_trip() {
        let event = TaskEvent {
            task_id: Uuid::new_v4(),
            sequence: 3,
            level: LogLevel::Info,
            message: "step".to_string(),
            timestamp: chrono::Local::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence, 3);
        assert_eq!(back.message, "step");
    }
}
