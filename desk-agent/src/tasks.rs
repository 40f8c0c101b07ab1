//! Task bodies, one per [`TaskKind`].
//!
//! Each body runs inside an engine worker, reports progress through the
//! worker's [`Reporter`], and checks the cooperative cancellation flag
//! between logical steps: before a provider call, before a render or write.
//! Cancellation after an irrevocable side effect is acknowledged but not
//! undone.

use crate::config::Configuration;
use crate::documents::DocumentRenderer;
use crate::engine::{ProviderFactory, Reporter};
use crate::scrape::PageFetcher;
use desk_agent_sdk::{
    SlideContent, TaskError, TaskHandle, TaskOutput, TaskPayload, TaskRequest, TextTask,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a worker needs to run one task
pub(crate) struct WorkerContext {
    pub config: Configuration,
    pub handle: TaskHandle,
    pub reporter: Reporter,
    pub provider_factory: ProviderFactory,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub fetcher: Arc<dyn PageFetcher>,
}

/// Non-error body result: either a kind-specific output or an honored
/// cancellation request
pub(crate) enum TaskRun {
    Done(TaskOutput),
    Cancelled,
}

macro_rules! checkpoint {
    ($ctx:expr) => {
        if $ctx.handle.cancel_requested() {
            return Ok(TaskRun::Cancelled);
        }
    };
}

pub(crate) async fn run(request: &TaskRequest, ctx: &WorkerContext) -> Result<TaskRun, TaskError> {
    match &request.payload {
        TaskPayload::GenerateDocument {
            title,
            content,
            filename,
        } => generate_document(ctx, title, content, filename.as_deref()).await,
        TaskPayload::GeneratePresentation { title, slides } => {
            generate_presentation(ctx, title, slides).await
        }
        TaskPayload::Scrape { url, selector } => scrape(ctx, url, selector.as_deref()).await,
        TaskPayload::LlmQuery { prompt, system } => {
            llm_query(ctx, prompt, system.as_deref()).await
        }
        TaskPayload::ProcessText { text, mode } => process_text(ctx, text, *mode).await,
    }
}

async fn generate_document(
    ctx: &WorkerContext,
    title: &str,
    content: &str,
    filename: Option<&str>,
) -> Result<TaskRun, TaskError> {
    ctx.reporter.info(format!("Generating document '{title}'"));

    let path = output_path(
        &ctx.config.paths.documents,
        filename,
        ctx.handle.kind.slug(),
        &ctx.handle.id,
    );

    checkpoint!(ctx);
    ctx.renderer
        .render_document(title, content, &path)
        .map_err(|e| TaskError::Render(e.to_string()))?;

    ctx.reporter
        .info(format!("Document written to {}", path.display()));
    Ok(TaskRun::Done(TaskOutput::Document { path }))
}

async fn generate_presentation(
    ctx: &WorkerContext,
    title: &str,
    slides: &[SlideContent],
) -> Result<TaskRun, TaskError> {
    ctx.reporter.info(format!(
        "Generating presentation '{title}' ({} slides)",
        slides.len()
    ));

    let path = output_path(
        &ctx.config.paths.presentations,
        None,
        ctx.handle.kind.slug(),
        &ctx.handle.id,
    );

    checkpoint!(ctx);
    ctx.renderer
        .render_presentation(title, slides, &path)
        .map_err(|e| TaskError::Render(e.to_string()))?;

    ctx.reporter
        .info(format!("Presentation written to {}", path.display()));
    Ok(TaskRun::Done(TaskOutput::Presentation { path }))
}

async fn scrape(
    ctx: &WorkerContext,
    url: &str,
    selector: Option<&str>,
) -> Result<TaskRun, TaskError> {
    ctx.reporter.info(format!("Fetching {url}"));

    checkpoint!(ctx);
    let data = ctx
        .fetcher
        .fetch(url, selector)
        .await
        .map_err(|e| TaskError::Fetch(e.to_string()))?;

    ctx.reporter.info(format!(
        "Fetched {} ({} bytes, {} links)",
        data.title.as_deref().unwrap_or("untitled page"),
        data.content_length,
        data.links.len()
    ));
    Ok(TaskRun::Done(TaskOutput::Page { data }))
}

async fn llm_query(
    ctx: &WorkerContext,
    prompt: &str,
    system: Option<&str>,
) -> Result<TaskRun, TaskError> {
    let provider = (ctx.provider_factory)(&ctx.config)
        .map_err(|e| TaskError::Internal(format!("provider setup failed: {e}")))?;

    ctx.reporter.info("Querying language model");
    checkpoint!(ctx);

    let text = provider.query(prompt, system).await?;
    ctx.reporter
        .info(format!("Received {} characters", text.len()));
    Ok(TaskRun::Done(TaskOutput::LlmResponse { text }))
}

const PROCESS_SYSTEM: &str =
    "You are an expert text-processing assistant. Provide clear, useful answers.";

fn prompt_for(mode: TextTask) -> &'static str {
    match mode {
        TextTask::Analyze => {
            "Analyze the following text and provide a detailed summary of the key points:"
        }
        TextTask::Summarize => "Summarize the following text concisely:",
        TextTask::Translate => "Translate the following text to Spanish:",
        TextTask::Improve => "Improve the wording and clarity of the following text:",
        TextTask::ExtractKeywords => {
            "Extract the most important keywords from the following text:"
        }
    }
}

async fn process_text(
    ctx: &WorkerContext,
    text: &str,
    mode: TextTask,
) -> Result<TaskRun, TaskError> {
    let provider = (ctx.provider_factory)(&ctx.config)
        .map_err(|e| TaskError::Internal(format!("provider setup failed: {e}")))?;

    ctx.reporter.info(format!("Processing text ({mode:?})"));
    checkpoint!(ctx);

    let prompt = format!("{}\n\n{}", prompt_for(mode), text);
    let result = provider.query(&prompt, Some(PROCESS_SYSTEM)).await?;
    Ok(TaskRun::Done(TaskOutput::ProcessedText { text: result }))
}

/// Resolve a collision-free output path from the task kind and id. A caller
/// filename contributes its stem only; the short id suffix stays.
pub(crate) fn output_path(
    dir: &Path,
    filename: Option<&str>,
    slug: &str,
    task_id: &Uuid,
) -> PathBuf {
    let stem = match filename {
        Some(name) => sanitize_stem(name),
        None => format!("{}_{}", slug, chrono::Local::now().format("%Y%m%d_%H%M%S")),
    };
    let short = &task_id.simple().to_string()[..8];
    dir.join(format!("{stem}_{short}.md"))
}

fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "output".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_differ_per_task_id() {
        let dir = Path::new("/tmp/docs");
        let a = output_path(dir, Some("report.docx"), "document", &Uuid::new_v4());
        let b = output_path(dir, Some("report.docx"), "document", &Uuid::new_v4());
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("report_"));
        assert!(a.to_string_lossy().ends_with(".md"));
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("my report (v2).docx"), "my_report__v2_");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("..."), "output");
    }

    #[test]
    fn each_mode_has_a_distinct_prompt() {
        let modes = [
            TextTask::Analyze,
            TextTask::Summarize,
            TextTask::Translate,
            TextTask::Improve,
            TextTask::ExtractKeywords,
        ];
        let prompts: std::collections::HashSet<_> =
            modes.iter().map(|m| prompt_for(*m)).collect();
        assert_eq!(prompts.len(), modes.len());
    }
}
