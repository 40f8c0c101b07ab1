use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use desk_agent::config::{
    config_handle, ensure_directories, ConfigStore, ProviderKind, YamlConfigStore,
};
use desk_agent::engine::TaskEngine;
use desk_agent::providers::{ChatProvider, LocalServerProvider};
use desk_agent::wizard::WizardSession;
use desk_agent_sdk::{
    LogLevel, SlideContent, TaskOutcome, TaskOutput, TaskPayload, TaskRequest, TaskRuntime,
    TaskUpdate, TextTask,
};

#[derive(Parser)]
#[command(name = "desk-agent", about = "Desktop assistant core", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log filter (e.g. info, desk_agent=debug)
    #[arg(long, env = "DESK_AGENT_LOG", default_value = "warn")]
    log: String,

    /// Config file path override
    #[arg(long, env = "DESK_AGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the setup wizard (first run or reconfiguration)
    Setup,
    /// Show the current configuration with secrets masked
    Config,
    /// Generate a document
    Doc {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        filename: Option<String>,
    },
    /// Generate a presentation; each --slide is "Title|line one;line two"
    Slides {
        #[arg(long)]
        title: String,
        #[arg(long = "slide", required = true)]
        slides: Vec<String>,
    },
    /// Scrape a web page
    Scrape {
        url: String,
        #[arg(long)]
        selector: Option<String>,
        /// Print the structured result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the configured language model
    Ask {
        prompt: String,
        #[arg(long)]
        system: Option<String>,
    },
    /// Run a text-processing mode over the given text
    Process {
        #[arg(long, value_enum)]
        mode: ProcessMode,
        text: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProcessMode {
    Analyze,
    Summarize,
    Translate,
    Improve,
    ExtractKeywords,
}

impl From<ProcessMode> for TextTask {
    fn from(mode: ProcessMode) -> Self {
        match mode {
            ProcessMode::Analyze => TextTask::Analyze,
            ProcessMode::Summarize => TextTask::Summarize,
            ProcessMode::Translate => TextTask::Translate,
            ProcessMode::Improve => TextTask::Improve,
            ProcessMode::ExtractKeywords => TextTask::ExtractKeywords,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .compact()
        .init();

    let store = match args.config {
        Some(path) => YamlConfigStore::new(path),
        None => YamlConfigStore::at_default_location(),
    };

    match args.command {
        Command::Setup => run_setup(&store).await,
        Command::Config => show_config(&store),
        Command::Doc {
            title,
            content,
            filename,
        } => {
            run_task(
                &store,
                TaskPayload::GenerateDocument {
                    title,
                    content,
                    filename,
                },
            )
            .await
        }
        Command::Slides { title, slides } => {
            let slides = slides.iter().map(|raw| parse_slide(raw)).collect();
            run_task(&store, TaskPayload::GeneratePresentation { title, slides }).await
        }
        Command::Scrape {
            url,
            selector,
            json,
        } => run_task_with(&store, TaskPayload::Scrape { url, selector }, json).await,
        Command::Ask { prompt, system } => {
            run_task(&store, TaskPayload::LlmQuery { prompt, system }).await
        }
        Command::Process { mode, text } => {
            run_task(
                &store,
                TaskPayload::ProcessText {
                    text,
                    mode: mode.into(),
                },
            )
            .await
        }
    }
}

/// Drive the wizard state machine over terminal prompts
async fn run_setup(store: &YamlConfigStore) -> Result<()> {
    let existing = store.load()?;
    let reconfiguring = existing.is_some();
    let live = config_handle(existing.clone().unwrap_or_default());
    let mut session = match &existing {
        Some(config) => WizardSession::resume(config),
        None => WizardSession::start(),
    };

    println!("{}", style("desk-agent setup").cyan().bold());
    if reconfiguring {
        println!("  Existing configuration found; fields are pre-filled.");
    }
    session.begin()?;

    loop {
        let items = [
            "Remote (OpenAI-style API)",
            "Local server (LM Studio-style)",
        ];
        let default_index = match session.suggested_provider() {
            ProviderKind::Remote => 0,
            ProviderKind::Local => 1,
        };
        let picked = Select::new()
            .with_prompt("LLM provider")
            .items(&items)
            .default(default_index)
            .interact()?;
        let kind = if picked == 0 {
            ProviderKind::Remote
        } else {
            ProviderKind::Local
        };
        session.choose_provider(kind)?;

        match kind {
            ProviderKind::Remote => {
                let api_key: String = Input::new()
                    .with_prompt("OpenAI API key")
                    .with_initial_text(session.field("api_key").to_string())
                    .allow_empty(true)
                    .interact_text()?;
                session.set_field("api_key", api_key)?;
                let model: String = Input::new()
                    .with_prompt("Model")
                    .with_initial_text(session.field("model").to_string())
                    .allow_empty(true)
                    .interact_text()?;
                session.set_field("model", model)?;
            }
            ProviderKind::Local => {
                let base_url: String = Input::new()
                    .with_prompt("Server URL")
                    .with_initial_text(session.field("base_url").to_string())
                    .allow_empty(true)
                    .interact_text()?;
                session.set_field("base_url", base_url)?;
                let model: String = Input::new()
                    .with_prompt("Model name")
                    .with_initial_text(session.field("model").to_string())
                    .allow_empty(true)
                    .interact_text()?;
                session.set_field("model", model)?;
            }
        }

        match session.advance_to_summary() {
            Ok(()) => break,
            Err(errors) => {
                for error in errors {
                    println!("  {} {}", style("✗").red(), error);
                }
                session.back_to_provider_choice()?;
            }
        }
    }

    let summary = session.summary()?;
    println!();
    println!("{}", style("Summary").bold());
    println!("  Provider: {}", summary.provider);
    println!("  Model:    {}", summary.model);
    if let Some(masked) = &summary.api_key_masked {
        println!("  API key:  {masked}");
    }
    if let Some(base_url) = &summary.base_url {
        println!("  Server:   {base_url}");
    }

    if summary.provider == ProviderKind::Local {
        let test = Confirm::new()
            .with_prompt("Test the connection now?")
            .default(false)
            .interact()?;
        if test {
            let provider =
                LocalServerProvider::new(session.local_draft(), Duration::from_secs(10))?;
            match provider.probe().await {
                Ok(()) => println!("  {} server responded", style("✓").green()),
                Err(e) => println!("  {} {e}", style("✗").red()),
            }
        }
    }

    let save = Confirm::new()
        .with_prompt("Save this configuration?")
        .default(true)
        .interact()?;
    if !save {
        session.cancel();
        println!("Setup cancelled; nothing was written.");
        return Ok(());
    }

    loop {
        match session.commit(store, &live) {
            Ok(config) => {
                ensure_directories(&config)?;
                println!(
                    "{} Saved: {}",
                    style("✓").green(),
                    store.path().display()
                );
                return Ok(());
            }
            Err(e) => {
                println!("  {} save failed: {e}", style("✗").red());
                let retry = Confirm::new()
                    .with_prompt("Retry saving?")
                    .default(true)
                    .interact()?;
                if !retry {
                    session.cancel();
                    println!("Setup cancelled; nothing was written.");
                    return Ok(());
                }
            }
        }
    }
}

fn show_config(store: &YamlConfigStore) -> Result<()> {
    let config = store
        .load()?
        .context("no configuration found; run `desk-agent setup` first")?;

    println!("Config file: {}", store.path().display());
    println!("Provider:    {}", config.provider);
    match config.provider {
        ProviderKind::Remote => {
            println!("API key:     {}", config.masked_api_key());
            println!("Model:       {}", config.remote.model);
        }
        ProviderKind::Local => {
            println!("Server URL:  {}", config.local.base_url);
            println!("Model:       {}", config.local.model);
        }
    }
    println!("Documents:   {}", config.paths.documents.display());
    println!("Slides:      {}", config.paths.presentations.display());
    println!("Logs:        {}", config.paths.logs.display());
    Ok(())
}

async fn run_task(store: &YamlConfigStore, payload: TaskPayload) -> Result<()> {
    run_task_with(store, payload, false).await
}

/// Submit one task and stream its updates until the terminal outcome.
/// Ctrl-C requests cooperative cancellation instead of killing the process.
async fn run_task_with(store: &YamlConfigStore, payload: TaskPayload, json: bool) -> Result<()> {
    let mut config = store
        .load()?
        .context("no configuration found; run `desk-agent setup` first")?;
    config.apply_env_overrides();
    ensure_directories(&config)?;

    let engine = TaskEngine::new(config_handle(config))?;
    let handle = engine
        .submit(TaskRequest::new(payload))
        .await
        .map_err(|e| anyhow!("{e}"))?;
    let mut updates = engine
        .subscribe(&handle.id)
        .await
        .map_err(|e| anyhow!("{e}"))?;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(TaskUpdate::Log { event }) => print_event(event.level, &event.message),
                Ok(TaskUpdate::Finished { outcome, .. }) => return report_outcome(outcome, json),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    bail!("task stream closed without a terminal outcome")
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", style("cancellation requested…").yellow());
                let _ = engine.cancel(&handle.id).await;
            }
        }
    }
}

fn print_event(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => eprintln!("{}", style(message).dim()),
        LogLevel::Info => eprintln!("{} {message}", style("→").cyan()),
        LogLevel::Warn => eprintln!("{} {message}", style("⚠").yellow()),
        LogLevel::Error => eprintln!("{} {message}", style("✗").red()),
    }
}

fn report_outcome(outcome: TaskOutcome, json: bool) -> Result<()> {
    match outcome {
        TaskOutcome::Success { output } => {
            match output {
                TaskOutput::Document { path } | TaskOutput::Presentation { path } => {
                    println!("{} Saved: {}", style("✓").green(), path.display());
                }
                TaskOutput::Page { data } if json => {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
                TaskOutput::Page { data } => {
                    println!(
                        "{} {} ({})",
                        style("✓").green(),
                        data.title.as_deref().unwrap_or("untitled page"),
                        data.url
                    );
                    if let Some(selected) = &data.selected {
                        for fragment in selected {
                            println!("  - {fragment}");
                        }
                    } else {
                        for link in &data.links {
                            println!("  - [{}] {}", link.text, link.href);
                        }
                        let preview: String = data.text.chars().take(500).collect();
                        if !preview.is_empty() {
                            println!("\n{preview}");
                        }
                    }
                }
                TaskOutput::LlmResponse { text } | TaskOutput::ProcessedText { text } => {
                    println!("{text}");
                }
            }
            Ok(())
        }
        TaskOutcome::Failed { error } => bail!("task failed: {error}"),
        TaskOutcome::Cancelled => {
            println!("{}", style("task cancelled").yellow());
            Ok(())
        }
    }
}

/// `"Title|line one;line two"` → one slide; a bare string becomes content
/// under a generic title
fn parse_slide(raw: &str) -> SlideContent {
    match raw.split_once('|') {
        Some((title, content)) => SlideContent {
            title: title.trim().to_string(),
            content: content.replace(';', "\n"),
        },
        None => SlideContent {
            title: "Slide".to_string(),
            content: raw.to_string(),
        },
    }
}
