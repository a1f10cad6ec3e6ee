use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    HttpTaskCatalog, RenderSink, Selection, SessionCoordinator, TaskCatalog, TaskConsole,
    WsStreamConnector,
};
use shared::{
    domain::{BrowserName, TaskId},
    protocol::{ListTasksQuery, StartTaskRequest},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use config::{load_settings, Settings};
use terminal::{format_task_row, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(name = "task-console", version, about = "Submit browser automation tasks and follow them live")]
struct Cli {
    /// Task backend base url, e.g. http://localhost:8501
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// Base url for live task streams; defaults to the backend url.
    #[arg(long, global = true)]
    stream_url: Option<String>,
    /// Resubscribe this many times when a stream drops mid-task.
    #[arg(long, global = true)]
    reconnect_attempts: Option<u32>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a task and follow it until it finishes.
    Start {
        #[arg(long, value_parser = non_blank)]
        prompt: String,
        #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u32).range(1..=1000))]
        max_steps: u32,
        #[arg(long, default_value_t = BrowserName::Chrome)]
        browser: BrowserName,
        #[arg(long)]
        user_id: Option<String>,
        /// Print the task id and exit instead of following.
        #[arg(long)]
        detach: bool,
    },
    /// List recent tasks, newest first.
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Follow a running task, or show a finished one.
    Watch { task_id: String },
    /// Show a task from its stored history.
    History { task_id: String },
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(v) = &self.backend_url {
            settings.backend_url = v.clone();
        }
        if let Some(v) = &self.stream_url {
            settings.stream_url = Some(v.clone());
        }
        if let Some(v) = self.reconnect_attempts {
            settings.reconnect_attempts = v;
        }
    }
}

fn non_blank(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        return Err("must not be empty".into());
    }
    Ok(raw.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings()?;
    cli.apply_overrides(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let catalog = HttpTaskCatalog::new(&settings.backend_url)?;
    let connector = WsStreamConnector::new(settings.stream_base())
        .with_context(|| format!("invalid stream url {}", settings.stream_base()))?;
    let coordinator = SessionCoordinator::new(Arc::new(connector), TerminalRenderer::stdout())
        .with_reconnect_policy(settings.reconnect_policy());
    let mut console = TaskConsole::new(catalog, coordinator);

    match cli.command {
        Command::Start {
            prompt,
            max_steps,
            browser,
            user_id,
            detach,
        } => {
            let mut request = StartTaskRequest::new(prompt, max_steps, browser);
            request.user_id = user_id.unwrap_or_else(|| settings.user_id.clone());
            if detach {
                let task_id = console.catalog().create_task(&request).await?;
                println!("{task_id}");
                return Ok(());
            }
            let task_id = console.create_task(&request).await?;
            info!(task_id = %task_id, "task submitted");
            follow(&mut console).await?;
        }
        Command::List {
            limit,
            offset,
            user_id,
        } => {
            let query = ListTasksQuery {
                limit: limit.unwrap_or(settings.list_limit),
                offset,
                user_id: user_id.unwrap_or(settings.user_id),
            };
            let tasks = console.list_tasks(&query).await?;
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in &tasks {
                println!("{}", format_task_row(task));
            }
        }
        Command::Watch { task_id } => {
            if console.select_task(&TaskId::from(task_id)).await? == Selection::Live {
                follow(&mut console).await?;
            }
        }
        Command::History { task_id } => {
            let view = console.catalog().task_detail(&TaskId::from(task_id)).await?;
            console.coordinator_mut().show_snapshot(view).await;
        }
    }

    Ok(())
}

/// Drives the live view until the task completes, the stream ends for good,
/// or the user interrupts.
async fn follow<C: TaskCatalog, R: RenderSink>(console: &mut TaskConsole<C, R>) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let coordinator = console.coordinator_mut();
        if coordinator.view().is_completed() || coordinator.is_idle() {
            break;
        }
        let interrupted = tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("failed to listen for ctrl-c")?;
                true
            }
            _ = coordinator.pump() => false,
        };
        if interrupted {
            info!("interrupted, closing task stream");
            break;
        }
    }

    console.coordinator_mut().stop().await;
    Ok(())
}
