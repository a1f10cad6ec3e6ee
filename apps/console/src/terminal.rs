use std::{
    fmt,
    io::{self, Write},
};

use chrono::Local;
use client_core::{ConsoleNotice, RenderSink, StepRecord, TaskView};
use shared::{
    domain::{TaskId, TaskStatus},
    protocol::TaskRecord,
};
use tracing::warn;

const PROMPT_PREVIEW: usize = 60;

/// Prints a task view as an append-only log: each render only writes what
/// changed since the previous one.
pub struct TerminalRenderer<W> {
    out: W,
    task_id: Option<TaskId>,
    printed_steps: usize,
    status: Option<TaskStatus>,
    prompt_printed: bool,
    summary_printed: bool,
    last_error: Option<String>,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            task_id: None,
            printed_steps: 0,
            status: None,
            prompt_printed: false,
            summary_printed: false,
            last_error: None,
        }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    fn line(&mut self, line: impl fmt::Display) {
        if let Err(err) = writeln!(self.out, "{line}") {
            warn!(error = %err, "terminal: write failed");
        }
    }

    fn switch_task(&mut self, task_id: Option<TaskId>) {
        self.printed_steps = 0;
        self.status = None;
        self.prompt_printed = false;
        self.summary_printed = false;
        self.last_error = None;
        if let Some(task_id) = &task_id {
            self.line(format_args!("== task {task_id}"));
        }
        self.task_id = task_id;
    }
}

impl<W: Write + Send> RenderSink for TerminalRenderer<W> {
    fn render(&mut self, view: &TaskView) {
        if view.task_id != self.task_id {
            self.switch_task(view.task_id.clone());
        }

        if view.steps.len() < self.printed_steps {
            self.line("-- task restarted");
            self.printed_steps = 0;
            self.summary_printed = false;
        }
        if !self.prompt_printed {
            if let Some(prompt) = &view.prompt {
                let browser = view.browser.map(|b| b.as_str()).unwrap_or("?");
                let max_steps = view
                    .max_steps
                    .map_or_else(|| "?".to_string(), |n| n.to_string());
                self.line(format_args!(
                    "prompt: {prompt} (browser {browser}, max {max_steps} steps)"
                ));
                self.prompt_printed = true;
            }
        }
        if self.status != Some(view.status) {
            self.line(format_args!("status: {}", view.status));
            self.status = Some(view.status);
        }
        for index in self.printed_steps..view.steps.len() {
            let text = format_step(&view.steps[index]);
            self.line(text);
        }
        self.printed_steps = view.steps.len();

        if !self.summary_printed {
            if let Some(summary) = &view.final_summary {
                self.line(format_args!("result: {summary}"));
                self.summary_printed = true;
            }
        }
        if view.last_error.is_some() && view.last_error != self.last_error {
            self.last_error = view.last_error.clone();
            if let Some(error) = &view.last_error {
                self.line(format_args!("error: {error}"));
            }
        }
    }

    fn notice(&mut self, notice: &ConsoleNotice) {
        self.line(format_args!("! {notice}"));
    }
}

pub fn format_step(step: &StepRecord) -> String {
    let mut text = format!("  #{} {}", step.step_number, step.url);
    if let Some(thought) = &step.thought {
        text.push_str(&format!("\n      thought: {thought}"));
    }
    text.push_str(&format!("\n      action: {}", step.action));
    if let Some(result) = &step.result {
        text.push_str(&format!("\n      result: {result}"));
    }
    text
}

pub fn format_task_row(task: &TaskRecord) -> String {
    let created = task
        .created_at_utc()
        .map_or_else(
            || "-".to_string(),
            |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        );
    let mut prompt: String = task.task_prompt.chars().take(PROMPT_PREVIEW).collect();
    if task.task_prompt.chars().count() > PROMPT_PREVIEW {
        prompt.push_str("...");
    }
    format!(
        "{:<36}  {:<9}  {created}  {prompt}",
        task.task_id.as_str(),
        task.status.as_str()
    )
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;
