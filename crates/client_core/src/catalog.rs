//! REST client for the task backend: create, list, status and history.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use shared::{
    domain::{TaskId, TaskStatus},
    error::BackendError,
    protocol::{
        ListTasksQuery, StartTaskRequest, StartTaskResponse, TaskOutput, TaskRecord,
        TaskStatusResponse,
    },
};
use tracing::{debug, info};
use url::Url;

use crate::view::{StepRecord, TaskView};

#[async_trait]
pub trait TaskCatalog: Send + Sync {
    async fn create_task(&self, request: &StartTaskRequest) -> Result<TaskId>;

    /// Newest first.
    async fn list_tasks(&self, query: &ListTasksQuery) -> Result<Vec<TaskRecord>>;

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    async fn task_history(&self, task_id: &TaskId) -> Result<Vec<TaskOutput>>;

    /// Static view of a task assembled from its status and stored outputs.
    async fn task_detail(&self, task_id: &TaskId) -> Result<TaskView> {
        let status = self.task_status(task_id).await?;
        let history = self.task_history(task_id).await?;
        Ok(hydrate_view(task_id.clone(), status, history))
    }
}

#[derive(Debug, Clone)]
pub struct HttpTaskCatalog {
    http: Client,
    base_url: Url,
}

impl HttpTaskCatalog {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid backend url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            bail!("backend url {base_url} cannot carry a path");
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Turns a non-2xx response into an error carrying the backend's message.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            debug!(status = %status, error = %err, "catalog: failed to read error body");
            String::new()
        }
    };
    let message = serde_json::from_str::<BackendError>(&body)
        .map(|err| err.error)
        .unwrap_or(body);
    bail!("task backend returned {status}: {message}")
}

#[async_trait]
impl TaskCatalog for HttpTaskCatalog {
    async fn create_task(&self, request: &StartTaskRequest) -> Result<TaskId> {
        let url = self.endpoint(&["tasks", "start"])?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .context("failed to reach task backend")?;
        let body: StartTaskResponse = checked(response)
            .await?
            .json()
            .await
            .context("invalid start task response")?;

        if !body.success {
            bail!("task backend refused the task: {}", body.message);
        }
        let task_id = TaskId::new(body.task_id);
        if task_id.is_blank() {
            bail!("task backend returned an empty task id");
        }
        info!(task_id = %task_id, browser = %request.browser_name, "catalog: task created");
        Ok(task_id)
    }

    async fn list_tasks(&self, query: &ListTasksQuery) -> Result<Vec<TaskRecord>> {
        let url = self.endpoint(&["tasks"])?;
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .context("failed to reach task backend")?;
        let mut tasks: Vec<TaskRecord> = checked(response)
            .await?
            .json()
            .await
            .context("invalid task list response")?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let url = self.endpoint(&["tasks", task_id.as_str(), "status"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach task backend")?;
        let body: TaskStatusResponse = checked(response)
            .await?
            .json()
            .await
            .context("invalid task status response")?;

        if !body.success {
            bail!("status lookup for task {task_id} failed: {}", body.message);
        }
        body.status
            .parse()
            .with_context(|| format!("task {task_id} has an unusable status"))
    }

    async fn task_history(&self, task_id: &TaskId) -> Result<Vec<TaskOutput>> {
        let url = self.endpoint(&["tasks", task_id.as_str(), "history"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach task backend")?;
        checked(response)
            .await?
            .json()
            .await
            .context("invalid task history response")
    }
}

/// Folds stored task outputs into a view, ordered by step number then
/// timestamp.
pub fn hydrate_view(task_id: TaskId, status: TaskStatus, mut outputs: Vec<TaskOutput>) -> TaskView {
    outputs.sort_by_key(|output| (output.step_number, output.timestamp));

    let mut view = TaskView::for_task(task_id);
    for output in outputs {
        match output.output_type.as_str() {
            "step" => view.steps.push(step_record(&output)),
            "final_result" | "result" => view.final_summary = Some(output_text(&output.step_data)),
            "error" => view.last_error = Some(output_text(&output.step_data)),
            other => debug!(
                task_id = %output.task_id,
                output_type = other,
                "catalog: skipping history output"
            ),
        }
    }
    view.status = status;
    if status.is_terminal() {
        view.mark_completed();
    }
    view
}

fn step_record(output: &TaskOutput) -> StepRecord {
    let mut record = StepRecord {
        step_number: output.step_number,
        url: String::new(),
        thought: None,
        action: Value::Null,
        result: None,
    };
    match serde_json::from_str::<Value>(&output.step_data) {
        Ok(Value::Object(mut fields)) => {
            if let Some(Value::String(url)) = fields.remove("url") {
                record.url = url;
            }
            if let Some(Value::String(thought)) = fields.remove("thought") {
                record.thought = Some(thought);
            }
            record.result = fields.remove("result").filter(|value| !value.is_null());
            record.action = match fields.remove("action") {
                Some(action) => action,
                None => Value::Object(fields),
            };
        }
        Ok(other) => record.action = other,
        Err(_) => record.action = Value::String(output.step_data.clone()),
    }
    record
}

fn output_text(step_data: &str) -> String {
    match serde_json::from_str::<Value>(step_data) {
        Ok(Value::String(text)) => text,
        _ => step_data.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
