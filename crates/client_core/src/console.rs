//! Wires task catalog actions to the session coordinator.

use anyhow::Result;
use shared::{
    domain::TaskId,
    protocol::{ListTasksQuery, StartTaskRequest, TaskRecord},
};
use tracing::info;

use crate::{
    catalog::{hydrate_view, TaskCatalog},
    coordinator::SessionCoordinator,
    render::RenderSink,
};

/// How a selected task ended up on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Streaming live; the task has not finished yet.
    Live,
    /// Rendered once from stored history.
    Snapshot,
}

pub struct TaskConsole<C, R> {
    catalog: C,
    coordinator: SessionCoordinator<R>,
}

impl<C: TaskCatalog, R: RenderSink> TaskConsole<C, R> {
    pub fn new(catalog: C, coordinator: SessionCoordinator<R>) -> Self {
        Self {
            catalog,
            coordinator,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn coordinator(&self) -> &SessionCoordinator<R> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut SessionCoordinator<R> {
        &mut self.coordinator
    }

    /// Submits a new task and starts following it.
    pub async fn create_task(&mut self, request: &StartTaskRequest) -> Result<TaskId> {
        let task_id = self.catalog.create_task(request).await?;
        self.coordinator.observe(task_id.clone()).await;
        Ok(task_id)
    }

    pub async fn select_task(&mut self, task_id: &TaskId) -> Result<Selection> {
        let status = self.catalog.task_status(task_id).await?;
        if !status.is_terminal() {
            self.coordinator.observe(task_id.clone()).await;
            return Ok(Selection::Live);
        }

        info!(task_id = %task_id, status = %status, "console: task finished, loading history");
        let history = self.catalog.task_history(task_id).await?;
        self.coordinator
            .show_snapshot(hydrate_view(task_id.clone(), status, history))
            .await;
        Ok(Selection::Snapshot)
    }

    pub async fn list_tasks(&self, query: &ListTasksQuery) -> Result<Vec<TaskRecord>> {
        self.catalog.list_tasks(query).await
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
