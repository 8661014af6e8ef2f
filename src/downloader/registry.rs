use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use super::{DownloadSnapshot, DownloadStatus, DownloadTask};

/// Lock-protected task map shared by the manager front end (reads) and its
/// workers (writes). Each task is only ever written by the worker running it,
/// apart from cancellation.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, DownloadTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: DownloadTask) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.clone(), task);
    }

    pub async fn get(&self, task_id: &str) -> Option<DownloadTask> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).cloned()
    }

    pub async fn snapshot(&self, task_id: &str) -> Option<DownloadSnapshot> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).map(DownloadTask::snapshot)
    }

    /// All snapshots, oldest task first.
    pub async fn list(&self) -> Vec<DownloadSnapshot> {
        let tasks = self.tasks.read().await;
        let mut task_list: Vec<&DownloadTask> = tasks.values().collect();
        task_list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        task_list.into_iter().map(DownloadTask::snapshot).collect()
    }

    /// Applies `change` unless the task is unknown or was cancelled.
    pub async fn update<F>(&self, task_id: &str, change: F) -> bool
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) if task.status != DownloadStatus::Cancelled => {
                change(task);
                true
            }
            _ => false,
        }
    }

    /// Marks a task cancelled whatever state it is in.
    pub async fn cancel(&self, task_id: &str, reason: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) => {
                task.status = DownloadStatus::Cancelled;
                task.error = Some(reason.to_string());
                task.speed = None;
                task.eta = None;
                task.finished_at = Some(chrono::Utc::now());
                true
            }
            None => false,
        }
    }

    pub async fn is_cancelled(&self, task_id: &str) -> bool {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|task| task.status == DownloadStatus::Cancelled)
            .unwrap_or(false)
    }

    /// Drops terminal tasks that finished before `cutoff`.
    pub async fn remove_finished_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.finished_at.map(|at| at < cutoff).unwrap_or(false))
        });
        before - tasks.len()
    }
}
