//! Task registry: shared lifecycle state for submitted OCR jobs.
//!
//! Every submission gets an opaque id and a `Task` entry behind one lock.
//! Status moves exactly once from `Processing` to a terminal state; a late
//! transition against a terminal task is ignored and reported to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

use crate::ocr::OcrResults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }

    /// Parse from a query parameter string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A submitted OCR job and everything recorded about it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub filename: String,
    pub staged_path: PathBuf,
    pub language: String,
    pub use_gpu: bool,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    pub result: Option<OcrResults>,
}

/// What intake hands the registry once a file passed validation and staging.
#[derive(Debug, Clone)]
pub struct Submission {
    pub filename: String,
    pub staged_path: PathBuf,
    pub language: String,
    pub use_gpu: bool,
}

/// Summary row for the task listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub language: String,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `Processing` state and return its id.
    pub fn create(&self, submission: Submission) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let task = Task {
            id: id.clone(),
            status: TaskStatus::Processing,
            filename: submission.filename,
            staged_path: submission.staged_path,
            language: submission.language,
            use_gpu: submission.use_gpu,
            created_at: Utc::now(),
            error: None,
            result: None,
        };
        self.tasks
            .write()
            .expect("task registry lock poisoned")
            .insert(id.clone(), task);
        id
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks
            .read()
            .expect("task registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Record a successful OCR result. Returns false if the task is unknown
    /// or already terminal; the result is not written in either case.
    pub fn complete(&self, id: &str, results: OcrResults) -> bool {
        let mut tasks = self.tasks.write().expect("task registry lock poisoned");
        match tasks.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                task.result = Some(results);
                task.status = TaskStatus::Completed;
                true
            }
            _ => false,
        }
    }

    /// Record an OCR failure. Same terminal-state rules as [`complete`].
    ///
    /// [`complete`]: TaskRegistry::complete
    pub fn fail(&self, id: &str, message: String) -> bool {
        let mut tasks = self.tasks.write().expect("task registry lock poisoned");
        match tasks.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                task.error = Some(message);
                task.status = TaskStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Remove a task, returning it so the caller can clean up staged files.
    pub fn remove(&self, id: &str) -> Option<Task> {
        self.tasks
            .write()
            .expect("task registry lock poisoned")
            .remove(id)
    }

    /// Task summaries, newest first, optionally filtered by status.
    pub fn summaries(&self, status: Option<TaskStatus>) -> Vec<TaskSummary> {
        let tasks = self.tasks.read().expect("task registry lock poisoned");
        let mut summaries: Vec<TaskSummary> = tasks
            .values()
            .filter(|task| status.map_or(true, |wanted| task.status == wanted))
            .map(|task| TaskSummary {
                task_id: task.id.clone(),
                status: task.status,
                filename: task.filename.clone(),
                created_at: task.created_at,
                language: task.language.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }
}
