use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Kind of solver a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Fdtd,
    ModeSolver,
    Heat,
    Eme,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Fdtd => "FDTD",
            TaskType::ModeSolver => "MODE_SOLVER",
            TaskType::Heat => "HEAT",
            TaskType::Eme => "EME",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side view of one remote job.
///
/// `job_id` is assigned by the server and never changes. The status is only
/// ever replaced with a value the server reported, through the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub name: String,
    status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub task_type: TaskType,
    /// Backend diagnostic accompanying the latest status, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

impl JobHandle {
    pub fn new(
        job_id: String,
        name: String,
        status: JobStatus,
        created_at: DateTime<Utc>,
        task_type: TaskType,
    ) -> Self {
        Self {
            job_id,
            name,
            status,
            created_at,
            task_type,
            diagnostic: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a server-reported status. Callers must have validated the
    /// transition with a [`StatusTracker`](super::StatusTracker).
    pub(crate) fn record_status(&mut self, status: JobStatus, diagnostic: Option<String>) {
        self.status = status;
        if diagnostic.is_some() {
            self.diagnostic = diagnostic;
        }
    }
}
