//! Wire types for the job API.
//!
//! Every response type rejects unknown fields, so a payload that drifts from
//! the expected schema fails to decode instead of being silently defaulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{JobHandle, JobStatus, TaskType};

/// Full job record as returned by `GET /tasks/{id}` and the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobInfo {
    pub task_id: String,
    pub task_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub task_type: TaskType,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Billed cost, known once the job has finished.
    #[serde(default)]
    pub real_cost: Option<f64>,
}

impl JobInfo {
    pub fn to_handle(&self) -> JobHandle {
        let mut handle = JobHandle::new(
            self.task_id.clone(),
            self.task_name.clone(),
            self.status,
            self.created_at,
            self.task_type,
        );
        handle.record_status(self.status, self.error_message.clone());
        handle
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusReport {
    pub status: JobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest<'a> {
    pub task_name: &'a str,
    pub task_type: TaskType,
    pub file_names: Vec<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadUrlRequest<'a> {
    pub file_name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadUrlResponse {
    pub upload_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPage {
    pub tasks: Vec<JobInfo>,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostEstimate {
    pub estimated_cost: f64,
}

/// Descriptor of an output produced by a finished job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultArtifact {
    pub artifact_id: String,
    /// Lowercase hex SHA-256 of the artifact bytes.
    pub content_hash: String,
    pub size: u64,
    /// Pre-signed download URL.
    pub storage_uri: String,
}

/// Names one output of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
}

impl ArtifactSpec {
    pub const SIMULATION_DATA: &'static str = "simulation_data.hdf5";
    pub const SOLVER_LOG: &'static str = "output/solver.log";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn simulation_data() -> Self {
        Self::new(Self::SIMULATION_DATA)
    }

    pub fn solver_log() -> Self {
        Self::new(Self::SOLVER_LOG)
    }
}

impl Default for ArtifactSpec {
    fn default() -> Self {
        Self::simulation_data()
    }
}

/// Query for [`JobStore::list_jobs`](super::JobStore::list_jobs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub name: Option<String>,
    pub page_size: u32,
    /// Stop after this many jobs.
    pub limit: Option<usize>,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            name: None,
            page_size: 50,
            limit: None,
        }
    }
}

impl JobFilter {
    pub(crate) fn query(&self, offset: u64) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("offset", offset.to_string()),
            ("limit", self.page_size.max(1).to_string()),
        ];
        if let Some(status) = self.status {
            // Reuse the wire spelling of the status.
            let status = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            query.push(("status", status));
        }
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        query
    }
}
