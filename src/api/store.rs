use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::listing::JobListing;
use super::types::{
    ArtifactSpec, CostEstimate, CreateJobRequest, JobFilter, JobInfo, JobPage, ResultArtifact,
    StatusReport, UploadUrlRequest, UploadUrlResponse,
};
use crate::error::{SimError, TransportError, TransportErrorKind};
use crate::manifest::ManifestMetadata;
use crate::state_machine::{JobHandle, TaskType};
use crate::transport::{RequestBody, TransportClient};

/// Logical job operations mapped onto the remote API.
#[derive(Debug, Clone)]
pub struct JobStore {
    transport: TransportClient,
}

impl JobStore {
    pub fn new(transport: TransportClient) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    /// Registers a job shell. Schema rejections come back as
    /// [`SimError::Validation`] carrying the backend's message verbatim.
    pub async fn create_job(&self, metadata: &ManifestMetadata) -> Result<JobHandle, SimError> {
        let request = CreateJobRequest {
            task_name: &metadata.name,
            task_type: metadata.task_type,
            file_names: metadata.file_names.iter().map(String::as_str).collect(),
        };
        let response = self
            .transport
            .request(Method::POST, "tasks", Some(RequestBody::json(&request)?), &[])
            .await
            .map_err(validation_on_rejection)?;
        let info: JobInfo = decode(response, "create job").await?;
        info!(job_id = %info.task_id, name = %info.task_name, "job created");
        Ok(info.to_handle())
    }

    /// Streams one input file to object storage through a pre-signed URL.
    /// A failed transfer is restarted from the first byte.
    pub async fn upload_input(
        &self,
        job_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SimError> {
        let path = format!("{}/files", job_path(job_id)?);
        let response = self
            .transport
            .request(
                Method::POST,
                &path,
                Some(RequestBody::json(&UploadUrlRequest { file_name })?),
                &[],
            )
            .await?;
        let target: UploadUrlResponse = decode(response, "upload url").await?;

        let size = bytes.len();
        self.transport
            .request_url(
                Method::PUT,
                &target.upload_url,
                Some(RequestBody::octets(bytes)),
                &[],
            )
            .await?;
        debug!(job_id, file_name, size, "input uploaded");
        Ok(())
    }

    /// Marks the job as submitted. Inputs must already be uploaded.
    pub async fn start_job(&self, job_id: &str) -> Result<(), SimError> {
        let path = format!("{}/submit", job_path(job_id)?);
        self.transport
            .request(Method::POST, &path, None, &[])
            .await?;
        info!(job_id, "job submitted");
        Ok(())
    }

    pub async fn get_status(&self, job_id: &str) -> Result<StatusReport, SimError> {
        let path = format!("{}/status", job_path(job_id)?);
        let response = self
            .transport
            .request(Method::GET, &path, None, &[])
            .await?;
        decode(response, "status").await
    }

    pub async fn get_info(&self, job_id: &str) -> Result<JobInfo, SimError> {
        let path = job_path(job_id)?;
        let response = self
            .transport
            .request(Method::GET, &path, None, &[])
            .await?;
        decode(response, "job info").await
    }

    /// Lazy listing. Each call starts over from the first page.
    pub fn list_jobs(&self, filter: JobFilter) -> JobListing {
        JobListing::new(self.clone(), filter)
    }

    pub(crate) async fn list_page(
        &self,
        filter: &JobFilter,
        offset: u64,
    ) -> Result<JobPage, SimError> {
        let response = self
            .transport
            .request_query(Method::GET, "tasks", &filter.query(offset), None, &[])
            .await?;
        decode(response, "job list").await
    }

    /// Deletes a job. Deleting a job that no longer exists succeeds.
    pub async fn delete_job(&self, job_id: &str) -> Result<(), SimError> {
        let path = job_path(job_id)?;
        match self
            .transport
            .request(Method::DELETE, &path, None, &[])
            .await
        {
            Ok(_) => {
                info!(job_id, "job deleted");
                Ok(())
            }
            Err(SimError::Transport(TransportError {
                kind: TransportErrorKind::Rejected,
                status: Some(404) | Some(410),
                ..
            })) => {
                debug!(job_id, "job already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Asks the backend to cancel a job that has not finished yet.
    pub async fn abort_job(&self, job_id: &str) -> Result<(), SimError> {
        let path = format!("{}/abort", job_path(job_id)?);
        self.transport
            .request(Method::POST, &path, None, &[])
            .await?;
        info!(job_id, "job abort requested");
        Ok(())
    }

    pub async fn get_artifact(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
    ) -> Result<ResultArtifact, SimError> {
        let path = format!("{}/artifacts/{}", job_path(job_id)?, artifact.name);
        let response = self
            .transport
            .request(Method::GET, &path, None, &[])
            .await?;
        let descriptor: ResultArtifact = decode(response, "artifact").await?;
        if !is_sha256_hex(&descriptor.content_hash) {
            return Err(SimError::Validation(format!(
                "artifact {} has malformed content hash {:?}",
                descriptor.artifact_id, descriptor.content_hash
            )));
        }
        Ok(descriptor)
    }

    /// Opens the artifact's pre-signed URL. The caller streams the body.
    pub async fn open_download(&self, artifact: &ResultArtifact) -> Result<Response, SimError> {
        self.transport
            .request_url(Method::GET, &artifact.storage_uri, None, &[])
            .await
    }

    pub async fn estimate_cost(
        &self,
        task_type: TaskType,
        manifest: Vec<u8>,
    ) -> Result<f64, SimError> {
        let response = self
            .transport
            .request_query(
                Method::POST,
                "tasks/estimate",
                &[("task_type", task_type.as_str().to_string())],
                Some(RequestBody::Json(manifest)),
                &[],
            )
            .await
            .map_err(validation_on_rejection)?;
        let estimate: CostEstimate = decode(response, "cost estimate").await?;
        Ok(estimate.estimated_cost)
    }
}

fn job_path(job_id: &str) -> Result<String, SimError> {
    if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(SimError::Validation(format!("invalid job id {job_id:?}")));
    }
    Ok(format!("tasks/{job_id}"))
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Backend schema rejections (400/422) become validation errors.
fn validation_on_rejection(err: SimError) -> SimError {
    match err {
        SimError::Transport(TransportError {
            kind: TransportErrorKind::Rejected,
            status: Some(status),
            message,
        }) if status == StatusCode::BAD_REQUEST.as_u16()
            || status == StatusCode::UNPROCESSABLE_ENTITY.as_u16() =>
        {
            SimError::Validation(message)
        }
        other => other,
    }
}

/// Strict decode of a JSON response body.
async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, SimError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| {
        TransportError::rejected(Some(status), format!("failed to read {what} response: {e}"))
    })?;
    serde_json::from_slice(&body)
        .map_err(|e| SimError::Validation(format!("malformed {what} response: {e}")))
}
