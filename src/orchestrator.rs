//! Job lifecycle: submit, monitor, load, delete, estimate.
//!
//! [`JobOrchestrator`] only composes the lower layers. Status is never set
//! here; handles come back from the [`Poller`] or the [`JobStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::{ArtifactSpec, JobFilter, JobInfo, JobListing, JobStore};
use crate::auth::CredentialProvider;
use crate::cache::{ArtifactFile, DatasetFetcher};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::manifest::{InputManifest, SimulationModel};
use crate::poller::{PollPolicy, Poller, StatusMonitor, WaitOptions};
use crate::state_machine::{JobHandle, JobStatus};
use crate::transport::TransportClient;

#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    store: JobStore,
    poller: Poller,
    fetcher: DatasetFetcher,
}

impl JobOrchestrator {
    pub fn new(store: JobStore, poll: PollPolicy, fetcher: DatasetFetcher) -> Self {
        Self {
            poller: Poller::new(store.clone(), poll),
            store,
            fetcher,
        }
    }

    /// Wires every component from configuration around `credentials`.
    pub fn from_config(
        config: &SimConfig,
        credentials: Arc<CredentialProvider>,
    ) -> Result<Self, SimError> {
        let transport = TransportClient::with_timeouts(
            &config.api_url,
            credentials,
            config.retry_policy(),
            config.connect_timeout(),
            config.request_timeout(),
        )?;
        let store = JobStore::new(transport);
        let fetcher = DatasetFetcher::new(store.clone(), config.cache_dir.clone());
        Ok(Self::new(store, config.poll_policy(), fetcher))
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn fetcher(&self) -> &DatasetFetcher {
        &self.fetcher
    }

    /// Validates and uploads `model`, then marks the job submitted.
    ///
    /// Nothing is rolled back on failure: a job whose upload or start failed
    /// stays registered and can be deleted.
    pub async fn submit(
        &self,
        model: &impl SimulationModel,
        name: &str,
    ) -> Result<JobHandle, SimError> {
        let manifest = InputManifest::from_model(model, name)?;
        let handle = self.store.create_job(&manifest.metadata()).await?;

        let job_id = handle.job_id.clone();
        let staged = async {
            for (file_name, bytes) in manifest.into_files() {
                self.store.upload_input(&job_id, &file_name, bytes).await?;
            }
            self.store.start_job(&job_id).await
        };
        if let Err(e) = staged.await {
            warn!(job_id = %job_id, "job registered but not started: {e}");
            return Err(e);
        }
        Ok(handle)
    }

    /// Status changes of `job_id` until it reaches a terminal state.
    pub fn monitor(&self, job_id: &str, options: WaitOptions) -> StatusMonitor {
        self.poller.monitor(job_id, options)
    }

    pub async fn wait(&self, job_id: &str, options: WaitOptions) -> Result<JobHandle, SimError> {
        self.poller.wait_for_completion(job_id, options).await
    }

    /// Waits for the job, then fetches `artifact` through the cache.
    ///
    /// A job that ended in `Error` or was cancelled remotely is a
    /// [`SimError::JobFailed`]. The timeout covers waiting and download
    /// together.
    pub async fn load(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
        options: WaitOptions,
    ) -> Result<ArtifactFile, SimError> {
        let started = Instant::now();
        let handle = self.poller.wait_for_completion(job_id, options.clone()).await?;
        ensure_succeeded(&handle)?;

        let fetch_options = WaitOptions {
            timeout: options.timeout.map(|t| remaining(t, started)),
            cancel: options.cancel,
        };
        self.fetcher.fetch(job_id, artifact, &fetch_options).await
    }

    /// `submit`, `wait` and `load` in one call.
    pub async fn run(
        &self,
        model: &impl SimulationModel,
        name: &str,
        artifact: &ArtifactSpec,
        options: WaitOptions,
    ) -> Result<(JobHandle, ArtifactFile), SimError> {
        let submitted = self.submit(model, name).await?;
        info!(job_id = %submitted.job_id, name, "waiting for job");
        let file = self.load(&submitted.job_id, artifact, options).await?;
        let handle = self.store.get_info(&submitted.job_id).await?.to_handle();
        Ok((handle, file))
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), SimError> {
        self.store.delete_job(job_id).await
    }

    /// Requests remote cancellation. The job later reports `Cancelled`.
    pub async fn abort(&self, job_id: &str) -> Result<(), SimError> {
        self.store.abort_job(job_id).await
    }

    /// Estimated cost of running `model`, without submitting it.
    pub async fn estimate_cost(&self, model: &impl SimulationModel) -> Result<f64, SimError> {
        model.validate()?;
        let body = model.serialize()?;
        self.store.estimate_cost(model.task_type(), body).await
    }

    pub async fn get_info(&self, job_id: &str) -> Result<JobInfo, SimError> {
        self.store.get_info(job_id).await
    }

    /// Billed cost, once the backend has settled it.
    pub async fn real_cost(&self, job_id: &str) -> Result<Option<f64>, SimError> {
        Ok(self.store.get_info(job_id).await?.real_cost)
    }

    pub fn list(&self, filter: JobFilter) -> JobListing {
        self.store.list_jobs(filter)
    }
}

/// Maps a finished job to `Ok` only when it succeeded. `Error` and remote
/// `Cancelled` become [`SimError::JobFailed`]; a job that is still running
/// is a protocol error.
pub fn ensure_succeeded(handle: &JobHandle) -> Result<(), SimError> {
    let message = match handle.status() {
        JobStatus::Success => return Ok(()),
        JobStatus::Error => handle
            .diagnostic()
            .unwrap_or("job ended in error state")
            .to_string(),
        JobStatus::Cancelled => "job was cancelled".to_string(),
        other => {
            return Err(SimError::Protocol(format!(
                "wait for {} returned non-terminal status {other}",
                handle.job_id
            )));
        }
    };
    Err(SimError::JobFailed {
        job_id: handle.job_id.clone(),
        message,
    })
}

fn remaining(total: Duration, started: Instant) -> Duration {
    total.saturating_sub(started.elapsed())
}
