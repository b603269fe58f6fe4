//! Drives a remote job to a terminal state by polling its status.
//!
//! The wait interval starts at [`PollPolicy::initial_interval`] and grows
//! geometrically up to [`PollPolicy::max_interval`]; it is never reset within
//! one wait, even when the status changes.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::api::JobStore;
use crate::cancel::CancelSignal;
use crate::error::{SimError, TransportError, TransportErrorKind};
use crate::state_machine::{JobHandle, JobStatus, StatusTracker};

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub growth_factor: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            growth_factor: 1.5,
        }
    }
}

impl PollPolicy {
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.growth_factor.max(1.0))
            .min(self.max_interval)
    }
}

/// Limits for one wait.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// One observed status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub job_id: String,
    /// `None` for the first observation.
    pub from: Option<JobStatus>,
    pub to: JobStatus,
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub struct Poller {
    store: JobStore,
    policy: PollPolicy,
}

impl Poller {
    pub fn new(store: JobStore, policy: PollPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Lazy sequence of status changes for `job_id`, ending at a terminal state.
    pub fn monitor(&self, job_id: &str, options: WaitOptions) -> StatusMonitor {
        StatusMonitor {
            store: self.store.clone(),
            policy: self.policy.clone(),
            job_id: job_id.to_string(),
            tracker: StatusTracker::new(),
            handle: None,
            interval: self.policy.initial_interval,
            deadline: options.timeout.map(|t| Instant::now() + t),
            timeout: options.timeout.unwrap_or_default(),
            cancel: options.cancel.unwrap_or_else(CancelSignal::never),
            polls: 0,
            finished: false,
        }
    }

    /// Polls until the job reaches a terminal state.
    ///
    /// A job ending in `Error` is returned as a normal handle; deciding that
    /// it is a failure is up to the caller. Request-level retry exhaustion
    /// counts as a missed poll, so only cancellation, the timeout, auth
    /// failures and protocol violations end the wait early.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        options: WaitOptions,
    ) -> Result<JobHandle, SimError> {
        let mut monitor = self.monitor(job_id, options);
        while let Some(event) = monitor.next().await {
            let event = event?;
            debug!(job_id, from = ?event.from, to = %event.to, "status changed");
        }
        monitor.into_handle().ok_or_else(|| {
            SimError::Protocol(format!("no status was observed for job {job_id}"))
        })
    }
}

/// Status-change stream for one job, produced by [`Poller::monitor`].
#[derive(Debug)]
pub struct StatusMonitor {
    store: JobStore,
    policy: PollPolicy,
    job_id: String,
    tracker: StatusTracker,
    handle: Option<JobHandle>,
    interval: Duration,
    deadline: Option<Instant>,
    timeout: Duration,
    cancel: CancelSignal,
    polls: u32,
    finished: bool,
}

struct Observation {
    status: JobStatus,
    message: Option<String>,
    handle: Option<JobHandle>,
}

impl StatusMonitor {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest handle, once the job has been observed at least once.
    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    pub fn into_handle(self) -> Option<JobHandle> {
        self.handle
    }

    /// Statuses observed so far, in order.
    pub fn history(&self) -> &[JobStatus] {
        self.tracker.history()
    }

    /// Interval that will be waited before the next poll.
    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    /// Next status change, or `None` after a terminal state or an error.
    pub async fn next(&mut self) -> Option<Result<StatusEvent, SimError>> {
        if self.finished {
            return None;
        }
        loop {
            if self.polls > 0
                && let Err(e) = self.pause().await
            {
                self.finished = true;
                return Some(Err(e));
            }
            self.polls += 1;

            match self.poll_once().await {
                Ok(Some(event)) => {
                    if event.is_terminal() {
                        info!(job_id = %self.job_id, status = %event.to, "job reached terminal state");
                        self.finished = true;
                    }
                    return Some(Ok(event));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    async fn pause(&mut self) -> Result<(), SimError> {
        let mut delay = self.interval;
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SimError::Timeout(self.timeout));
            }
            delay = delay.min(remaining);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SimError::Cancelled),
            _ = sleep(delay) => {}
        }
        self.interval = self.policy.next_interval(self.interval);
        Ok(())
    }

    async fn poll_once(&mut self) -> Result<Option<StatusEvent>, SimError> {
        let request = fetch_observation(&self.store, &self.job_id, self.handle.is_none());
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SimError::Cancelled),
            r = before_deadline(self.deadline, self.timeout, request) => r,
        };

        let observation = match result {
            Ok(observation) => observation,
            Err(SimError::Transport(TransportError {
                kind: TransportErrorKind::Exhausted,
                message,
                ..
            })) => {
                warn!(job_id = %self.job_id, "status poll missed: {message}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let previous = self.tracker.current();
        let transition = self.tracker.observe(&self.job_id, observation.status)?;
        if let Some(handle) = observation.handle {
            self.handle = Some(handle);
        }
        if let Some(handle) = self.handle.as_mut() {
            handle.record_status(observation.status, observation.message.clone());
        }

        if !transition.is_change() {
            return Ok(None);
        }
        Ok(Some(StatusEvent {
            job_id: self.job_id.clone(),
            from: previous,
            to: transition.status(),
            message: observation.message,
            observed_at: Utc::now(),
        }))
    }
}

// The first poll reads the full job record to build the handle; later polls
// only read the status.
async fn fetch_observation(
    store: &JobStore,
    job_id: &str,
    first: bool,
) -> Result<Observation, SimError> {
    if first {
        let info = store.get_info(job_id).await?;
        Ok(Observation {
            status: info.status,
            message: info.error_message.clone(),
            handle: Some(info.to_handle()),
        })
    } else {
        let report = store.get_status(job_id).await?;
        Ok(Observation {
            status: report.status,
            message: report.error_message,
            handle: None,
        })
    }
}

async fn before_deadline<T>(
    deadline: Option<Instant>,
    timeout: Duration,
    future: impl Future<Output = Result<T, SimError>>,
) -> Result<T, SimError> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future)
            .await
            .map_err(|_| SimError::Timeout(timeout))?,
        None => future.await,
    }
}
