use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Remote job status as reported by the backend.
///
/// Jobs flow through: QUEUED → PREPROCESSING → RUNNING → POSTPROCESSING → SUCCESS,
/// and may end early in ERROR or CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Preprocessing,
    Running,
    Postprocessing,
    Success,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Position in the state machine order. All terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Preprocessing => 1,
            JobStatus::Running => 2,
            JobStatus::Postprocessing => 3,
            JobStatus::Success | JobStatus::Error | JobStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is allowed. Staying put is allowed,
    /// skipping intermediate phases is allowed, leaving a terminal state is not.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Preprocessing => write!(f, "PREPROCESSING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Postprocessing => write!(f, "POSTPROCESSING"),
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Error => write!(f, "ERROR"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// The result of feeding one observed status into a [`StatusTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First observation for this job.
    Initial(JobStatus),
    /// Same status as the previous observation.
    Unchanged(JobStatus),
    /// The job moved forward.
    Advanced { from: JobStatus, to: JobStatus },
}

impl Transition {
    pub fn status(&self) -> JobStatus {
        match *self {
            Transition::Initial(s) | Transition::Unchanged(s) => s,
            Transition::Advanced { to, .. } => to,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged(_))
    }
}

/// Checks the sequence of statuses observed for a single job and records its history.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    current: Option<JobStatus>,
    history: Vec<JobStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<JobStatus> {
        self.current
    }

    /// Distinct statuses in the order they were first observed.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    /// Records `next`, rejecting regressions as a protocol error. A rejected
    /// observation leaves the tracker unchanged.
    pub fn observe(&mut self, job_id: &str, next: JobStatus) -> Result<Transition, SimError> {
        let transition = match self.current {
            None => Transition::Initial(next),
            Some(prev) if prev == next => Transition::Unchanged(next),
            Some(prev) if prev.can_advance_to(next) => Transition::Advanced {
                from: prev,
                to: next,
            },
            Some(prev) => {
                return Err(SimError::Protocol(format!(
                    "job {job_id} status regressed from {prev} to {next}"
                )));
            }
        };

        if transition.is_change() {
            self.history.push(next);
        }
        self.current = Some(next);
        Ok(transition)
    }
}
