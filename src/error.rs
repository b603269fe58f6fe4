use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = SimError> = std::result::Result<T, E>;

/// Every failure the client surfaces to its callers.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Local model or manifest rejected, or a backend payload that does not match its schema.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("artifact integrity check failed: expected hash {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend violated the job protocol, e.g. a status regression.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SimError {
    /// Process exit code for the CLI. Zero is reserved for success.
    pub fn exit_code(&self) -> u8 {
        match self {
            SimError::Auth(_) => 2,
            SimError::Validation(_) => 3,
            SimError::Transport(_) => 4,
            SimError::Integrity { .. } => 5,
            SimError::JobFailed { .. } => 6,
            SimError::Cancelled => 7,
            SimError::Timeout(_) => 8,
            SimError::Protocol(_) => 9,
            SimError::Config(_) | SimError::Toml(_) => 10,
            SimError::Io(_) | SimError::Json(_) => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials configured; set SIMCLOUD_API_KEY or api_key in simcloud.toml")]
    MissingCredentials,

    #[error("credentials rejected by backend (status {status})")]
    Rejected { status: u16 },

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("credential provider not initialized")]
    NotInitialized,
}

/// How a transport failure was classified once the retry policy gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransportErrorKind {
    /// Permanent failure, surfaced without retrying.
    Rejected,
    /// Transient failures persisted for the whole retry budget.
    Exhausted,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Rejected => write!(f, "Rejected"),
            TransportErrorKind::Exhausted => write!(f, "Exhausted"),
        }
    }
}

#[derive(Debug, Error)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "transport error ({}, status {status}): {}",
                self.kind, self.message
            ),
            None => write!(f, "transport error ({}): {}", self.kind, self.message),
        }
    }
}

impl TransportError {
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Rejected,
            status,
            message: message.into(),
        }
    }

    pub fn exhausted(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Exhausted,
            status,
            message: message.into(),
        }
    }
}
