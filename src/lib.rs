//! Client for a remote FDTD simulation service.
//!
//! Submits locally described simulations, follows them through the remote
//! job state machine, and fetches their results into a content-addressed
//! local cache. [`JobOrchestrator`] is the entry point; the lower layers are
//! public for callers that need finer control.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod poller;
pub mod state_machine;
pub mod transport;
pub mod ui;

pub use api::{ArtifactSpec, JobFilter, JobStore};
pub use cache::{ArtifactFile, DatasetFetcher};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::SimConfig;
pub use error::{AuthError, Result, SimError, TransportError, TransportErrorKind};
pub use manifest::{InputManifest, JsonModel, SimulationModel};
pub use orchestrator::JobOrchestrator;
pub use poller::{PollPolicy, Poller, StatusEvent, StatusMonitor, WaitOptions};
pub use state_machine::{JobHandle, JobStatus, TaskType};
pub use transport::{RetryPolicy, TransportClient};
