//! Job Store: logical job operations against the remote API and object storage.

mod listing;
mod store;
pub mod types;

pub use listing::JobListing;
pub use store::JobStore;
pub use types::{ArtifactSpec, JobFilter, JobInfo, ResultArtifact, StatusReport};
