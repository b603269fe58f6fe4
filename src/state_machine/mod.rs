mod job;
mod status;

pub use job::{JobHandle, TaskType};
pub use status::{JobStatus, StatusTracker, Transition};
