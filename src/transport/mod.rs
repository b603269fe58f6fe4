pub mod client;
pub mod retry;

pub use client::{RequestBody, TransportClient};
pub use retry::{Fault, RetryPolicy, classify_error, classify_status};
