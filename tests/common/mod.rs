#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use simcloud::auth::{CredentialProvider, TokenSource};
use simcloud::{DatasetFetcher, JobOrchestrator, JobStore, PollPolicy, RetryPolicy, TransportClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn static_credentials() -> Arc<CredentialProvider> {
    Arc::new(CredentialProvider::new(TokenSource::Static("test-token".into())))
}

pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
        ..RetryPolicy::default()
    }
}

pub fn store(server: &MockServer) -> JobStore {
    let transport = TransportClient::new(&server.uri(), static_credentials(), quick_retry(2));
    JobStore::new(transport.unwrap())
}

pub fn poll(initial_ms: u64, max_ms: u64) -> PollPolicy {
    PollPolicy {
        initial_interval: Duration::from_millis(initial_ms),
        max_interval: Duration::from_millis(max_ms),
        growth_factor: 2.0,
    }
}

pub fn orchestrator(server: &MockServer, cache_root: &Path) -> JobOrchestrator {
    let store = store(server);
    let fetcher = DatasetFetcher::new(store.clone(), cache_root);
    JobOrchestrator::new(store, poll(10, 40), fetcher)
}

pub fn job_info(job_id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "task_id": job_id,
        "task_name": "ring resonator",
        "status": status,
        "created_at": "2026-03-01T12:00:00Z",
        "task_type": "FDTD",
    })
}

pub fn download_path(job_id: &str) -> String {
    format!("/storage/{job_id}/simulation_data.hdf5")
}

/// Serves `data` as the job's simulation data artifact.
pub async fn mount_artifact(server: &MockServer, job_id: &str, data: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/tasks/{job_id}/artifacts/simulation_data.hdf5")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "artifact_id": format!("{job_id}-data"),
            "content_hash": sha256_hex(data),
            "size": data.len(),
            "storage_uri": format!("{}{}", server.uri(), download_path(job_id)),
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(download_path(job_id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.to_vec()))
        .mount(server)
        .await;
}

/// Requests the fake backend received for `request_path`.
pub async fn hits(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}
