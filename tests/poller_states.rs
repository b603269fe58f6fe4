mod common;

use std::time::{Duration, Instant};

use common::{hits, job_info, poll, store};
use simcloud::{CancelHandle, JobStatus, Poller, SimError, WaitOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_info(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_info("fdve-1", status)))
        .mount(server)
        .await;
}

async fn mount_statuses(server: &MockServer, statuses: &[&str]) {
    for status in statuses {
        Mock::given(method("GET"))
            .and(path("/tasks/fdve-1/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": status})),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn observed_statuses_are_non_decreasing() {
    let server = MockServer::start().await;
    mount_info(&server, "queued").await;
    mount_statuses(
        &server,
        &["queued", "preprocessing", "running", "running", "postprocessing", "success"],
    )
    .await;

    let poller = Poller::new(store(&server), poll(5, 20));
    let mut monitor = poller.monitor("fdve-1", WaitOptions::default());
    let mut seen = Vec::new();
    while let Some(event) = monitor.next().await {
        seen.push(event.unwrap().to);
    }

    assert_eq!(
        seen,
        vec![
            JobStatus::Queued,
            JobStatus::Preprocessing,
            JobStatus::Running,
            JobStatus::Postprocessing,
            JobStatus::Success,
        ]
    );
    assert!(seen.windows(2).all(|w| w[0].rank() < w[1].rank()));
}

#[tokio::test]
async fn regression_from_backend_is_protocol_error() {
    let server = MockServer::start().await;
    mount_info(&server, "queued").await;
    mount_statuses(&server, &["running", "preprocessing"]).await;

    let poller = Poller::new(store(&server), poll(5, 20));
    let mut monitor = poller.monitor("fdve-1", WaitOptions::default());

    assert_eq!(monitor.next().await.unwrap().unwrap().to, JobStatus::Queued);
    assert_eq!(monitor.next().await.unwrap().unwrap().to, JobStatus::Running);
    assert!(matches!(
        monitor.next().await,
        Some(Err(SimError::Protocol(_)))
    ));
    assert!(monitor.next().await.is_none());
}

#[tokio::test]
async fn cancellation_returns_within_one_interval() {
    let server = MockServer::start().await;
    mount_info(&server, "running").await;
    mount_statuses(&server, &["running"]).await;

    // Long interval: the wait is parked in its sleep when cancelled.
    let poller = Poller::new(store(&server), poll(5_000, 5_000));
    let (handle, signal) = CancelHandle::new();
    let started = Instant::now();
    let wait = tokio::spawn(async move {
        poller
            .wait_for_completion("fdve-1", WaitOptions::default().with_cancel(signal))
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();
    let result = wait.await.unwrap();

    assert!(matches!(result, Err(SimError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(hits(&server, "/tasks/fdve-1/status").await, 0);
}

#[tokio::test]
async fn cancellation_does_not_wait_for_request_retries() {
    let server = MockServer::start().await;
    mount_info(&server, "running").await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1/status"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let poller = Poller::new(store(&server), poll(5, 5));
    let (handle, signal) = CancelHandle::new();
    let wait = tokio::spawn(async move {
        poller
            .wait_for_completion("fdve-1", WaitOptions::default().with_cancel(signal))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled_at = Instant::now();
    handle.cancel();
    let result = wait.await.unwrap();

    assert!(matches!(result, Err(SimError::Cancelled)));
    assert!(cancelled_at.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn error_terminal_state_is_a_normal_result() {
    let server = MockServer::start().await;
    mount_info(&server, "running").await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"status": "error", "error_message": "NaN in field update"}),
        ))
        .mount(&server)
        .await;

    let handle = Poller::new(store(&server), poll(5, 20))
        .wait_for_completion("fdve-1", WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.status(), JobStatus::Error);
    assert_eq!(handle.diagnostic(), Some("NaN in field update"));
}
