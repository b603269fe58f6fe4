mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{hits, quick_retry};
use reqwest::Method;
use simcloud::auth::{CredentialProvider, TokenSource};
use simcloud::{AuthError, RetryPolicy, SimError, TransportClient, TransportErrorKind};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn api_key_client(server: &MockServer, max_attempts: u32) -> TransportClient {
    client_with(server, quick_retry(max_attempts))
}

fn client_with(server: &MockServer, retry: RetryPolicy) -> TransportClient {
    let source = TokenSource::api_key(&server.uri(), "sk-test").unwrap();
    let credentials = Arc::new(CredentialProvider::new(source));
    TransportClient::new(&server.uri(), credentials, retry).unwrap()
}

/// Answers 503 and remembers when each attempt arrived.
#[derive(Clone, Default)]
struct UnavailableRecorder {
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for UnavailableRecorder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(503)
    }
}

async fn mount_tokens(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "t1"})),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "t2"})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_one_resend() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1/status"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1/status"))
        .and(header("authorization", "Bearer t2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let client = api_key_client(&server, 3);
    let response = client
        .request(Method::GET, "tasks/fdve-1/status", None, &[])
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(hits(&server, "/auth/token").await, 2);
    assert_eq!(hits(&server, "/tasks/fdve-1/status").await, 2);
}

#[tokio::test]
async fn second_unauthorized_is_auth_error_without_another_refresh() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1/status"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = api_key_client(&server, 3);
    let err = client
        .request(Method::GET, "tasks/fdve-1/status", None, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::Auth(AuthError::Rejected { status: 401 })
    ));
    assert_eq!(hits(&server, "/auth/token").await, 2);
    assert_eq!(hits(&server, "/tasks/fdve-1/status").await, 2);
}

#[tokio::test]
async fn refreshed_token_is_reused_by_later_requests() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;
    Mock::given(method("GET"))
        .and(path("/tasks/fdve-1"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer t2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = api_key_client(&server, 3);
    client
        .request(Method::GET, "tasks/fdve-1", None, &[])
        .await
        .unwrap();
    client
        .request(Method::GET, "tasks/fdve-2", None, &[])
        .await
        .unwrap();
    assert_eq!(hits(&server, "/auth/token").await, 2);
}

#[tokio::test]
async fn always_unavailable_backend_exhausts_at_max_attempts() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let client = api_key_client(&server, 4);
    let err = client
        .request(Method::GET, "tasks", None, &[])
        .await
        .unwrap_err();
    match err {
        SimError::Transport(e) => {
            assert_eq!(e.kind, TransportErrorKind::Exhausted);
            assert_eq!(e.status, Some(503));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    // The token was issued once; 503s never touch credentials.
    assert_eq!(hits(&server, "/auth/token").await, 1);
}

#[tokio::test]
async fn observed_retry_gaps_grow_and_stay_capped() {
    let server = MockServer::start().await;
    mount_tokens(&server).await;
    let recorder = UnavailableRecorder::default();
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(recorder.clone())
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
        ..RetryPolicy::default()
    };
    let client = client_with(&server, retry.clone());
    client
        .request(Method::GET, "tasks", None, &[])
        .await
        .unwrap_err();

    let arrivals = recorder.arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 5);
    let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
    let slack = Duration::from_millis(10);
    for (i, gap) in gaps.iter().enumerate() {
        assert!(*gap >= retry.delay_for_attempt(i as u32 + 1), "gap {i} was {gap:?}");
        assert!(*gap <= retry.max_delay + Duration::from_millis(200), "gap {i} was {gap:?}");
    }
    assert!(gaps.windows(2).all(|w| w[1] + slack >= w[0]), "gaps {gaps:?}");
}

#[test]
fn backoff_schedule_is_non_decreasing_up_to_cap() {
    let policy = quick_retry(10);
    let delays: Vec<_> = (1..10).map(|attempt| policy.backoff(attempt)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(delays.iter().all(|d| *d <= policy.max_delay));
}
