use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, warn};
use uuid::Uuid;

use super::retry::{Fault, RetryPolicy, classify_error, classify_status};
use crate::auth::{Credential, CredentialProvider};
use crate::error::{AuthError, SimError, TransportError};

/// Payload of an outbound request. Kept owned so it can be resent on retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Vec<u8>),
    Bytes {
        data: Vec<u8>,
        content_type: &'static str,
    },
}

impl RequestBody {
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, SimError> {
        Ok(Self::Json(serde_json::to_vec(value)?))
    }

    pub fn octets(data: Vec<u8>) -> Self {
        Self::Bytes {
            data,
            content_type: "application/octet-stream",
        }
    }

    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            RequestBody::Json(data) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(data.clone()),
            RequestBody::Bytes { data, content_type } => {
                builder.header(CONTENT_TYPE, *content_type).body(data.clone())
            }
        }
    }
}

/// HTTP layer shared by every backend call.
///
/// Each request is retried with exponential backoff on transient faults,
/// failed immediately on permanent ones, and resent exactly once after a
/// credential refresh when the backend answers 401/403.
#[derive(Debug, Clone)]
pub struct TransportClient {
    http: Client,
    base_url: String,
    credentials: Arc<CredentialProvider>,
    retry: RetryPolicy,
}

impl TransportClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<CredentialProvider>,
        retry: RetryPolicy,
    ) -> Result<Self, SimError> {
        Self::with_timeouts(
            base_url,
            credentials,
            retry,
            Duration::from_secs(10),
            Duration::from_secs(120),
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        credentials: Arc<CredentialProvider>,
        retry: RetryPolicy,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, SimError> {
        Ok(Self {
            http: http_client(connect_timeout, request_timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Authenticated request against the API base URL.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        headers: &[(&str, &str)],
    ) -> Result<Response, SimError> {
        self.request_query(method, path, &[], body, headers).await
    }

    /// Like [`request`](Self::request), with URL-encoded query parameters.
    pub async fn request_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<RequestBody>,
        headers: &[(&str, &str)],
    ) -> Result<Response, SimError> {
        let url = self.url(path);
        self.execute(method, &url, query, body.as_ref(), headers, true)
            .await
    }

    /// Unauthenticated request against an absolute URL, e.g. a pre-signed
    /// object-storage link. The bearer token is never sent to these.
    pub async fn request_url(
        &self,
        method: Method,
        url: &str,
        body: Option<RequestBody>,
        headers: &[(&str, &str)],
    ) -> Result<Response, SimError> {
        self.execute(method, url, &[], body.as_ref(), headers, false)
            .await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&RequestBody>,
        headers: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<Response, SimError> {
        let request_id = Uuid::new_v4().to_string();
        let mut attempt: u32 = 0;
        let mut refreshed = false;
        let mut credential: Option<Credential> = None;

        loop {
            attempt += 1;
            if authenticated && credential.is_none() {
                credential = Some(self.credentials.get_token().await?);
            }

            let mut builder = self
                .http
                .request(method.clone(), url)
                .header("x-request-id", &request_id);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            if let Some(c) = &credential {
                builder = builder.bearer_auth(&c.token);
            }
            if let Some(body) = body {
                builder = body.apply(builder);
            }

            debug!(%method, url, attempt, %request_id, "sending request");
            let (fault, status, message) = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        None => return Ok(response),
                        Some(Fault::Unauthorized) if authenticated => {
                            if refreshed {
                                return Err(AuthError::Rejected {
                                    status: status.as_u16(),
                                }
                                .into());
                            }
                            refreshed = true;
                            warn!(%method, url, %request_id, %status, "credentials rejected, refreshing");
                            let Some(stale) = credential.take() else {
                                return Err(AuthError::MissingCredentials.into());
                            };
                            credential = Some(self.credentials.refresh(&stale).await?);
                            // The auth retry does not consume the transient budget.
                            attempt -= 1;
                            continue;
                        }
                        Some(fault) => (fault, Some(status.as_u16()), response_text(response).await),
                    }
                }
                Err(e) => (classify_error(&e), None, e.to_string()),
            };

            if !(self.retry.retryable)(fault) {
                debug!(%method, url, %request_id, ?status, "request rejected: {message}");
                return Err(TransportError::rejected(status, message).into());
            }
            if attempt >= self.retry.max_attempts {
                warn!(%method, url, %request_id, attempt, "retry budget exhausted");
                return Err(TransportError::exhausted(
                    status,
                    format!("gave up after {attempt} attempts: {message}"),
                )
                .into());
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                %method,
                url,
                %request_id,
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying: {message}"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn response_text(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable response body".to_string())
}

/// Builds a reqwest client with the given timeouts.
pub(crate) fn http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Client, SimError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| SimError::Config(format!("cannot build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenSource;
    use crate::error::TransportErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        }
    }

    fn client(server: &MockServer, retry: RetryPolicy) -> TransportClient {
        let credentials = Arc::new(CredentialProvider::new(TokenSource::Static(
            "tok".into(),
        )));
        TransportClient::new(&server.uri(), credentials, retry).unwrap()
    }

    #[tokio::test]
    async fn sends_bearer_token_and_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/abc"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, fast_retry(3))
            .request(Method::GET, "/tasks/abc", None, &[])
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-request-id").is_some());
    }

    #[tokio::test]
    async fn presigned_requests_carry_no_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/obj"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/bucket/obj", server.uri());
        client(&server, fast_retry(3))
            .request_url(Method::PUT, &url, Some(RequestBody::octets(vec![1, 2, 3])), &[])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
        assert_eq!(requests[0].body, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let response = client(&server, fast_retry(5))
            .request(Method::GET, "/flaky", None, &[])
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn always_503_exhausts_at_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let err = client(&server, fast_retry(4))
            .request(Method::GET, "/down", None, &[])
            .await
            .unwrap_err();
        match err {
            SimError::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::Exhausted);
                assert_eq!(e.status, Some(503));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such task"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, fast_retry(5))
            .request(Method::GET, "/missing", None, &[])
            .await
            .unwrap_err();
        match err {
            SimError::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::Rejected);
                assert_eq!(e.status, Some(404));
                assert_eq!(e.message, "no such task");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_exhausted() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let credentials = Arc::new(CredentialProvider::new(TokenSource::Static(
            "tok".into(),
        )));
        let err = TransportClient::new(&uri, credentials, fast_retry(2))
            .unwrap()
            .request(Method::GET, "/tasks", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Transport(TransportError {
                kind: TransportErrorKind::Exhausted,
                status: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn configured_request_timeout_is_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let credentials = Arc::new(CredentialProvider::new(TokenSource::Static(
            "tok".into(),
        )));
        let client = TransportClient::with_timeouts(
            &server.uri(),
            credentials,
            RetryPolicy::none(),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let err = client
            .request(Method::GET, "tasks/slow", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Transport(TransportError {
                kind: TransportErrorKind::Exhausted,
                ..
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn url_joins_base_and_path() {
        let credentials = Arc::new(CredentialProvider::new(TokenSource::Static("t".into())));
        let client =
            TransportClient::new("http://host/v1/", credentials, RetryPolicy::none()).unwrap();
        assert_eq!(client.url("/tasks/1"), "http://host/v1/tasks/1");
        assert_eq!(client.url("tasks"), "http://host/v1/tasks");
    }
}
