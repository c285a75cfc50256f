use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use toolmesh_common::resilience::{BackoffPolicy, CallPermit, CircuitBreaker, SharedClock};
use tracing::{debug, warn};

use super::error::{parse_retry_after, HttpError};

/// Breaker type shared between the HTTP client and its owners
pub type SharedBreaker = Arc<CircuitBreaker<SharedClock>>;

/// HTTP client with built-in retry, backoff and circuit breaking.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    max_retries: u32,
    backoff: BackoffPolicy,
    breaker: Option<SharedBreaker>,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, HttpError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    pub fn breaker(&self) -> Option<&SharedBreaker> {
        self.breaker.as_ref()
    }

    /// Token that aborts backoff sleeps when cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Execute the request with retry semantics.
    ///
    /// Transport errors and 5xx responses are retried up to `max_retries`
    /// times; any other non-2xx status fails immediately. Every attempt is
    /// reported to the breaker, and a refused attempt returns
    /// [`HttpError::CircuitOpen`] without touching the network. When the
    /// breaker trips partway through, the refusal is wrapped in
    /// [`HttpError::RetriesExhausted`] with the attempts already made.
    pub async fn send(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<Response, HttpError> {
        let attempts = self.max_retries.saturating_add(1);
        let mut last_error: Option<HttpError> = None;

        for attempt in 0..attempts {
            if let Some(previous) = &last_error {
                let delay = self.backoff.delay(attempt - 1);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %previous,
                    "retrying request"
                );
                self.sleep_or_cancel(delay).await?;
            }

            let request = builder
                .try_clone()
                .ok_or_else(|| {
                    HttpError::Build(
                        "request body cannot be cloned; buffer the body to enable retries".into(),
                    )
                })?
                .build()?;

            let permit = match &self.breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Some(permit) => Some(permit),
                    None => {
                        debug!(operation, breaker = breaker.name(), "request refused by breaker");
                        let refused = HttpError::CircuitOpen { breaker: breaker.name().to_string() };
                        return Err(match last_error {
                            None => refused,
                            Some(previous) => {
                                warn!(
                                    operation,
                                    attempts = attempt,
                                    error = %previous,
                                    "breaker opened during retries"
                                );
                                HttpError::RetriesExhausted {
                                    operation: operation.to_string(),
                                    attempts: attempt,
                                    last: Box::new(refused),
                                }
                            }
                        });
                    }
                },
                None => None,
            };

            let method = request.method().clone();
            let url = request.url().clone();
            debug!(operation, attempt = attempt + 1, %method, %url, "sending HTTP request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(operation, attempt = attempt + 1, %status, "received HTTP response");

                    if status.is_success() {
                        report(permit, true);
                        return Ok(response);
                    }

                    if status.is_server_error() {
                        report(permit, false);
                    } else {
                        // The backend answered, so it is alive as far as the breaker cares.
                        report(permit, true);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let error = HttpError::Status { status: status.as_u16(), body, retry_after };

                    if status.is_server_error() {
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(err) => {
                    debug!(operation, attempt = attempt + 1, error = %err, "HTTP request failed");
                    report(permit, false);

                    let retryable = should_retry_error(&err);
                    let error = HttpError::from(err);
                    if !retryable {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| HttpError::Transport {
            message: "no attempt was made".into(),
            timeout: false,
        });
        Err(HttpError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
            last: Box::new(last),
        })
    }

    /// Execute the request exactly once, bypassing retries and the breaker.
    pub async fn send_once(&self, builder: RequestBuilder) -> Result<Response, HttpError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(HttpError::Status { status: status.as_u16(), body, retry_after })
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> Result<(), HttpError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(HttpError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
    user_agent: Option<String>,
    default_headers: Option<reqwest::header::HeaderMap>,
    breaker: Option<SharedBreaker>,
    cancel: Option<CancellationToken>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            user_agent: None,
            default_headers: None,
            breaker: None,
            cancel: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn circuit_breaker(mut self, breaker: SharedBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<HttpClient, HttpError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| HttpError::Build(err.to_string()))?;

        Ok(HttpClient {
            client,
            max_retries: self.max_retries,
            backoff: self.backoff,
            breaker: self.breaker,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

fn report(permit: Option<CallPermit<'_, SharedClock>>, success: bool) {
    match permit {
        Some(permit) if success => permit.success(),
        Some(permit) => permit.failure(),
        None => {}
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_request() {
        return true;
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        if err.is_connect() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::{Method, StatusCode};
    use toolmesh_common::error::{ErrorClass, ErrorClassification};
    use toolmesh_common::resilience::{CircuitBreakerConfig, CircuitState, MockClock, SystemClock};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_millis(5), Duration::from_millis(20))
            .without_jitter()
    }

    fn client_with_defaults() -> HttpClient {
        HttpClient::builder().backoff(fast_backoff()).max_retries(2).build().expect("http client")
    }

    fn breaker(max_failures: u32) -> SharedBreaker {
        let config = CircuitBreakerConfig::builder()
            .max_failures(max_failures)
            .retry_timeout(Duration::from_secs(60))
            .build()
            .expect("config");
        let clock: SharedClock = Arc::new(SystemClock);
        Arc::new(CircuitBreaker::with_clock("http-test", config, clock).expect("breaker"))
    }

    #[tokio::test]
    async fn returns_successful_response_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send("get", client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                let current = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send("get", client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let result = client.send("get", client.request(Method::GET, server.uri())).await;

        match result {
            Err(HttpError::Status { status, body, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "missing");
            }
            other => panic!("expected status error, got {:?}", other),
        }
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    /// Validates exhaustion reporting for persistent 5xx.
    ///
    /// Assertions:
    /// - `max_retries + 1` requests reach the server.
    /// - The error names the operation and the attempt count.
    #[tokio::test]
    async fn reports_exhaustion_with_attempt_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let builder = client.request(Method::POST, server.uri()).json(&serde_json::json!({"a": 1}));
        let result = client.send("execute_tool", builder).await;

        match result {
            Err(HttpError::RetriesExhausted { operation, attempts, last }) => {
                assert_eq!(operation, "execute_tool");
                assert_eq!(attempts, 3);
                assert_eq!(last.status(), Some(502));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }

        // The buffered body is replayed on every attempt.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        for request in requests {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            assert_eq!(body, serde_json::json!({"a": 1}));
        }
    }

    #[tokio::test]
    async fn retries_on_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED
        let url = format!("http://{}", addr);

        let client =
            HttpClient::builder().backoff(fast_backoff()).max_retries(1).build().expect("client");

        let result = client.send("get", client.request(Method::GET, &url)).await;
        match result {
            Err(HttpError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, HttpError::Transport { .. }));
            }
            other => panic!("expected network error, got {:?}", other),
        }
    }

    /// Validates breaker integration.
    ///
    /// Assertions:
    /// - Failures during retries trip the breaker mid-call, and the error
    ///   keeps the number of attempts made.
    /// - Once open, calls fail with `CircuitOpen` without reaching the server.
    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let breaker = breaker(2);
        let client = HttpClient::builder()
            .backoff(fast_backoff())
            .max_retries(3)
            .circuit_breaker(breaker.clone())
            .build()
            .expect("client");

        let first = client.send("get", client.request(Method::GET, server.uri())).await;
        match first {
            Err(err @ HttpError::RetriesExhausted { attempts: 2, .. }) => {
                assert!(err.is_circuit_open());
                assert_eq!(err.error_class(), ErrorClass::CircuitBreaker);
            }
            other => panic!("expected breaker trip after two attempts, got {:?}", other),
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        let second = client.send("get", client.request(Method::GET, server.uri())).await;
        assert!(matches!(second, Err(HttpError::CircuitOpen { .. })));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    /// Validates recovery after a half-open probe is abandoned.
    ///
    /// # Test Steps
    /// 1. One 500 opens the breaker
    /// 2. After the retry timeout the probe request is dropped by a caller timeout
    /// 3. The next request is admitted as a fresh probe and closes the breaker
    #[tokio::test]
    async fn abandoned_half_open_call_does_not_wedge_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .max_failures(1)
            .success_threshold(1)
            .retry_timeout(Duration::from_secs(30))
            .build()
            .expect("config");
        let shared: SharedClock = Arc::new(clock.clone());
        let breaker: SharedBreaker =
            Arc::new(CircuitBreaker::with_clock("half-open-recovery", config, shared).expect("breaker"));
        let client = HttpClient::builder()
            .max_retries(0)
            .circuit_breaker(breaker.clone())
            .build()
            .expect("client");

        let failed = client.send("get", client.request(Method::GET, server.uri())).await;
        assert_eq!(failed.unwrap_err().status(), Some(500));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_secs(30);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.send("get", client.request(Method::GET, server.uri())),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let recovered = client.send("get", client.request(Method::GET, server.uri())).await;
        assert_eq!(recovered.expect("probe admitted").status(), StatusCode::OK);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn client_errors_count_as_breaker_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(400)).mount(&server).await;

        let breaker = breaker(1);
        let client =
            HttpClient::builder().circuit_breaker(breaker.clone()).build().expect("client");

        for _ in 0..3 {
            let result = client.send("get", client.request(Method::GET, server.uri())).await;
            assert!(matches!(result, Err(HttpError::Status { status: 400, .. })));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancellation_aborts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let token = CancellationToken::new();
        let client = HttpClient::builder()
            .backoff(
                BackoffPolicy::exponential(Duration::from_secs(10), Duration::from_secs(10))
                    .without_jitter(),
            )
            .max_retries(5)
            .cancellation_token(token.clone())
            .build()
            .expect("client");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let result = client.send("get", client.request(Method::GET, server.uri())).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_once_skips_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let result = client.send_once(client.request(Method::GET, server.uri())).await;
        assert!(matches!(result, Err(HttpError::Status { status: 503, .. })));
    }
}
