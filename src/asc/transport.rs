use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use super::error::{AscError, TransportError, is_retryable_status};
use super::retry::{RetryPolicy, retry_after, sleep_or_cancel};

const USER_AGENT: &str = concat!("asc-connect/", env!("CARGO_PKG_VERSION"));
const MAX_IDLE_PER_HOST: usize = 16;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// An owned request that can be replayed on retry.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
        )
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AscError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()
            .map_err(|e| AscError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Client for artifact downloads: `timeout` bounds the connect only, so
    /// large bodies can stream for as long as data keeps arriving.
    pub fn download_client(timeout: Duration) -> Result<Client, AscError> {
        Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .connect_timeout(timeout)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()
            .map_err(|e| AscError::Config(format!("failed to build download client: {}", e)))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let res = builder.send().await?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.bytes().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Replays requests that failed transiently, waiting between attempts.
///
/// 429 is retried for any method. Gateway errors and timeouts are only
/// retried for idempotent methods, connection failures for all of them.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<T: HttpTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Returns the wait before the next attempt, or None when the outcome is
    /// final.
    fn retry_delay(
        &self,
        request: &HttpRequest,
        outcome: &Result<HttpResponse, TransportError>,
        attempt: u32,
    ) -> Option<(Duration, String)> {
        let (hint, reason) = match outcome {
            Ok(res) if res.status == StatusCode::TOO_MANY_REQUESTS => {
                (retry_after(&res.headers), format!("status {}", res.status))
            }
            Ok(res) if is_retryable_status(res.status) && request.is_idempotent() => {
                (retry_after(&res.headers), format!("status {}", res.status))
            }
            Err(err) if err.is_connect() || (err.is_transient() && request.is_idempotent()) => {
                (None, err.to_string())
            }
            _ => return None,
        };
        Some((self.policy.delay_for(attempt, hint), reason))
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for RetryingTransport<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let outcome = self.inner.execute(request.clone()).await;
            if attempt >= self.policy.max_retries {
                return outcome;
            }
            let Some((delay, reason)) = self.retry_delay(&request, &outcome, attempt) else {
                return outcome;
            };
            self.policy.log_retry(
                attempt,
                delay,
                &format!("{} {}: {}", request.method, request.url.path(), reason),
            );
            if !sleep_or_cancel(&self.cancel, delay).await {
                return Err(TransportError::Cancelled);
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes and records each request it sees.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<Method>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.method.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{}"),
        })
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            log_retries: false,
        }
    }

    fn request(method: Method) -> HttpRequest {
        HttpRequest::new(
            method,
            Url::parse("https://api.appstoreconnect.apple.com/v1/apps").unwrap(),
        )
    }

    #[tokio::test]
    async fn retries_service_unavailable_then_succeeds() {
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![status(503), status(502), status(200)]),
            fast_policy(3),
        );
        let res = transport.execute(request(Method::GET)).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(transport.inner().calls(), 3);
    }

    #[tokio::test]
    async fn returns_last_response_when_retries_exhausted() {
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![status(429), status(429), status(429), status(200)]),
            fast_policy(2),
        );
        let res = transport.execute(request(Method::GET)).await.unwrap();
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(transport.inner().calls(), 3);
    }

    #[tokio::test]
    async fn post_is_retried_on_throttle_but_not_on_server_error() {
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![status(429), status(500), status(200)]),
            fast_policy(3),
        );
        let res = transport.execute(request(Method::POST)).await.unwrap();
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.inner().calls(), 2);
    }

    #[tokio::test]
    async fn client_errors_are_final() {
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![status(404), status(200)]),
            fast_policy(3),
        );
        let res = transport.execute(request(Method::GET)).await.unwrap();
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.inner().calls(), 1);
    }

    #[tokio::test]
    async fn network_errors_follow_method_safety() {
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![
                Err(TransportError::Connect("refused".into())),
                Err(TransportError::Timeout),
                status(201),
            ]),
            fast_policy(3),
        );
        let err = transport.execute(request(Method::POST)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert_eq!(transport.inner().calls(), 2);

        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![Err(TransportError::Timeout), status(200)]),
            fast_policy(3),
        );
        let res = transport.execute(request(Method::GET)).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn honors_retry_after_header() {
        let mut throttled = HttpResponse {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        throttled
            .headers
            .insert(RETRY_AFTER, HeaderValue::from_static("0"));
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            log_retries: true,
        };
        let transport =
            RetryingTransport::new(ScriptedTransport::new(vec![Ok(throttled), status(200)]), policy);
        let started = std::time::Instant::now();
        let res = transport.execute(request(Method::GET)).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_token_stops_retrying() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            log_retries: false,
        };
        let transport = RetryingTransport::new(
            ScriptedTransport::new(vec![status(503), status(200)]),
            policy,
        )
        .with_cancellation(cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = transport.execute(request(Method::GET)).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(transport.inner().calls(), 1);
    }
}
