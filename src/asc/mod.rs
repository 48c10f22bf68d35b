pub mod apps;
pub mod auth;
pub mod error;
pub mod linkages;
pub mod paginate;
pub mod poll;
pub mod retry;
pub mod transport;
pub mod types;
pub mod xcode_cloud;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientSettings, Config};

use self::auth::{JwtTokenProvider, StaticToken, TokenProvider};
use self::error::AscError;
use self::paginate::{paginate_all, paginate_each};
use self::retry::{RetryPolicy, retry_after};
use self::transport::{HttpRequest, HttpTransport, ReqwestTransport, RetryingTransport};
use self::types::{ListResponse, describe_error_body};

pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com/";

pub struct AppStoreConnectClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
    download_http: reqwest::Client,
    download_idle: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl AppStoreConnectClient {
    /// Builds a client that signs its own tokens from `config`'s credentials.
    pub fn new(config: &Config) -> Result<Self, AscError> {
        let credentials = config.require_credentials()?;
        let tokens = JwtTokenProvider::new(credentials)?;
        Self::with_token_provider(&config.settings, Arc::new(tokens))
    }

    /// Builds the production transport stack around an arbitrary token source.
    pub fn with_token_provider(
        settings: &ClientSettings,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, AscError> {
        let cancel = CancellationToken::new();
        let inner = ReqwestTransport::new(settings.timeout)?;
        let download_http = ReqwestTransport::download_client(settings.timeout)?;
        let transport = RetryingTransport::new(inner, settings.retry.clone())
            .with_cancellation(cancel.clone());
        Ok(Self {
            transport: Arc::new(transport),
            tokens,
            base_url: normalize_base_url(settings.base_url.clone()),
            download_http,
            download_idle: settings.timeout,
            // The transport already retries every request.
            retry: RetryPolicy::none(),
            cancel,
        })
    }

    /// Uses `transport` as is. Retries, if any, are the transport's concern.
    pub fn from_transport(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenProvider>,
        base_url: Url,
    ) -> Self {
        Self {
            transport,
            tokens,
            base_url: normalize_base_url(base_url),
            download_http: reqwest::Client::new(),
            download_idle: ClientSettings::default().timeout,
            retry: RetryPolicy::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.tokens = Arc::new(StaticToken::new(token));
        self
    }

    /// Overrides the base URL for API requests. Useful for tests with a mock server.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// Policy used by operation-level retries such as build run polling.
    /// Leave it at [`RetryPolicy::none`] when the transport retries on its
    /// own, or every attempt is multiplied.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Token shared with the transport. Cancelling it aborts pending retries
    /// and polls.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn bearer(&self) -> Result<String, AscError> {
        self.tokens.bearer().await
    }

    /// Joins relative paths onto the base URL. Anything that parses as an
    /// absolute URL must share the base URL's origin.
    fn resolve(&self, path_or_url: &str) -> Result<Url, AscError> {
        if let Ok(absolute) = Url::parse(path_or_url) {
            validate_next_url(&self.base_url, path_or_url)?;
            return Ok(absolute);
        }
        self.base_url
            .join(path_or_url.trim().trim_start_matches('/'))
            .map_err(|e| AscError::Url {
                url: path_or_url.to_string(),
                reason: e.to_string(),
            })
    }

    /// `path` on the API host with `query` pairs percent-encoded.
    pub(crate) fn api_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, AscError> {
        let mut url = self.resolve(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// A `next` link must point back at the API host the client talks to.
    pub fn validate_next_url(&self, next: &str) -> Result<(), AscError> {
        validate_next_url(&self.base_url, next)
    }

    async fn send(
        &self,
        method: Method,
        path_or_url: &str,
        body: Option<&Value>,
    ) -> Result<Bytes, AscError> {
        let url = self.resolve(path_or_url)?;
        let bearer = self.bearer().await?;

        let mut request = HttpRequest::new(method.clone(), url);
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|_| AscError::Config("bearer token contains invalid characters".to_string()))?;
        request.headers.insert(AUTHORIZATION, auth);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(body) = body {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            request.body = Some(Bytes::from(serde_json::to_vec(body)?));
        }

        let path = request.url.path().to_string();
        let res = self.transport.execute(request).await?;
        if !res.status.is_success() {
            return Err(AscError::Api {
                status: res.status,
                method: method.to_string(),
                path,
                message: describe_error_body(&res.body),
                retry_after: retry_after(&res.headers),
            });
        }
        tracing::debug!(%method, %path, status = res.status.as_u16(), bytes = res.body.len(), "request ok");
        Ok(res.body)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path_or_url: &str) -> Result<T, AscError> {
        let body = self.send(Method::GET, path_or_url, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn get(&self, path_or_url: &str) -> Result<Value, AscError> {
        self.get_json(path_or_url).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AscError> {
        let bytes = self.send(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, AscError> {
        self.post_json(path, &body).await
    }

    pub async fn patch_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AscError> {
        let bytes = self.send(Method::PATCH, path, Some(body)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// DELETE returns 204 with no body on success.
    pub async fn delete(&self, path: &str) -> Result<(), AscError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Fetches one page. Absolute URLs are checked against the base URL
    /// before any request is made.
    pub async fn list_page<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
    ) -> Result<ListResponse<T>, AscError> {
        self.get_json(path_or_url).await
    }

    pub async fn list_all_typed<T: DeserializeOwned>(&self, initial_path: &str) -> Result<Vec<T>, AscError> {
        let first = self.list_page::<T>(initial_path).await?;
        let all = paginate_all(first, move |next| async move { self.list_page(&next).await }).await?;
        Ok(all.data)
    }

    pub async fn list_all(&self, initial_path: &str) -> Result<Vec<Value>, AscError> {
        self.list_all_typed(initial_path).await
    }

    /// Streams pages to `consume` without holding every item in memory.
    pub async fn for_each_page<T, C>(&self, initial_path: &str, consume: C) -> Result<(), AscError>
    where
        T: DeserializeOwned,
        C: FnMut(ListResponse<T>) -> Result<(), AscError>,
    {
        let first = self.list_page::<T>(initial_path).await?;
        paginate_each(
            first,
            move |next| async move { self.list_page(&next).await },
            consume,
        )
        .await
    }
}

fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Same scheme, host and effective port.
pub fn same_origin(base: &Url, url: &Url) -> bool {
    url.scheme() == base.scheme()
        && url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default()
}

pub fn validate_next_url(base: &Url, next: &str) -> Result<(), AscError> {
    let invalid = |reason: &str| AscError::InvalidNextUrl {
        url: next.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(next).map_err(|e| invalid(&e.to_string()))?;
    if parsed.scheme() != base.scheme() {
        return Err(invalid(&format!("expected {} scheme", base.scheme())));
    }
    if !same_origin(base, &parsed) {
        return Err(invalid(&format!(
            "host does not match {}",
            base.host_str().unwrap_or_default()
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("credentials in URL are not allowed"));
    }
    Ok(())
}

/// Appends `limit` (clamped to Apple's 1..=200 range) to a path.
pub(crate) fn with_limit(path: &str, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => {
            let sep = if path.contains('?') { '&' } else { '?' };
            format!("{}{}limit={}", path, sep, limit.clamp(1, 200))
        }
        None => path.to_string(),
    }
}

pub(crate) fn require_id<'a>(value: &'a str, name: &'static str) -> Result<&'a str, AscError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AscError::MissingArgument(name));
    }
    Ok(trimmed)
}
