use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::{
    logger::default_logger, CancelReason, ClientConfig, HttpClientError, Logger, RequestContext,
    Result,
};

/// MIME type sent with [`ContentType::Json`] bodies.
pub const MIME_JSON: &str = "application/json";
/// MIME type sent with [`ContentType::Form`] bodies.
pub const MIME_FORM: &str = "application/x-www-form-urlencoded";

/// Encoding applied to a POST body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    /// `application/json` via `serde_json`.
    Json,
    /// `application/x-www-form-urlencoded`.
    Form,
}

impl ContentType {
    /// Value of the `Content-Type` header for this encoding.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Json => MIME_JSON,
            Self::Form => MIME_FORM,
        }
    }
}

/// HTTP client with a pooled keep-alive transport, per-attempt timeouts and
/// retry with backoff on transport failures.
///
/// Build one at startup and share it; clones reuse the same connection pool
/// and the same retry count.
#[derive(Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    config: ClientConfig,
    retry_count: Arc<AtomicU32>,
    logger: Arc<dyn Logger>,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.config)
            .field("retry_count", &self.retry_count())
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Builds the transport from `config`. No I/O happens here.
    ///
    /// # Errors
    ///
    /// [`HttpClientError::Configuration`] when the transport cannot be built
    /// from the given settings (for example an invalid user agent).
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_transport(&config)?;
        Ok(Self {
            http,
            retry_count: Arc::new(AtomicU32::new(config.retry_count)),
            config,
            logger: default_logger(),
        })
    }

    /// Builds a client from a TOML document, see [`ClientConfig::from_toml_str`].
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Self::new(ClientConfig::from_toml_str(input)?)
    }

    /// Builds a client from a TOML file, see [`ClientConfig::from_file`].
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(ClientConfig::from_file(path)?)
    }

    /// Replaces the diagnostics sink.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Configuration the transport was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Retry budget applied to requests started from now on.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Overrides the retry budget for this client and all of its clones.
    ///
    /// Requests already in flight keep the budget they started with.
    pub fn set_retry_count(&self, retry_count: u32) {
        self.retry_count.store(retry_count, Ordering::Relaxed);
    }

    /// Sends a GET request and decodes the JSON response into `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        url: &str,
        headers: Option<&HeaderMap>,
    ) -> Result<T> {
        let url = parse_url(url)?;
        let mut builder = self.http.request(Method::GET, url);
        if let Some(headers) = headers {
            builder = builder.headers(headers.clone());
        }
        let request = builder
            .build()
            .map_err(|err| HttpClientError::InvalidRequest(err.to_string()))?;
        self.execute(ctx, request).await
    }

    /// Encodes `body` as `content_type`, sends a POST request and decodes the
    /// JSON response into `T`.
    ///
    /// The body is encoded once; retries resend the same bytes.
    pub async fn post<B, T>(
        &self,
        ctx: &RequestContext,
        url: &str,
        content_type: ContentType,
        headers: Option<&HeaderMap>,
        body: &B,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = parse_url(url)?;
        let mut builder = self.http.request(Method::POST, url);
        if let Some(headers) = headers {
            builder = builder.headers(headers.clone());
        }

        let request = match content_type {
            ContentType::Json => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|err| HttpClientError::Encode(err.to_string()))?;
                let mut request = builder
                    .body(bytes)
                    .build()
                    .map_err(|err| HttpClientError::InvalidRequest(err.to_string()))?;
                request
                    .headers_mut()
                    .entry(CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static(MIME_JSON));
                request
            }
            // The URL is already valid, so a build failure here is the form encoder's.
            ContentType::Form => builder
                .form(body)
                .build()
                .map_err(|err| HttpClientError::Encode(err.to_string()))?,
        };

        self.execute(ctx, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        request: reqwest::Request,
    ) -> Result<T> {
        let retries = self.retry_count();
        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if let Some(reason) = ctx.check() {
                return Err(self.cancelled(&method, &url, reason, attempt, started));
            }

            let attempt_request = request.try_clone().ok_or_else(|| {
                HttpClientError::InvalidRequest("request body cannot be replayed".to_owned())
            })?;
            attempt = attempt.saturating_add(1);
            self.logger.debug(&format!(
                "{method} {url}: attempt {attempt} of {}",
                retries.saturating_add(1)
            ));

            let outcome = tokio::select! {
                biased;
                reason = ctx.done() => return Err(self.cancelled(&method, &url, reason, attempt, started)),
                outcome = self.send_once(attempt_request) => outcome,
            };

            let err = match outcome {
                Ok((status, body)) => return self.decode(&method, &url, status, &body),
                Err(err) if err.is_builder() => {
                    return Err(HttpClientError::InvalidRequest(err.to_string()));
                }
                Err(err) if !should_retry_transport(&err) => {
                    let elapsed = started.elapsed();
                    self.logger.error(&format!(
                        "{method} {url}: attempt {attempt} failed with a non-retryable error: {err}"
                    ));
                    return Err(HttpClientError::Request {
                        attempts: attempt,
                        elapsed,
                        source: err,
                    });
                }
                Err(err) => err,
            };

            if attempt > retries {
                let elapsed = started.elapsed();
                self.logger.error(&format!(
                    "{method} {url}: giving up after {attempt} attempt(s) in {elapsed:?}: {err}"
                ));
                return Err(HttpClientError::Transport {
                    attempts: attempt,
                    elapsed,
                    source: err,
                });
            }

            let delay = self.config.backoff_delay(attempt - 1);
            self.logger.warn(&format!(
                "{method} {url}: attempt {attempt} failed: {err}; retrying in {delay:?}"
            ));
            self.wait_before_retry(ctx, delay)
                .await
                .map_err(|reason| self.cancelled(&method, &url, reason, attempt, started))?;
        }
    }

    async fn send_once(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<(StatusCode, Vec<u8>), reqwest::Error> {
        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok((status, body))
    }

    /// Sleeps for `delay` unless the context finishes first.
    async fn wait_before_retry(
        &self,
        ctx: &RequestContext,
        delay: Duration,
    ) -> std::result::Result<(), CancelReason> {
        tokio::select! {
            biased;
            reason = ctx.done() => Err(reason),
            () = sleep(delay) => Ok(()),
        }
    }

    fn decode<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &Url,
        status: StatusCode,
        body: &[u8],
    ) -> Result<T> {
        serde_json::from_slice(body).map_err(|source| {
            self.logger.error(&format!(
                "{method} {url}: cannot decode response (status {status}): {source}"
            ));
            HttpClientError::Decode {
                status: status.as_u16(),
                source,
            }
        })
    }

    fn cancelled(
        &self,
        method: &Method,
        url: &Url,
        reason: CancelReason,
        attempts: u32,
        started: Instant,
    ) -> HttpClientError {
        let elapsed = started.elapsed();
        self.logger.error(&format!(
            "{method} {url}: {reason} after {attempts} attempt(s) in {elapsed:?}"
        ));
        HttpClientError::Cancelled {
            reason,
            attempts,
            elapsed,
        }
    }
}

fn build_transport(config: &ClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if !config.dial_timeout.is_zero() {
        builder = builder.connect_timeout(config.dial_timeout);
    }
    if !config.read_timeout.is_zero() {
        builder = builder.timeout(config.read_timeout);
    }
    if !config.keep_alive.is_zero() {
        builder = builder.tcp_keepalive(config.keep_alive);
    }
    if !config.pool_idle_timeout.is_zero() {
        builder = builder.pool_idle_timeout(config.pool_idle_timeout);
    }
    if let Some(max) = config.pool_max_idle_per_host {
        builder = builder.pool_max_idle_per_host(max);
    }
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }
    builder
        .build()
        .map_err(|err| HttpClientError::Configuration(format!("cannot build HTTP transport: {err}")))
}

/// Connect, timeout, send and body-read failures are transient; redirect
/// policy and response decoding failures are not.
fn should_retry_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|err| HttpClientError::InvalidRequest(format!("invalid url '{url}': {err}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ContentType, ResilientClient};
    use crate::{ClientConfig, HttpClientError, RequestContext};

    #[test]
    fn content_type_mime_strings() {
        assert_eq!(ContentType::Json.mime(), "application/json");
        assert_eq!(
            ContentType::Form.mime(),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn new_seeds_retry_count_from_config() {
        let client = ResilientClient::new(ClientConfig::new().with_retry_count(4))
            .expect("client must build");
        assert_eq!(client.retry_count(), 4);
    }

    #[test]
    fn set_retry_count_is_shared_by_clones() {
        let client = ResilientClient::new(ClientConfig::new()).expect("client must build");
        let clone = client.clone();
        clone.set_retry_count(7);
        assert_eq!(client.retry_count(), 7);
        assert_eq!(client.config().retry_count, 0);
    }

    #[test]
    fn invalid_user_agent_is_configuration_error() {
        let err = ResilientClient::new(ClientConfig::new().with_user_agent("bad\nagent"))
            .expect_err("newline in user agent must fail");
        assert!(matches!(err, HttpClientError::Configuration(_)));
    }

    #[test]
    fn builds_with_every_option_set() {
        let config = ClientConfig::new()
            .with_dial_timeout(Duration::from_secs(1))
            .with_read_timeout(Duration::from_secs(2))
            .with_keep_alive(Duration::from_secs(30))
            .with_pool_idle_timeout(Duration::from_secs(90))
            .with_pool_max_idle_per_host(8)
            .with_user_agent("resilient-http-test");
        let client = ResilientClient::new(config).expect("client must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("ResilientClient"));
        assert!(debug.contains("resilient-http-test"));
    }

    #[tokio::test]
    async fn malformed_url_is_invalid_request() {
        let client = ResilientClient::new(ClientConfig::new().with_retry_count(3))
            .expect("client must build");
        let err = client
            .get::<serde_json::Value>(&RequestContext::new(), "not a url", None)
            .await
            .expect_err("malformed url must fail");
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unserializable_body_is_encode_error() {
        let client = ResilientClient::new(ClientConfig::new()).expect("client must build");
        // Nested maps cannot be form-encoded.
        let body = serde_json::json!({ "outer": { "inner": 1 } });
        let err = client
            .post::<_, serde_json::Value>(
                &RequestContext::new(),
                "http://127.0.0.1:9/",
                ContentType::Form,
                None,
                &body,
            )
            .await
            .expect_err("nested form body must fail");
        assert!(matches!(err, HttpClientError::Encode(_)));
    }

    #[tokio::test]
    async fn already_cancelled_context_sends_nothing() {
        let client = ResilientClient::new(ClientConfig::new()).expect("client must build");
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = client
            .get::<serde_json::Value>(&ctx, "http://127.0.0.1:9/", None)
            .await
            .expect_err("cancelled context must fail");
        assert_eq!(err.attempts(), Some(0));
        assert!(err.is_cancellation());
    }
}
