//! HTTP transport wrapper with retry and byte accounting.
//!
//! This module provides the [`Transport`] struct which sends requests through a
//! shared cookie-aware client, retries the designated transient status with
//! exponential backoff, and counts every body byte it streams.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, Method};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::REQUEST_TIMEOUT_SECS;
use super::error::TransportError;
use super::retry::RetryPolicy;

/// Cumulative count of response body bytes received.
///
/// Cloning shares the same counter. Only the transport increments it; the
/// progress reporter reads it.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes received so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, bytes: usize) {
        self.0
            .fetch_add(u64::try_from(bytes).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

/// A request description that can be replayed for each attempt.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    form: Option<Vec<(String, String)>>,
}

impl Request {
    /// A plain GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            form: None,
        }
    }

    /// A POST request with an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn post_form(url: Url, fields: &[(&str, &str)]) -> Self {
        Self {
            method: Method::POST,
            url,
            form: Some(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
        }
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build(&self, client: &Client) -> reqwest::RequestBuilder {
        let builder = client.request(self.method.clone(), self.url.clone());
        match &self.form {
            Some(fields) => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body)
            }
            None => builder,
        }
    }
}

/// Retrying HTTP transport shared by every work item of a run.
///
/// Cloning is cheap and shares the connection pool, cookie jar and byte
/// counter.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    jar: Arc<Jar>,
    policy: RetryPolicy,
    bytes: ByteCounter,
    retried: Arc<AtomicUsize>,
}

impl Transport {
    /// Creates a transport with the default timeout and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_policy(
            RetryPolicy::default(),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Creates a transport with an explicit retry policy and total request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(policy))]
    pub fn with_policy(policy: RetryPolicy, timeout: Duration) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let client = ClientBuilder::new()
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::network("<client builder>", e))?;
        Ok(Self {
            client,
            jar,
            policy,
            bytes: ByteCounter::new(),
            retried: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the shared byte counter.
    #[must_use]
    pub fn bytes(&self) -> &ByteCounter {
        &self.bytes
    }

    /// Returns how many retries this transport has performed.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Stores a cookie as if `url` had set it.
    pub fn add_cookie(&self, cookie: &str, url: &Url) {
        self.jar.add_cookie_str(cookie, url);
    }

    /// Looks up the value of the named cookie that would be sent to `url`.
    #[must_use]
    pub fn cookie(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.jar.cookies(url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }

    /// GET convenience wrapper around [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn get(&self, url: Url) -> Result<Fetched, TransportError> {
        self.execute(&Request::get(url)).await
    }

    /// Sends a request, retrying the designated transient status.
    ///
    /// Any other error status, any network error, and exhaustion of the retry
    /// budget are returned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::HttpStatus`] for unsuccessful responses and
    /// [`TransportError::Network`] for connection-level failures.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute(&self, request: &Request) -> Result<Fetched, TransportError> {
        self.policy
            .run(
                || self.attempt(request),
                |error, delay, remaining| {
                    warn!(
                        url = %request.url(),
                        error = %error,
                        delay_secs = delay.as_secs_f64(),
                        remaining,
                        "transient failure, sleeping before retry"
                    );
                    self.retried.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
    }

    async fn attempt(&self, request: &Request) -> Result<Fetched, TransportError> {
        let response = request
            .build(&self.client)
            .send()
            .await
            .map_err(|e| TransportError::network(request.url().as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::http_status(
                request.url().as_str(),
                status.as_u16(),
            ));
        }

        Ok(Fetched {
            url: response.url().clone(),
            response,
            bytes: self.bytes.clone(),
        })
    }
}

/// A successful response whose body has not been read yet.
///
/// Every read method streams the body and adds the received bytes to the
/// transport's [`ByteCounter`] chunk by chunk.
#[derive(Debug)]
pub struct Fetched {
    url: Url,
    response: reqwest::Response,
    bytes: ByteCounter,
}

impl Fetched {
    /// The final URL, after redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Body`] if the stream breaks.
    pub async fn bytes(self) -> Result<Vec<u8>, TransportError> {
        let url = self.url.to_string();
        let mut body = Vec::new();
        let mut stream = self.response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::body(url.clone(), e))?;
            self.bytes.add(chunk.len());
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Reads the body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Body`] if the stream breaks.
    pub async fn text(self) -> Result<String, TransportError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Reads the body as JSON regardless of the declared content type.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] if the body is not valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let url = self.url.to_string();
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::decode(url, e))
    }

    /// Streams the body into a new file at `path`, returning the bytes written.
    ///
    /// A partially written file is removed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] or [`TransportError::Body`].
    #[instrument(skip(self), fields(url = %self.url, path = %path.display()))]
    pub async fn save_to(self, path: &Path) -> Result<u64, TransportError> {
        let file = File::create(path)
            .await
            .map_err(|e| TransportError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let Self {
            url,
            response,
            bytes: counter,
        } = self;
        let url = url.to_string();

        let result: Result<u64, TransportError> = async {
            let mut written = 0u64;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| TransportError::body(url.clone(), e))?;
                counter.add(chunk.len());
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| TransportError::io(path, e))?;
                written += chunk.len() as u64;
            }
            writer
                .flush()
                .await
                .map_err(|e| TransportError::io(path, e))?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            debug!(path = %path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        result
    }
}
