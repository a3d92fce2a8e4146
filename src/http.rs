//! Shared HTTP transport: one pooled client plus admission control.
//!
//! Every search, resolution, and retrieval request in the engine goes
//! through this wrapper. A semaphore bounds total in-flight requests; once
//! the pool is exhausted new requests wait for a permit instead of opening
//! more sockets, which is the engine's backpressure mechanism. Keep-alive
//! reuse per host is bounded at the reqwest pool level.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, RETRY_AFTER};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineConfig;

/// Retry-After values above this are treated as this; a mirror asking for
/// more effectively declines the request.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Transport-level failure. Helper constructors attach the URL so callers
/// never need to re-wrap; there are intentionally no `From` impls for
/// `reqwest::Error`, which would erase that context.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP status {status} from {url}")]
    Status {
        url: String,
        status: u16,
        /// Parsed Retry-After, present on 429/503 responses that carried one.
        retry_after: Option<Duration>,
    },

    #[error("connection pool closed")]
    PoolClosed,
}

impl HttpError {
    #[must_use]
    pub fn network(url: &Url, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }

    #[must_use]
    pub fn timeout(url: &Url, timeout: Duration) -> Self {
        Self::Timeout {
            url: url.to_string(),
            timeout,
        }
    }

    #[must_use]
    pub fn status(url: &Url, status: u16, retry_after: Option<Duration>) -> Self {
        Self::Status {
            url: url.to_string(),
            status,
            retry_after,
        }
    }

    /// True for failures worth retrying on the same endpoint: timeouts,
    /// connection drops, 408/429/5xx. Client errors (4xx) are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Status { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            Self::Build { .. } | Self::PoolClosed => false,
        }
    }

    /// Server-requested delay before the next attempt, when one was given.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Declared metadata from a HEAD probe. No body bytes were transferred.
#[derive(Debug, Clone)]
pub struct ProbeReply {
    /// Declared body size, absent when the server omitted Content-Length.
    pub content_length: Option<u64>,
    /// URL after redirects; download filenames fall back to its last segment.
    pub final_url: Url,
}

/// An open streaming body. Holds its admission permit for as long as the
/// stream lives, so dropping it mid-transfer releases the slot promptly.
pub struct BodyStream {
    url: Url,
    final_url: Url,
    content_length: Option<u64>,
    content_disposition: Option<String>,
    stream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    _permit: OwnedSemaphorePermit,
}

impl BodyStream {
    /// Declared Content-Length of this response, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Raw Content-Disposition header value, if any.
    #[must_use]
    pub fn content_disposition(&self) -> Option<&str> {
        self.content_disposition.as_deref()
    }

    /// URL that actually served the body, after redirects.
    #[must_use]
    pub fn final_url(&self) -> &Url {
        &self.final_url
    }

    /// Next body chunk; `None` when the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<bytes::Bytes>, HttpError> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(HttpError::network(&self.url, e)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("url", &self.url.as_str())
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Pooled HTTP client shared by the whole engine.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    permits: Arc<Semaphore>,
}

impl HttpTransport {
    /// Builds the transport from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] when the underlying client cannot be
    /// constructed (e.g. broken TLS backend or system proxy settings).
    pub fn new(config: &EngineConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_keepalive_per_host)
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| HttpError::Build { source })?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, HttpError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HttpError::PoolClosed)
    }

    /// Fetches a page as text. The timeout covers the whole operation,
    /// queueing for a permit included.
    pub async fn get_text(&self, url: &Url, timeout: Duration) -> Result<String, HttpError> {
        let fetch = async {
            let _permit = self.acquire().await?;
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| classify_send_error(url, timeout, e))?;
            let response = check_status(url, response)?;
            response
                .text()
                .await
                .map_err(|e| HttpError::network(url, e))
        };
        run_with_timeout(url, timeout, fetch).await
    }

    /// Metadata-only probe: issues a HEAD request and reports the declared
    /// length without transferring any body bytes.
    pub async fn probe(&self, url: &Url, timeout: Duration) -> Result<ProbeReply, HttpError> {
        let fetch = async {
            let _permit = self.acquire().await?;
            let response = self
                .client
                .head(url.clone())
                .send()
                .await
                .map_err(|e| classify_send_error(url, timeout, e))?;
            let response = check_status(url, response)?;
            let content_length = header_u64(&response, CONTENT_LENGTH.as_str());
            debug!(url = %url, content_length, "probe complete");
            Ok(ProbeReply {
                content_length,
                final_url: response.url().clone(),
            })
        };
        run_with_timeout(url, timeout, fetch).await
    }

    /// Opens a GET body stream. The timeout covers connection and response
    /// headers only; the caller bounds body streaming itself. The returned
    /// stream owns an admission permit until dropped.
    pub async fn open_stream(&self, url: &Url, timeout: Duration) -> Result<BodyStream, HttpError> {
        let open = async {
            let permit = self.acquire().await?;
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| classify_send_error(url, timeout, e))?;
            let response = check_status(url, response)?;
            let content_length = header_u64(&response, CONTENT_LENGTH.as_str());
            let content_disposition = response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            let final_url = response.url().clone();
            Ok(BodyStream {
                url: url.clone(),
                final_url,
                content_length,
                content_disposition,
                stream: Box::pin(response.bytes_stream()),
                _permit: permit,
            })
        };
        run_with_timeout(url, timeout, open).await
    }
}

fn classify_send_error(url: &Url, timeout: Duration, error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::timeout(url, timeout)
    } else {
        HttpError::network(url, error)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

async fn run_with_timeout<T>(
    url: &Url,
    timeout: Duration,
    fut: impl Future<Output = Result<T, HttpError>>,
) -> Result<T, HttpError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::timeout(url, timeout)),
    }
}

fn check_status(url: &Url, response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = if matches!(status.as_u16(), 429 | 503) {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
    } else {
        None
    };
    if retry_after.is_some() {
        warn!(url = %url, status = status.as_u16(), ?retry_after, "mirror asked to slow down");
    }
    Err(HttpError::status(url, status.as_u16(), retry_after))
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parses a Retry-After header value: integer seconds or an HTTP-date,
/// capped at [`MAX_RETRY_AFTER`]. Unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        return match datetime.duration_since(now) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date in the past: retry immediately.
            Err(_) => Some(Duration::ZERO),
        };
    }

    debug!(header_value, "unparseable Retry-After value");
    None
}
