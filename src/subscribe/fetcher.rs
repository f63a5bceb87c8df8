//! HTTP fetcher for subscription documents
//!
//! One [`SubscriptionFetcher`] is shared by every update cycle. It keeps a
//! pooled `reqwest` client and downloads a document straight into a staging
//! file, retrying under a [`RetryPolicy`]:
//! - network errors and stream errors are retried
//! - non-200 statuses are retried unless they fall in 405..=499
//! - shutdown aborts at once, even mid-request or mid-backoff
//!
//! TLS certificate verification is disabled. Subscription hosts are often
//! self-signed, and every document goes through the validator before use.

use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::headers::build_request_headers;
use crate::config::FetchConfig;
use crate::models::Subscription;
use crate::shutdown::ShutdownListener;
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryError, RetryPolicy};

/// Idle connections are dropped from the pool after this long
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Everything needed to replay one request on each attempt
struct PreparedRequest {
    method: Method,
    url: reqwest::Url,
    headers: HeaderMap,
    body: Option<String>,
}

/// Subscription document downloader
#[derive(Debug, Clone)]
pub struct SubscriptionFetcher {
    /// HTTP client with configured timeouts and compression
    client: Client,

    /// Attempt budget and backoff curve
    policy: RetryPolicy,
}

impl SubscriptionFetcher {
    /// Create a fetcher from the `fetch` configuration section
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Self::with_policy(config, config.retry_policy())
    }

    /// Create a fetcher with an explicit retry policy
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_policy(config: &FetchConfig, policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(config.keepalive())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .build()?;

        Ok(Self { client, policy })
    }

    /// Retry policy applied to every download
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download a subscription into `destination`
    pub async fn fetch_subscription(
        &self,
        subscription: &Subscription,
        destination: &Path,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), FetchError> {
        self.fetch(
            &subscription.method,
            &subscription.url,
            &subscription.headers,
            &subscription.body,
            destination,
            shutdown,
        )
        .await
    }

    /// Download `url` into `destination`, retrying per the policy
    ///
    /// An empty `method` means GET. `body` is only sent with other methods.
    /// `headers` are `key=value` entries applied over the baseline set.
    ///
    /// # Errors
    ///
    /// - `FetchError::InvalidRequest` if method, url or a header is malformed
    /// - `FetchError::Status` for a status in 405..=499
    /// - `FetchError::MaxRetriesExceeded` once every attempt failed
    /// - `FetchError::Cancelled` if shutdown was signalled
    pub async fn fetch(
        &self,
        method: &str,
        url: &str,
        headers: &[String],
        body: &str,
        destination: &Path,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), FetchError> {
        let request = prepare(method, url, headers, body)?;
        info!(
            method = %request.method,
            host = request.url.host_str().unwrap_or_default(),
            destination = %destination.display(),
            "Downloading subscription"
        );

        let request = &request;
        let result = with_retry_if(
            &self.policy,
            shutdown,
            move |attempt| self.attempt(request, destination, attempt),
            FetchError::is_recoverable,
        )
        .await;

        match result {
            Ok(bytes) => {
                info!(bytes, destination = %destination.display(), "Download complete");
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(FetchError::Cancelled),
            Err(RetryError::Rejected { error, .. }) => Err(error),
            Err(RetryError::Exhausted { attempts, last }) => Err(FetchError::MaxRetriesExceeded {
                attempts,
                last: Box::new(last),
            }),
        }
    }

    /// One request; returns the number of bytes written
    async fn attempt(
        &self,
        request: &PreparedRequest,
        destination: &Path,
        attempt: u32,
    ) -> Result<u64, FetchError> {
        debug!(attempt, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        write_body(response, destination).await
    }
}

fn prepare(
    method: &str,
    url: &str,
    headers: &[String],
    body: &str,
) -> Result<PreparedRequest, FetchError> {
    let method = if method.trim().is_empty() {
        Method::GET
    } else {
        Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("method '{method}': {e}")))?
    };

    let url = reqwest::Url::parse(url)
        .map_err(|e| FetchError::InvalidRequest(format!("url '{url}': {e}")))?;

    let body = (method != Method::GET && !body.is_empty()).then(|| body.to_string());

    Ok(PreparedRequest {
        method,
        url,
        headers: build_request_headers(headers)?,
        body,
    })
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(error)
    }
}

/// Stream the response body into `destination`, truncating it first
async fn write_body(mut response: Response, destination: &Path) -> Result<u64, FetchError> {
    let write_error = |source| FetchError::Write {
        path: destination.to_path_buf(),
        source,
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_error)?;
    }

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(write_error)?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        file.write_all(&chunk).await.map_err(write_error)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(write_error)?;
    file.sync_all().await.map_err(write_error)?;
    Ok(written)
}
