//! Concurrent, guarded image downloads.
//!
//! Every URL goes through the same attempt loop: transient failures (network
//! errors, 429 and 5xx responses, interrupted bodies) are retried with
//! exponential backoff; validation failures (content type, size) end the loop
//! immediately. `data:image/...` references are decoded locally instead of
//! being requested.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::StatusCode;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::progress::{NoopReporter, ProgressReporter};
use crate::retry::{Backoff, DEFAULT_MAX_RETRIES};
use crate::validate::{validate_content_type, ContentTypeError};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "gh-ccimg/1.0";

/// Error text fragments that mark a request failure as worth retrying.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "timed out",
    "temporary failure",
    "network is unreachable",
    "no such host",
    "dns error",
];

const RETRYABLE_STATUSES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("download cancelled")]
    Cancelled,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("failed to create request: {0}")]
    InvalidRequest(String),
    #[error("HTTP request failed after {attempts} attempts: {message}")]
    Request { attempts: u32, message: String },
    #[error("HTTP {status}: {reason} (after {attempts} attempts)")]
    Status {
        status: u16,
        reason: String,
        attempts: u32,
    },
    #[error(transparent)]
    ContentType(#[from] ContentTypeError),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("failed to read response body after {attempts} attempts: {message}")]
    Body { attempts: u32, message: String },
    #[error("empty response body")]
    EmptyBody,
    #[error("invalid data URL: {0}")]
    DataUrl(String),
    #[error("download worker stopped before reporting")]
    WorkerLost,
}

// ── Public types ─────────────────────────────────────────────────────────────

/// Limits a [`Fetcher`] enforces on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Byte ceiling for a single image.
    pub max_size: u64,
    /// Bound on each HTTP request, connect through last body byte.
    pub timeout: Duration,
    /// Number of workers draining the URL queue.
    pub concurrency: usize,
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl FetchConfig {
    pub fn new(max_size: u64, timeout: Duration, concurrency: usize) -> Self {
        Self {
            max_size,
            timeout,
            concurrency,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::DOWNLOAD,
        }
    }
}

/// A downloaded image. `data` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub data: Vec<u8>,
    pub content_type: String,
    pub size: u64,
}

/// Outcome of one URL. Either image bytes or the reason there are none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub url: String,
    pub outcome: Result<FetchedImage, FetchError>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }

    pub fn image(&self) -> Option<&FetchedImage> {
        self.outcome.as_ref().ok()
    }
}

// ── Fetcher ──────────────────────────────────────────────────────────────────

/// Downloads images under a fixed worker pool. Configuration is fixed at construction.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    reporter: Arc<dyn ProgressReporter>,
}

impl Fetcher {
    pub fn new(max_size: u64, timeout: Duration, concurrency: usize) -> Result<Self, FetchError> {
        Self::with_config(FetchConfig::new(max_size, timeout, concurrency))
    }

    pub fn with_config(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            reporter: Arc::new(NoopReporter),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Downloads every URL and returns exactly one result per input, in
    /// completion order. Callers correlate by [`FetchResult::url`].
    ///
    /// Once `cancel` fires, URLs still queued come back as
    /// [`FetchError::Cancelled`] and in-flight requests are interrupted.
    pub async fn fetch_concurrent(
        &self,
        cancel: &CancellationToken,
        urls: &[String],
    ) -> Vec<FetchResult> {
        if urls.is_empty() {
            return Vec::new();
        }

        self.reporter.start(urls.len());

        let (work_tx, work_rx) = mpsc::channel::<String>(urls.len());
        for url in urls {
            // Capacity equals the URL count, so the queue cannot be full.
            let _ = work_tx.try_send(url.clone());
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<FetchResult>();
        let workers = self.config.concurrency.clamp(1, urls.len());
        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let fetcher = self.clone();
            let cancel = cancel.clone();
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            pool.spawn(async move {
                fetcher.worker(worker_id, cancel, work_rx, result_tx).await;
            });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(urls.len());
        while let Some(result) = result_rx.recv().await {
            self.reporter
                .update(results.len() + 1, &result.url, result.error());
            results.push(result);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("download worker failed: {}", e);
            }
        }

        for url in unreported(urls, &results) {
            let result = FetchResult {
                url,
                outcome: Err(FetchError::WorkerLost),
            };
            self.reporter
                .update(results.len() + 1, &result.url, result.error());
            results.push(result);
        }

        self.reporter.finish();
        results
    }

    /// Downloads one URL through the full retry loop.
    pub async fn fetch_single(&self, cancel: &CancellationToken, url: &str) -> FetchResult {
        let outcome = if url.trim_start().to_lowercase().starts_with("data:") {
            self.decode_data_url(url)
        } else {
            self.fetch_http(cancel, url).await
        };

        match &outcome {
            Ok(image) => debug!(
                url,
                bytes = image.size,
                content_type = %image.content_type,
                "downloaded"
            ),
            Err(e) => debug!(url, error = %e, "download failed"),
        }

        FetchResult {
            url: url.to_string(),
            outcome,
        }
    }

    async fn worker(
        &self,
        worker_id: usize,
        cancel: CancellationToken,
        queue: Arc<Mutex<mpsc::Receiver<String>>>,
        results: mpsc::UnboundedSender<FetchResult>,
    ) {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(url) = next else {
                break;
            };

            let result = if cancel.is_cancelled() {
                FetchResult {
                    url,
                    outcome: Err(FetchError::Cancelled),
                }
            } else {
                debug!(worker_id, url = %url, "fetching");
                self.fetch_single(&cancel, &url).await
            };

            if results.send(result).is_err() {
                break;
            }
        }
    }

    // ── HTTP attempt loop ────────────────────────────────────────────────────

    async fn fetch_http(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<FetchedImage, FetchError> {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let attempts = attempt + 1;
            let retries_left = attempt < max_retries;

            let sent = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                sent = self.client.get(url).send() => sent,
            };

            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_builder() => {
                    return Err(FetchError::InvalidRequest(error_chain(&e)));
                }
                Err(e) => {
                    let message = error_chain(&e);
                    if retries_left && is_transient(&e, &message) {
                        debug!(
                            url,
                            attempt = attempts,
                            error = %message,
                            "transient request failure, retrying"
                        );
                        self.pause(cancel, attempt).await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request { attempts, message });
                }
            };

            let status = response.status();
            if status != StatusCode::OK {
                if retries_left && RETRYABLE_STATUSES.contains(&status) {
                    debug!(
                        url,
                        attempt = attempts,
                        status = status.as_u16(),
                        "retryable status, retrying"
                    );
                    drop(response);
                    self.pause(cancel, attempt).await?;
                    attempt += 1;
                    continue;
                }
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                    attempts,
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            validate_content_type(&content_type)?;

            if let Some(declared) = response.content_length() {
                if declared > self.config.max_size {
                    return Err(FetchError::TooLarge {
                        size: declared,
                        max: self.config.max_size,
                    });
                }
            }

            match self.read_limited(cancel, response).await {
                Ok(data) if data.is_empty() => return Err(FetchError::EmptyBody),
                Ok(data) => {
                    return Ok(FetchedImage {
                        size: data.len() as u64,
                        data,
                        content_type,
                    })
                }
                Err(BodyError::Fatal(e)) => return Err(e),
                Err(BodyError::Interrupted(message)) => {
                    if retries_left {
                        debug!(
                            url,
                            attempt = attempts,
                            error = %message,
                            "body read failed, retrying"
                        );
                        self.pause(cancel, attempt).await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Body { attempts, message });
                }
            }
        }
    }

    /// Reads the body, stopping as soon as it grows past `max_size`.
    async fn read_limited(
        &self,
        cancel: &CancellationToken,
        mut response: reqwest::Response,
    ) -> Result<Vec<u8>, BodyError> {
        let max = self.config.max_size;
        let mut data = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(BodyError::Fatal(FetchError::Cancelled)),
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    data.extend_from_slice(&bytes);
                    if data.len() as u64 > max {
                        return Err(BodyError::Fatal(FetchError::TooLarge {
                            size: data.len() as u64,
                            max,
                        }));
                    }
                }
                Ok(None) => return Ok(data),
                Err(e) => return Err(BodyError::Interrupted(error_chain(&e))),
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken, attempt: u32) -> Result<(), FetchError> {
        if self.config.backoff.wait(attempt, cancel).await {
            Ok(())
        } else {
            Err(FetchError::Cancelled)
        }
    }

    // ── data: URLs ───────────────────────────────────────────────────────────

    fn decode_data_url(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let rest = url.trim();
        let rest = rest
            .get(5..)
            .ok_or_else(|| FetchError::DataUrl("missing payload".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| FetchError::DataUrl("missing ',' separator".to_string()))?;

        let mut params = meta.split(';');
        let content_type = params.next().unwrap_or_default().trim().to_string();
        let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        validate_content_type(&content_type)?;
        if !is_base64 {
            return Err(FetchError::DataUrl(
                "only base64-encoded data URLs are supported".to_string(),
            ));
        }

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        // Decoded size is at most 3/4 of the encoded length.
        let estimated = (compact.len() as u64 / 4) * 3;
        if estimated > self.config.max_size.saturating_add(3) {
            return Err(FetchError::TooLarge {
                size: estimated,
                max: self.config.max_size,
            });
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| FetchError::DataUrl(e.to_string()))?;
        if data.is_empty() {
            return Err(FetchError::DataUrl("empty payload".to_string()));
        }
        if data.len() as u64 > self.config.max_size {
            return Err(FetchError::TooLarge {
                size: data.len() as u64,
                max: self.config.max_size,
            });
        }

        Ok(FetchedImage {
            size: data.len() as u64,
            data,
            content_type,
        })
    }
}

enum BodyError {
    Fatal(FetchError),
    Interrupted(String),
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Error message including every `source()` in the chain.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn is_transient(err: &reqwest::Error, message: &str) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    let lower = message.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// URLs (with multiplicity) that have no result yet.
fn unreported(urls: &[String], results: &[FetchResult]) -> Vec<String> {
    let mut pending: HashMap<&str, usize> = HashMap::new();
    for url in urls {
        *pending.entry(url.as_str()).or_default() += 1;
    }
    for result in results {
        if let Some(count) = pending.get_mut(result.url.as_str()) {
            *count = count.saturating_sub(1);
        }
    }
    urls.iter()
        .filter(|url| match pending.get_mut(url.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        })
        .cloned()
        .collect()
}
