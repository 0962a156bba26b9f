// THEORY:
// The Resilient Fetcher retrieves the raw content behind a `ResourceLocator`. It
// has exactly two strategies and a strict policy for combining them:
//
// 1.  **Direct retrieval first**: a plain protocol-level GET through one pooled
//     HTTP client, bounded by the caller's timeout. A 2xx response returns
//     immediately, tagged `direct`. The renderer is never touched.
// 2.  **One rendering fallback**: if the direct attempt failed (network error,
//     timeout, non-2xx status) and the caller allows it, the locator is rendered
//     once through the `RenderPool`, tagged `rendered`.
// 3.  **Never loop**: there is no retry and no backoff. If the fallback fails too,
//     or was not allowed, the caller gets a `FetchError` carrying both failures.
//
// Concurrent fetches for different locators are independent. The only shared
// pieces are the HTTP client (internally pooled, safe for concurrent use) and the
// render pool (which isolates each call in its own context).

use crate::config::FetchConfig;
use crate::core_modules::render_pool::RenderPool;
use crate::core_modules::resource::ResourceLocator;
use crate::error::{ConfigError, FetchCause, FetchError, FetchFailure};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

/// Which strategy produced a `FetchResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    Direct,
    Rendered,
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMethod::Direct => f.write_str("direct"),
            FetchMethod::Rendered => f.write_str("rendered"),
        }
    }
}

/// Successfully retrieved content. `method` is always recorded; `Rendered` only
/// ever appears after a failed direct attempt.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub locator: ResourceLocator,
    pub content: Bytes,
    pub method: FetchMethod,
    /// The HTTP status of the direct response. `None` for rendered content.
    pub http_status: Option<u16>,
    pub elapsed: Duration,
}

/// The raw outcome of one direct retrieval: any status, with its body.
#[derive(Debug, Clone)]
pub struct DirectResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Protocol-level retrieval without script execution.
#[async_trait]
pub trait DirectRetrieval: Send + Sync {
    /// Performs one request. Transport failures are returned as `FetchFailure`s
    /// with a `Network` or `Timeout` cause; HTTP error statuses are not failures
    /// at this level.
    async fn retrieve(&self, locator: &ResourceLocator, timeout: Duration) -> Result<DirectResponse, FetchFailure>;
}

/// `DirectRetrieval` over one pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
}

impl HttpRetriever {
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.direct_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> FetchFailure {
    let cause = if error.is_timeout() {
        FetchCause::Timeout
    } else {
        FetchCause::Network
    };
    FetchFailure::new(cause, error.to_string())
}

#[async_trait]
impl DirectRetrieval for HttpRetriever {
    async fn retrieve(&self, locator: &ResourceLocator, timeout: Duration) -> Result<DirectResponse, FetchFailure> {
        let response = self
            .client
            .get(locator.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| classify_transport_error(&e))?;
        Ok(DirectResponse { status, body })
    }
}

/// The Resilient Fetcher.
#[derive(Clone)]
pub struct Fetcher {
    direct: Arc<dyn DirectRetrieval>,
    renderer: Option<RenderPool>,
    render_timeout: Duration,
}

impl Fetcher {
    pub fn new(direct: Arc<dyn DirectRetrieval>, renderer: Option<RenderPool>, render_timeout: Duration) -> Self {
        Self {
            direct,
            renderer,
            render_timeout,
        }
    }

    /// A fetcher over a fresh pooled HTTP client and no rendering engine.
    pub fn from_config(config: &FetchConfig) -> Result<Self, ConfigError> {
        let direct = Arc::new(HttpRetriever::new(config)?);
        Ok(Self::new(direct, None, config.render_timeout))
    }

    pub fn can_render(&self) -> bool {
        self.renderer.is_some()
    }

    /// Retrieves `locator`: direct first, then at most one rendering fallback.
    pub async fn fetch(
        &self,
        locator: &ResourceLocator,
        allow_rendering: bool,
        timeout: Duration,
    ) -> Result<FetchResult, FetchError> {
        self.fetch_within(locator, allow_rendering, timeout, None).await
    }

    /// `fetch`, with both attempts also bounded by the call's `deadline`.
    pub async fn fetch_by(
        &self,
        locator: &ResourceLocator,
        allow_rendering: bool,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<FetchResult, FetchError> {
        self.fetch_within(locator, allow_rendering, timeout, Some(deadline)).await
    }

    async fn fetch_within(
        &self,
        locator: &ResourceLocator,
        allow_rendering: bool,
        timeout: Duration,
        deadline: Option<Instant>,
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        if deadline.is_some_and(|deadline| deadline <= started) {
            return Err(FetchError::deadline_elapsed(locator.clone()));
        }

        // --- 1. Direct retrieval ---
        let timeout_cutoff = started + timeout;
        let cut_by_deadline = deadline.is_some_and(|deadline| deadline < timeout_cutoff);
        let cutoff = match deadline {
            Some(deadline) => deadline.min(timeout_cutoff),
            None => timeout_cutoff,
        };
        let direct_failure = match timeout_at(cutoff, self.direct.retrieve(locator, timeout)).await {
            Ok(Ok(response)) if (200..300).contains(&response.status) => {
                debug!(%locator, status = response.status, bytes = response.body.len(), "direct retrieval succeeded");
                return Ok(FetchResult {
                    locator: locator.clone(),
                    content: response.body,
                    method: FetchMethod::Direct,
                    http_status: Some(response.status),
                    elapsed: started.elapsed(),
                });
            }
            Ok(Ok(response)) => FetchFailure::new(FetchCause::NonSuccessStatus, format!("HTTP {}", response.status)),
            Ok(Err(failure)) => failure,
            Err(_) if cut_by_deadline => FetchFailure::new(FetchCause::Timeout, "call deadline elapsed"),
            Err(_) => FetchFailure::new(FetchCause::Timeout, format!("no response within {:?}", timeout)),
        };
        warn!(%locator, failure = %direct_failure, "direct retrieval failed");

        // --- 2. Fallback gate ---
        let renderer = match (&self.renderer, allow_rendering) {
            (Some(renderer), true) => renderer,
            (None, true) => {
                debug!(%locator, "no render pool configured; not falling back");
                return Err(FetchError::direct_only(locator.clone(), direct_failure));
            }
            (_, false) => return Err(FetchError::direct_only(locator.clone(), direct_failure)),
        };
        let render_budget = match deadline {
            Some(deadline) => self.render_timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => self.render_timeout,
        };
        if render_budget.is_zero() {
            debug!(%locator, "call deadline reached before the rendering fallback");
            return Err(FetchError::direct_only(locator.clone(), direct_failure));
        }

        // --- 3. Single rendering fallback ---
        match renderer.render(locator, render_budget).await {
            Ok(content) => {
                debug!(%locator, bytes = content.len(), "rendering fallback succeeded");
                Ok(FetchResult {
                    locator: locator.clone(),
                    content: Bytes::from(content),
                    method: FetchMethod::Rendered,
                    http_status: None,
                    elapsed: started.elapsed(),
                })
            }
            Err(render_error) => {
                error!(%locator, "rendering fallback failed: {render_error}");
                Err(FetchError {
                    locator: locator.clone(),
                    direct: direct_failure,
                    rendered: Some(render_error.into()),
                })
            }
        }
    }
}
