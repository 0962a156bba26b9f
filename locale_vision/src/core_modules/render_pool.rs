// THEORY:
// Full content rendering (a browser that executes scripts and waits for the
// network to go quiet) is the expensive half of the Resilient Fetcher. This
// module hides it behind one narrow call, `RenderPool::render(locator, timeout)`,
// and makes the lifetime of every rendering context a scoped acquisition:
//
// 1.  **Isolation**: each call opens its own context from the shared engine, so
//     cookies, storage and in-flight requests never cross between calls.
// 2.  **Bounded**: a semaphore caps how many contexts exist at once. The permit is
//     held until the context is fully closed.
// 3.  **Guaranteed release**: a `RenderLease` owns the context. On the normal
//     path (success or error) it is closed explicitly before `render` returns. If
//     the call is cancelled or its timeout fires mid-navigation, the lease's
//     `Drop` hands the context to a background task that closes it, so nothing
//     rendered leaks past the deadline.
//
// The engine itself is supplied by the embedding application through the
// `RenderEngine` / `RenderContext` traits.

use crate::core_modules::resource::ResourceLocator;
use crate::error::RenderError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// A shared content-rendering engine (e.g. one headless browser process).
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Opens a fresh, isolated rendering context.
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError>;
}

/// One isolated rendering context (e.g. one incognito browser page).
#[async_trait]
pub trait RenderContext: Send {
    async fn navigate(&mut self, locator: &str) -> Result<(), RenderError>;

    /// Resolves once the page's network activity has gone quiet.
    async fn wait_for_network_idle(&mut self) -> Result<(), RenderError>;

    /// The rendered document content.
    async fn content(&mut self) -> Result<String, RenderError>;

    /// Releases every resource held by the context. Must not fail.
    async fn close(self: Box<Self>);
}

/// Bounds and scopes access to a `RenderEngine`.
#[derive(Clone)]
pub struct RenderPool {
    engine: Arc<dyn RenderEngine>,
    permits: Arc<Semaphore>,
}

impl RenderPool {
    pub fn new(engine: Arc<dyn RenderEngine>, max_contexts: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_contexts.max(1))),
        }
    }

    /// Renders `locator` and returns the captured content, or fails within `timeout`.
    pub async fn render(&self, locator: &ResourceLocator, timeout: Duration) -> Result<String, RenderError> {
        match tokio::time::timeout(timeout, self.render_scoped(locator)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%locator, ?timeout, "rendering timed out; context released in background");
                Err(RenderError::TimedOut(timeout))
            }
        }
    }

    /// Number of contexts that could be opened right now.
    pub fn available_contexts(&self) -> usize {
        self.permits.available_permits()
    }

    async fn render_scoped(&self, locator: &ResourceLocator) -> Result<String, RenderError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::PoolClosed)?;
        let context = self.engine.open_context().await?;
        let mut lease = RenderLease {
            context: Some(context),
            permit: Some(permit),
        };

        let outcome = lease.capture(locator).await;
        lease.release().await;
        outcome
    }
}

/// Owns one open context plus its pool permit until the context is closed.
struct RenderLease {
    context: Option<Box<dyn RenderContext>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl RenderLease {
    async fn capture(&mut self, locator: &ResourceLocator) -> Result<String, RenderError> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| RenderError::Unavailable("context already released".to_string()))?;

        // --- 1. Navigate ---
        context.navigate(locator.as_str()).await?;
        // --- 2. Wait for network quiescence ---
        context.wait_for_network_idle().await?;
        // --- 3. Capture ---
        let content = context.content().await?;
        debug!(%locator, bytes = content.len(), "rendered content captured");
        Ok(content)
    }

    async fn release(mut self) {
        if let Some(context) = self.context.take() {
            context.close().await;
        }
        self.permit.take();
    }
}

impl Drop for RenderLease {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else { return };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    context.close().await;
                    drop(permit);
                });
            }
            Err(_) => warn!("no runtime available to close an abandoned render context"),
        }
    }
}
