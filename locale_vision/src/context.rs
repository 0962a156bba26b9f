// THEORY:
// Everything expensive is created exactly once and then shared read-only by every
// call: the pooled HTTP client (inside the `Fetcher`), the optional render pool,
// the loaded models and the inference workers. The `AnalysisContext` owns them and
// is never mutated after construction, so any number of concurrent calls can
// borrow it without locking. Component functions take `&AnalysisContext` instead
// of reaching for globals.

use crate::config::AnalysisConfig;
use crate::core_modules::fetcher::{DirectRetrieval, FetchResult, Fetcher, HttpRetriever};
use crate::core_modules::models::ModelSet;
use crate::core_modules::render_pool::{RenderEngine, RenderPool};
use crate::error::{AnalysisError, ConfigError, Stage};
use crate::worker_pool::InferencePool;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

pub struct AnalysisContext {
    config: AnalysisConfig,
    fetcher: Fetcher,
    models: ModelSet,
    pool: InferencePool,
}

impl AnalysisContext {
    /// Builds a context over a real HTTP client. Must be called inside a tokio
    /// runtime, since the inference workers are spawned immediately.
    pub fn new(
        config: AnalysisConfig,
        models: ModelSet,
        render_engine: Option<Arc<dyn RenderEngine>>,
    ) -> Result<Self, ConfigError> {
        let retriever = Arc::new(HttpRetriever::new(&config.fetch)?);
        Ok(Self::with_retriever(config, models, retriever, render_engine))
    }

    /// Builds a context over any direct retrieval backend.
    pub fn with_retriever(
        config: AnalysisConfig,
        models: ModelSet,
        retriever: Arc<dyn DirectRetrieval>,
        render_engine: Option<Arc<dyn RenderEngine>>,
    ) -> Self {
        let renderer = render_engine.map(|engine| RenderPool::new(engine, config.fetch.max_render_contexts));
        let fetcher = Fetcher::new(retriever, renderer, config.fetch.render_timeout);
        let pool = InferencePool::new(config.inference_workers);
        info!(
            workers = pool.worker_count(),
            rendering = fetcher.can_render(),
            "analysis context ready"
        );
        Self {
            config,
            fetcher,
            models,
            pool,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn pool(&self) -> &InferencePool {
        &self.pool
    }

    /// A deadline `budget` from now.
    pub fn deadline_after(&self, budget: Duration) -> Instant {
        Instant::now() + budget
    }

    /// Decodes fetched content into an RGB image on the inference pool.
    pub async fn decode(&self, fetched: &FetchResult, deadline: Instant) -> Result<RgbImage, AnalysisError> {
        let content = fetched.content.clone();
        let decoded = self
            .pool
            .run(Stage::Decode, deadline, move || {
                image::load_from_memory(&content).map(|image| image.to_rgb8())
            })
            .await?;
        decoded.map_err(|e| AnalysisError::Decode {
            locator: fetched.locator.clone(),
            detail: e.to_string(),
        })
    }
}
