// THEORY:
// The `pipeline` module is the top-level API of the verification engine. A
// `VerificationPipeline` wraps one shared `AnalysisContext` and exposes the three
// operations a request-routing layer needs:
//
// - `fetch`:            retrieve the content behind a locator.
// - `match_faces`:      decide whether two images show the same person.
// - `extract_document`: transcribe a document and pull named fields out of it.
//
// Each operation has a `_by` variant taking an explicit deadline; the plain
// variants derive one from the configured per-operation budget. The pipeline is
// cheap to clone and every clone shares the same context, so it can be handed to
// as many concurrent request handlers as needed.

use crate::context::AnalysisContext;
use crate::core_modules::face_matcher::{face_matcher, FaceMatchResult};
use crate::core_modules::fetcher::FetchResult;
use crate::core_modules::field_extractor::{field_extractor, ExtractionResult};
use crate::core_modules::resource::ResourceLocator;
use crate::core_modules::schema::ExtractionSchema;
use crate::error::{AnalysisError, ConfigError, FetchError};
use std::sync::Arc;
use tokio::time::Instant;

/// The main, top-level handle to the verification engine.
#[derive(Clone)]
pub struct VerificationPipeline {
    context: Arc<AnalysisContext>,
    k1_schema: Arc<ExtractionSchema>,
}

impl VerificationPipeline {
    pub fn new(context: AnalysisContext) -> Result<Self, ConfigError> {
        Self::shared(Arc::new(context))
    }

    /// Builds a pipeline over a context that is already shared elsewhere.
    pub fn shared(context: Arc<AnalysisContext>) -> Result<Self, ConfigError> {
        let k1_schema = ExtractionSchema::k1_partnership(context.config().extractor.stub_fields)?;
        Ok(Self {
            context,
            k1_schema: Arc::new(k1_schema),
        })
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.context
    }

    /// Retrieves `locator`, falling back to rendering when configured to.
    pub async fn fetch(&self, locator: &ResourceLocator) -> Result<FetchResult, FetchError> {
        let settings = &self.context.config().fetch;
        self.context
            .fetcher()
            .fetch(locator, settings.allow_rendering, settings.direct_timeout)
            .await
    }

    pub async fn fetch_by(&self, locator: &ResourceLocator, deadline: Instant) -> Result<FetchResult, FetchError> {
        let settings = &self.context.config().fetch;
        self.context
            .fetcher()
            .fetch_by(locator, settings.allow_rendering, settings.direct_timeout, deadline)
            .await
    }

    pub async fn match_faces(
        &self,
        first: &ResourceLocator,
        second: &ResourceLocator,
    ) -> Result<FaceMatchResult, AnalysisError> {
        let deadline = self.context.deadline_after(self.context.config().matcher.deadline);
        self.match_faces_by(first, second, deadline).await
    }

    pub async fn match_faces_by(
        &self,
        first: &ResourceLocator,
        second: &ResourceLocator,
        deadline: Instant,
    ) -> Result<FaceMatchResult, AnalysisError> {
        face_matcher::match_faces(&self.context, first, second, deadline).await
    }

    pub async fn extract_document(
        &self,
        locator: &ResourceLocator,
        schema: &ExtractionSchema,
    ) -> Result<ExtractionResult, AnalysisError> {
        let deadline = self.context.deadline_after(self.context.config().extractor.deadline);
        self.extract_document_by(locator, schema, deadline).await
    }

    pub async fn extract_document_by(
        &self,
        locator: &ResourceLocator,
        schema: &ExtractionSchema,
        deadline: Instant,
    ) -> Result<ExtractionResult, AnalysisError> {
        field_extractor::extract_fields(&self.context, locator, schema, deadline).await
    }

    /// Extracts a partnership K-1 with the built-in schema.
    pub async fn extract_k1(&self, locator: &ResourceLocator) -> Result<ExtractionResult, AnalysisError> {
        self.extract_document(locator, &self.k1_schema).await
    }

    pub fn k1_schema(&self) -> &ExtractionSchema {
        &self.k1_schema
    }
}
