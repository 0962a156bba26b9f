// THEORY:
// The Document Field Extractor turns a scanned form behind a locator into named
// fields. It runs one fetch, one decode and one OCR pass, then hands the joined
// transcription to an `ExtractionSchema`.
//
// Success is defined by OCR, not by the schema: once the document has been
// transcribed the call succeeds, even if no field matched. Missing fields are
// `Absent` (or `Placeholder`) inside the result and never an error.
//
// Confidence comes from the OCR engine's own score when it exposes one. When it
// does not, the configured placeholder constant is reported instead and the
// result says so through `confidence_source`.

use crate::context::AnalysisContext;
use crate::core_modules::resource::ResourceLocator;
use crate::core_modules::schema::{ExtractedFields, ExtractionSchema};
use crate::error::{AnalysisError, ModelError, Stage};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Where an `ExtractionResult`'s confidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceSource {
    /// The OCR engine's own quality score.
    Model,
    /// The configured constant; no real quality signal was available.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub status: &'static str,
    pub confidence: f64,
    pub confidence_source: ConfidenceSource,
    pub fields: ExtractedFields,
    pub raw_text: String,
}

pub mod field_extractor {
    use super::*;

    /// Transcribes the document behind `locator` and applies `schema` to it.
    pub async fn extract_fields(
        ctx: &AnalysisContext,
        locator: &ResourceLocator,
        schema: &ExtractionSchema,
        deadline: Instant,
    ) -> Result<ExtractionResult, AnalysisError> {
        let settings = &ctx.config().extractor;

        // --- 1. Fetch ---
        let fetched = ctx
            .fetcher()
            .fetch_by(locator, settings.render_documents, ctx.config().fetch.direct_timeout, deadline)
            .await?;

        // --- 2. Decode ---
        let image = ctx.decode(&fetched, deadline).await?;

        // --- 3. OCR ---
        let ocr = Arc::clone(&ctx.models().ocr);
        let transcription = ctx
            .pool()
            .infer(Stage::Ocr, deadline, move || ocr.transcribe(&image))
            .await?;
        let raw_text = transcription.joined();
        debug!(%locator, segments = transcription.segments.len(), chars = raw_text.len(), "document transcribed");

        // --- 4. Schema ---
        let fields = schema.apply(&raw_text);
        let (confidence, confidence_source) = match transcription.score {
            Some(score) if score.is_finite() && (0.0..=1.0).contains(&score) => (score, ConfidenceSource::Model),
            Some(score) => {
                return Err(AnalysisError::model(
                    Stage::Ocr,
                    ModelError::DegenerateOutput(format!("OCR score {score} is outside [0, 1]")),
                ));
            }
            None => (settings.placeholder_confidence, ConfidenceSource::Placeholder),
        };
        let extracted = fields.iter().filter(|(_, value)| value.extracted().is_some()).count();
        info!(%locator, extracted, declared = fields.len(), ?confidence_source, "fields extracted");

        Ok(ExtractionResult {
            status: "success",
            confidence,
            confidence_source,
            fields,
            raw_text,
        })
    }
}
