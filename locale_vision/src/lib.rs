// THEORY:
// This file is the main entry point for the `locale_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (the request-routing layer that
// serves verification requests).
//
// The primary goal is to export the `VerificationPipeline` and its associated data
// structures (`AnalysisConfig`, `FaceMatchResult`, `ExtractionResult`, the error
// taxonomy) as the clean, high-level interface for the whole engine. The three
// working parts live in `core_modules`:
//
// 1.  **Resilient Fetcher**: cheap direct retrieval first, one bounded fallback to
//     a pooled rendering engine, never a loop.
// 2.  **Biometric Matcher**: two concurrent fetches, one face per image, embeddings,
//     cosine similarity against a fixed threshold.
// 3.  **Document Field Extractor**: one fetch, OCR, and an ordered pattern schema
//     applied to the transcription.
//
// Model handles, the HTTP client, the render pool and the inference worker pool
// are created once and carried by an immutable `AnalysisContext`.

pub mod config;
pub mod context;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{AnalysisConfig, ExtractorConfig, FetchConfig, MatcherConfig, ModelConfig};
pub use context::AnalysisContext;
pub use core_modules::face_matcher::{FaceMatchResult, MATCH_THRESHOLD};
pub use core_modules::fetcher::{DirectResponse, DirectRetrieval, FetchMethod, FetchResult, Fetcher, HttpRetriever};
pub use core_modules::field_extractor::{ConfidenceSource, ExtractionResult};
pub use core_modules::models::{FaceDetector, FaceEmbedder, FaceRegion, ModelSet, OcrEngine, Transcription};
pub use core_modules::render_pool::{RenderContext, RenderEngine, RenderPool};
pub use core_modules::resource::ResourceLocator;
pub use core_modules::schema::{ExtractedFields, ExtractionSchema, FieldValue, StubFieldPolicy};
pub use error::{
    AnalysisError, ConfigError, DetectionFailure, ErrorReport, FetchCause, FetchError, FetchFailure, ModelError,
    RenderError, SchemaError, Stage,
};
pub use pipeline::VerificationPipeline;

#[cfg(feature = "onnx")]
pub use core_modules::onnx_embedder::OnnxFaceEmbedder;
