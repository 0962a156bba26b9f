// THEORY:
// Every failure in the engine is caught where it happens and turned into one of
// the tagged values below. Nothing is coerced into a success: there is no
// fabricated confidence, no empty embedding, no "best effort" face. The caller
// (the request-routing layer) receives either a result or one of these errors,
// and can serialize the error into an `ErrorReport` of the shape
// `{status: "error", kind, message}`.
//
// The taxonomy mirrors the pipeline stages:
// - `FetchError`         retrieval failed (network, timeout, status, render).
// - `Decode`             the payload is not an image we can read.
// - `Detection`          zero faces, or several faces with no clear subject.
// - `ModelInference`     an opaque model failed or produced unusable output.
// - `DeadlineExceeded`   the call's deadline elapsed after retrieval finished.
//
// An unmatched extraction field is NOT an error and has no variant here; it is a
// `FieldValue::Absent` inside a successful `ExtractionResult`.

use crate::core_modules::resource::ResourceLocator;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The reason a single retrieval attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchCause {
    Network,
    Timeout,
    NonSuccessStatus,
    RenderFailure,
}

impl fmt::Display for FetchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchCause::Network => "network",
            FetchCause::Timeout => "timeout",
            FetchCause::NonSuccessStatus => "non-success-status",
            FetchCause::RenderFailure => "render-failure",
        };
        f.write_str(label)
    }
}

/// One failed retrieval attempt (direct or rendered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub cause: FetchCause,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(cause: FetchCause, detail: impl Into<String>) -> Self {
        Self {
            cause,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.cause, self.detail)
    }
}

/// A failed fetch. Aggregates the direct attempt and, when the rendering
/// fallback ran, its failure too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchError {
    pub locator: ResourceLocator,
    /// The direct retrieval failure. Always present: rendering never runs first.
    pub direct: FetchFailure,
    /// The rendering fallback failure, if the fallback was attempted.
    pub rendered: Option<FetchFailure>,
}

impl FetchError {
    pub fn direct_only(locator: ResourceLocator, direct: FetchFailure) -> Self {
        Self {
            locator,
            direct,
            rendered: None,
        }
    }

    /// The call's deadline elapsed before retrieval finished.
    pub fn deadline_elapsed(locator: ResourceLocator) -> Self {
        Self::direct_only(locator, FetchFailure::new(FetchCause::Timeout, "call deadline elapsed"))
    }

    /// The cause of the last attempt that ran.
    pub fn cause(&self) -> FetchCause {
        self.rendered.as_ref().map_or(self.direct.cause, |rendered| rendered.cause)
    }

    pub fn rendering_attempted(&self) -> bool {
        self.rendered.is_some()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch of {} failed: direct {}", self.locator, self.direct)?;
        if let Some(rendered) = &self.rendered {
            write!(f, "; rendered {}", rendered)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

/// Errors raised by a rendering engine or the render pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("rendering engine unavailable: {0}")]
    Unavailable(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("network never became quiet: {0}")]
    Quiescence(String),
    #[error("content capture failed: {0}")]
    Capture(String),
    #[error("rendering timed out after {0:?}")]
    TimedOut(Duration),
    #[error("render pool is closed")]
    PoolClosed,
}

impl From<RenderError> for FetchFailure {
    fn from(error: RenderError) -> Self {
        let cause = match error {
            RenderError::TimedOut(_) => FetchCause::Timeout,
            _ => FetchCause::RenderFailure,
        };
        FetchFailure::new(cause, error.to_string())
    }
}

/// Errors raised by an opaque model backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model could not be loaded: {0}")]
    Load(String),
    #[error("model rejected its input: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced unusable output: {0}")]
    DegenerateOutput(String),
    #[error("inference worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// The pipeline stage a failure or timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Fetch,
    Decode,
    Detection,
    Embedding,
    Similarity,
    Ocr,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Detection => "detection",
            Stage::Embedding => "embedding",
            Stage::Similarity => "similarity",
            Stage::Ocr => "ocr",
        };
        f.write_str(label)
    }
}

/// Why the face-isolation policy refused an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum DetectionFailure {
    NoFace,
    AmbiguousMultiFace { candidates: usize },
}

impl fmt::Display for DetectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionFailure::NoFace => f.write_str("no face found"),
            DetectionFailure::AmbiguousMultiFace { candidates } => {
                write!(f, "{} candidate faces and none is clearly the subject", candidates)
            }
        }
    }
}

/// Every way a match or extraction call can fail.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not decode an image from {locator}: {detail}")]
    Decode { locator: ResourceLocator, detail: String },
    #[error("face detection failed for {locator}: {failure}")]
    Detection {
        locator: ResourceLocator,
        failure: DetectionFailure,
    },
    #[error("{stage} inference failed: {source}")]
    ModelInference { stage: Stage, source: ModelError },
    #[error("deadline exceeded during {stage}")]
    DeadlineExceeded { stage: Stage },
}

impl AnalysisError {
    pub fn model(stage: Stage, source: ModelError) -> Self {
        AnalysisError::ModelInference { stage, source }
    }

    /// A stable tag that lets callers tell the failure families apart.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Fetch(_) => "fetch",
            AnalysisError::Decode { .. } => "decode",
            AnalysisError::Detection { .. } => "detection",
            AnalysisError::ModelInference { .. } => "model-inference",
            AnalysisError::DeadlineExceeded { .. } => "deadline-exceeded",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}

/// The serialized error shape handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub status: &'static str,
    pub kind: &'static str,
    pub message: String,
}

impl ErrorReport {
    fn new(kind: &'static str, message: String) -> Self {
        Self {
            status: "error",
            kind,
            message,
        }
    }
}

impl From<&FetchError> for ErrorReport {
    fn from(error: &FetchError) -> Self {
        ErrorReport::new("fetch", error.to_string())
    }
}

/// A schema pattern that does not compile.
#[derive(Debug, Error)]
#[error("pattern for field `{field}` is invalid: {source}")]
pub struct SchemaError {
    pub field: String,
    pub source: regex::Error,
}

/// Configuration values that could not be parsed or are out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("HTTP client could not be built: {0}")]
    HttpClient(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
