// THEORY:
// The pretrained models are black boxes to this engine. We never look inside
// them; we only rely on them being deterministic pure functions from pixels to
// an output:
//
// - `FaceDetector`:  image -> candidate face boxes with a score each.
// - `FaceEmbedder`:  a square face crop -> a fixed-dimension vector.
// - `OcrEngine`:     image -> transcribed text segments (and, if the model
//                    exposes one, a quality score).
//
// The traits are synchronous on purpose. Inference is CPU or accelerator bound,
// so callers never run it on the async executor; the `InferencePool` moves every
// call onto a bounded set of blocking workers. Implementations must be
// `Send + Sync` because one loaded model is shared, read-only, by all calls.

use crate::error::ModelError;
use image::RgbImage;
use std::fmt;
use std::sync::Arc;

/// One candidate face box, in pixel coordinates of the analysed image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence for this candidate, in [0, 1].
    pub score: f32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Locates candidate faces in an image.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, ModelError>;
}

/// Maps a face crop to an embedding vector.
pub trait FaceEmbedder: Send + Sync {
    /// Edge length, in pixels, of the square crop the model expects.
    fn input_size(&self) -> u32;

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, ModelError>;
}

/// The output of an OCR pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcription {
    /// Decoded text, one entry per decoded sequence.
    pub segments: Vec<String>,
    /// The model's own quality signal, when it exposes one.
    pub score: Option<f64>,
}

impl Transcription {
    /// The segments joined with single spaces.
    pub fn joined(&self) -> String {
        self.segments.join(" ")
    }
}

/// Transcribes an image into text.
pub trait OcrEngine: Send + Sync {
    fn transcribe(&self, image: &RgbImage) -> Result<Transcription, ModelError>;
}

/// The loaded model handles, shared read-only across every call.
#[derive(Clone)]
pub struct ModelSet {
    pub detector: Arc<dyn FaceDetector>,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl ModelSet {
    pub fn new(detector: Arc<dyn FaceDetector>, embedder: Arc<dyn FaceEmbedder>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            detector,
            embedder,
            ocr,
        }
    }
}

impl fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSet")
            .field("embedder_input_size", &self.embedder.input_size())
            .finish_non_exhaustive()
    }
}
