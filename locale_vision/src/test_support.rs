// In-crate fakes for the network, the rendering engine and the opaque models.
// Images are uniform-colour PNGs; the fake detector reads the red channel to
// decide how many faces it "sees", and the fake embedder maps the crop colour to a
// fixed vector, so every scenario has a known cosine similarity.

use crate::config::AnalysisConfig;
use crate::context::AnalysisContext;
use crate::core_modules::fetcher::{DirectResponse, DirectRetrieval};
use crate::core_modules::models::{FaceDetector, FaceEmbedder, FaceRegion, ModelSet, OcrEngine, Transcription};
use crate::core_modules::render_pool::{RenderContext, RenderEngine};
use crate::core_modules::resource::ResourceLocator;
use crate::error::{FetchCause, FetchFailure, ModelError, RenderError};
use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- Direct retrieval ---

#[derive(Debug, Clone)]
pub enum DirectBehavior {
    Respond(u16, Vec<u8>),
    RespondAfter(Duration, u16, Vec<u8>),
    Fail(FetchCause),
    Hang,
}

pub struct FakeRetriever {
    routes: HashMap<String, DirectBehavior>,
    fallback: DirectBehavior,
    calls: AtomicUsize,
}

impl FakeRetriever {
    pub fn uniform(behavior: DirectBehavior) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn routes(routes: Vec<(&str, DirectBehavior)>) -> Self {
        Self {
            routes: routes.into_iter().map(|(locator, b)| (locator.to_string(), b)).collect(),
            fallback: DirectBehavior::Fail(FetchCause::Network),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectRetrieval for FakeRetriever {
    async fn retrieve(&self, locator: &ResourceLocator, _timeout: Duration) -> Result<DirectResponse, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.routes.get(locator.as_str()).unwrap_or(&self.fallback).clone();
        match behavior {
            DirectBehavior::Respond(status, body) => Ok(DirectResponse {
                status,
                body: Bytes::from(body),
            }),
            DirectBehavior::RespondAfter(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(DirectResponse {
                    status,
                    body: Bytes::from(body),
                })
            }
            DirectBehavior::Fail(cause) => Err(FetchFailure::new(cause, "simulated failure")),
            DirectBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchFailure::new(FetchCause::Timeout, "hung"))
            }
        }
    }
}

// --- Rendering ---

#[derive(Debug, Clone)]
pub enum RenderBehavior {
    Content(String),
    FailNavigation,
    Hang,
}

pub struct FakeRenderEngine {
    behavior: RenderBehavior,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    navigations: Arc<Mutex<Vec<String>>>,
}

impl FakeRenderEngine {
    pub fn new(behavior: RenderBehavior) -> Self {
        Self {
            behavior,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            navigations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().expect("navigation log").clone()
    }
}

#[async_trait]
impl RenderEngine for FakeRenderEngine {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRenderContext {
            behavior: self.behavior.clone(),
            closed: Arc::clone(&self.closed),
            navigations: Arc::clone(&self.navigations),
        }))
    }
}

struct FakeRenderContext {
    behavior: RenderBehavior,
    closed: Arc<AtomicUsize>,
    navigations: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RenderContext for FakeRenderContext {
    async fn navigate(&mut self, locator: &str) -> Result<(), RenderError> {
        self.navigations.lock().expect("navigation log").push(locator.to_string());
        match self.behavior {
            RenderBehavior::FailNavigation => Err(RenderError::Navigation("net::ERR_CONNECTION_REFUSED".into())),
            RenderBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            RenderBehavior::Content(_) => Ok(()),
        }
    }

    async fn wait_for_network_idle(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        match &self.behavior {
            RenderBehavior::Content(content) => Ok(content.clone()),
            _ => Err(RenderError::Capture("no document".into())),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Images ---

/// Red-channel codes understood by `FakeDetector`.
pub const NO_FACE: u8 = 0;
pub const ONE_FACE: u8 = 10;
pub const TWO_EQUAL_FACES: u8 = 20;
pub const ONE_DOMINANT_FACE: u8 = 30;
pub const ONE_WEAK_FACE: u8 = 40;

pub const IMAGE_EDGE: u32 = 64;

pub fn uniform_png(color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(IMAGE_EDGE, IMAGE_EDGE, Rgb(color));
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageFormat::Png).expect("png encodes");
    encoded.into_inner()
}

fn region(x: u32, y: u32, edge: u32, score: f32) -> FaceRegion {
    FaceRegion {
        x,
        y,
        width: edge,
        height: edge,
        score,
    }
}

// --- Models ---

#[derive(Default)]
pub struct FakeDetector {
    pub calls: AtomicUsize,
}

impl FaceDetector for FakeDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let code = image.get_pixel(0, 0).0[0];
        Ok(match code {
            ONE_FACE => vec![region(16, 16, 32, 0.99)],
            TWO_EQUAL_FACES => vec![region(0, 0, 20, 0.99), region(40, 40, 20, 0.98)],
            ONE_DOMINANT_FACE => vec![region(50, 50, 10, 0.95), region(8, 8, 40, 0.99)],
            ONE_WEAK_FACE => vec![region(16, 16, 32, 0.4)],
            _ => Vec::new(),
        })
    }
}

/// Maps the colour of a crop to a fixed embedding.
pub struct FakeEmbedder {
    vectors: Vec<([u8; 3], Vec<f32>)>,
}

impl FakeEmbedder {
    pub fn new(vectors: Vec<([u8; 3], Vec<f32>)>) -> Self {
        Self { vectors }
    }
}

impl FaceEmbedder for FakeEmbedder {
    fn input_size(&self) -> u32 {
        32
    }

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, ModelError> {
        if face.width() != self.input_size() || face.height() != self.input_size() {
            return Err(ModelError::InvalidInput(format!("{}x{} crop", face.width(), face.height())));
        }
        let pixel = face.get_pixel(face.width() / 2, face.height() / 2).0;
        let distance = |key: &[u8; 3]| -> u32 {
            key.iter()
                .zip(pixel.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
                .sum()
        };
        self.vectors
            .iter()
            .min_by_key(|(key, _)| distance(key))
            .filter(|(key, _)| distance(key) <= 3)
            .map(|(_, vector)| vector.clone())
            .ok_or_else(|| ModelError::InvalidInput(format!("unknown face colour {:?}", pixel)))
    }
}

pub struct FakeOcr {
    outcome: Result<Transcription, ModelError>,
}

impl FakeOcr {
    pub fn reading(segments: &[&str]) -> Self {
        Self {
            outcome: Ok(Transcription {
                segments: segments.iter().map(|s| s.to_string()).collect(),
                score: None,
            }),
        }
    }

    pub fn scored(segments: &[&str], score: f64) -> Self {
        Self {
            outcome: Ok(Transcription {
                segments: segments.iter().map(|s| s.to_string()).collect(),
                score: Some(score),
            }),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            outcome: Err(ModelError::Inference(detail.to_string())),
        }
    }
}

impl OcrEngine for FakeOcr {
    fn transcribe(&self, _image: &RgbImage) -> Result<Transcription, ModelError> {
        self.outcome.clone()
    }
}

pub fn models(embedder: FakeEmbedder, ocr: FakeOcr) -> ModelSet {
    ModelSet::new(Arc::new(FakeDetector::default()), Arc::new(embedder), Arc::new(ocr))
}

pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.inference_workers = 2;
    config.fetch.direct_timeout = Duration::from_millis(500);
    config.matcher.deadline = Duration::from_secs(5);
    config.extractor.deadline = Duration::from_secs(5);
    config
}

pub fn test_context(retriever: FakeRetriever, models: ModelSet) -> AnalysisContext {
    test_context_with(test_config(), retriever, models)
}

pub fn test_context_with(config: AnalysisConfig, retriever: FakeRetriever, models: ModelSet) -> AnalysisContext {
    AnalysisContext::with_retriever(config, models, Arc::new(retriever), None)
}
