// A `FaceEmbedder` backed by an ONNX export of a FaceNet-style model.
//
// The session expects one NCHW float tensor of shape [1, 3, size, size] with
// pixels standardized as (p - 127.5) / 128, and returns one embedding row.

use crate::config::ModelConfig;
use crate::core_modules::models::FaceEmbedder;
use crate::error::ModelError;
use image::RgbImage;
use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::sync::Mutex;
use tracing::info;

pub struct OnnxFaceEmbedder {
    session: Mutex<Session>,
    input_size: u32,
}

impl OnnxFaceEmbedder {
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let path = config
            .embedder_path
            .as_ref()
            .ok_or_else(|| ModelError::Load("no embedder model path configured".to_string()))?;

        let builder = Session::builder()
            .map_err(|e| ModelError::Load(format!("failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::Load(format!("failed to set optimization level: {e}")))?;
        let builder = if config.use_accelerator {
            builder.with_execution_providers([CUDAExecutionProvider::default().build()])
        } else {
            builder.with_execution_providers([CPUExecutionProvider::default().build()])
        }
        .map_err(|e| ModelError::Load(format!("failed to register execution provider: {e}")))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| ModelError::Load(format!("failed to load {}: {e}", path.display())))?;

        info!(path = %path.display(), accelerator = config.use_accelerator, "face embedder loaded");
        Ok(Self {
            session: Mutex::new(session),
            input_size: config.embedder_input_size,
        })
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed(&self, face: &RgbImage) -> Result<Vec<f32>, ModelError> {
        let size = self.input_size as usize;
        if face.width() as usize != size || face.height() as usize != size {
            return Err(ModelError::InvalidInput(format!(
                "expected a {size}x{size} crop, got {}x{}",
                face.width(),
                face.height()
            )));
        }

        let pixels = Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            (face.get_pixel(x as u32, y as u32).0[channel] as f32 - 127.5) / 128.0
        });
        let input = Tensor::from_array(pixels).map_err(|e| ModelError::InvalidInput(format!("tensor error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Inference(format!("failed to lock session: {e}")))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ModelError::Inference(format!("embedding inference failed: {e}")))?;

        let (_, embedding) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::DegenerateOutput(format!("failed to extract embedding: {e}")))?;
        if embedding.is_empty() {
            return Err(ModelError::DegenerateOutput("empty embedding".to_string()));
        }
        Ok(embedding.to_vec())
    }
}
