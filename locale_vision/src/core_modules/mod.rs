pub mod face_isolation;
pub mod face_matcher;
pub mod fetcher;
pub mod field_extractor;
pub mod models;
pub mod render_pool;
pub mod resource;
pub mod schema;
pub mod similarity;

#[cfg(feature = "onnx")]
pub mod onnx_embedder;
