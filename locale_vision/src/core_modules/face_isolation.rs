// THEORY:
// A biometric comparison is only meaningful when each image contributes exactly
// one face. The detector is allowed to be noisy; this module turns its raw
// candidate list into either a single subject or a refusal.
//
// 1.  **Filtering**: candidates the detector itself scores below
//     `min_detection_score` are discarded before anything else.
// 2.  **Prominence**: with one survivor, it is the subject. With several, the
//     largest wins only if its area is at least `prominence_ratio` times the
//     runner-up's (a passport photo with a tiny face in the background). Two faces
//     of similar size are ambiguous and the image is refused.
// 3.  **Cropping**: the subject box is widened by a pixel margin, clamped to the
//     image, and resized to the embedder's square input.

use crate::core_modules::models::FaceRegion;
use crate::error::{DetectionFailure, ModelError};
use image::imageops::{self, FilterType};
use image::RgbImage;

pub mod face_isolation {
    use super::*;

    /// Picks the one prominent face among `candidates`, or explains why there is none.
    pub fn isolate_single_face(
        candidates: &[FaceRegion],
        min_score: f32,
        prominence_ratio: f32,
    ) -> Result<FaceRegion, DetectionFailure> {
        // --- 1. Filtering ---
        let mut confident: Vec<FaceRegion> = candidates
            .iter()
            .copied()
            .filter(|c| c.score >= min_score && c.area() > 0)
            .collect();

        // --- 2. Prominence ---
        confident.sort_by(|a, b| b.area().cmp(&a.area()));
        match confident.as_slice() {
            [] => Err(DetectionFailure::NoFace),
            [only] => Ok(*only),
            [largest, runner_up, ..] => {
                if largest.area() as f64 >= runner_up.area() as f64 * prominence_ratio as f64 {
                    Ok(*largest)
                } else {
                    Err(DetectionFailure::AmbiguousMultiFace {
                        candidates: confident.len(),
                    })
                }
            }
        }
    }

    /// Crops `region` (plus `margin` pixels per side) out of `image` and resizes it
    /// to a `size` x `size` square.
    pub fn crop_face(image: &RgbImage, region: &FaceRegion, margin: u32, size: u32) -> Result<RgbImage, ModelError> {
        let (width, height) = image.dimensions();
        let left = region.x.saturating_sub(margin).min(width);
        let top = region.y.saturating_sub(margin).min(height);
        let right = region
            .x
            .saturating_add(region.width)
            .saturating_add(margin)
            .min(width);
        let bottom = region
            .y
            .saturating_add(region.height)
            .saturating_add(margin)
            .min(height);

        if right <= left || bottom <= top {
            return Err(ModelError::InvalidInput(format!(
                "face box {:?} lies outside the {}x{} image",
                region, width, height
            )));
        }
        if size == 0 {
            return Err(ModelError::InvalidInput("embedder input size is zero".to_string()));
        }

        let face = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
        Ok(imageops::resize(&face, size, size, FilterType::Triangle))
    }
}
