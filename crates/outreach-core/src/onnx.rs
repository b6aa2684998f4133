//! Face descriptor model via ONNX Runtime.
//!
//! Expects a combined detector + descriptor export: a single graph that
//! takes the whole image resized to 150x150 RGB, locates and crops the face
//! internally, and emits two outputs: `[0]` a face presence score and `[1]`
//! a 128-dimensional descriptor. A bare recognition net (descriptor only, no
//! detection stage) does not satisfy this contract; wrap it with a detector
//! before export.
//!
//! Input normalisation follows the face-api.js / dlib ResNet-34 recognition
//! net: per-channel mean subtraction, then division by 256.

use crate::embedder::{EmbedderError, FaceImage};
use crate::types::{Descriptor, EXPECTED_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const INPUT_SIZE: u32 = 150;
const CHANNEL_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const INPUT_SCALE: f32 = 256.0;
const SCORE_OUTPUT: usize = 0;
const DESCRIPTOR_OUTPUT: usize = 1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model must expose 2 outputs (score, descriptor), got {0}")]
    BadOutputs(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed face embedder.
///
/// Inference needs `&mut self`; wrap it in a dedicated thread to share it.
pub struct OnnxEmbedder {
    session: Session,
    min_face_score: f32,
}

impl OnnxEmbedder {
    /// Load the descriptor model from the given path.
    pub fn load(model_path: &Path, min_face_score: f32) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face descriptor model"
        );
        if outputs < 2 {
            return Err(ModelError::BadOutputs(outputs));
        }

        Ok(Self {
            session,
            min_face_score,
        })
    }

    /// Run the model on one image. `Ok(None)` means no face scored high enough.
    pub fn extract(&mut self, image: &FaceImage) -> Result<Option<Descriptor>, EmbedderError> {
        let input = preprocess(&image.rgb);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?])
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        let (_, score) = outputs[SCORE_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("score extraction: {e}")))?;
        let score = score.first().copied().unwrap_or(0.0);

        if score < self.min_face_score {
            tracing::debug!(score, min = self.min_face_score, "no face above score threshold");
            return Ok(None);
        }

        let (_, raw) = outputs[DESCRIPTOR_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != EXPECTED_DIM {
            tracing::warn!(got = raw.len(), "descriptor model output has unexpected size");
        }
        let descriptor = Descriptor::new(raw.to_vec())?;
        tracing::debug!(score, "face descriptor extracted");
        Ok(Some(descriptor))
    }
}

/// Resize to the model input and convert to a mean-subtracted NCHW tensor.
fn preprocess(rgb: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let resized = if rgb.dimensions() == (INPUT_SIZE, INPUT_SIZE) {
        rgb.clone()
    } else {
        imageops::resize(rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - CHANNEL_MEAN[c]) / INPUT_SCALE;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let rgb = RgbImage::from_pixel(40, 60, image::Rgb([10, 20, 30]));
        let tensor = preprocess(&rgb);
        assert_eq!(tensor.shape(), &[1, 3, 150, 150]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let rgb = RgbImage::from_pixel(150, 150, image::Rgb([200, 117, 0]));
        let tensor = preprocess(&rgb);
        let r = tensor[[0, 0, 10, 20]];
        let g = tensor[[0, 1, 10, 20]];
        let b = tensor[[0, 2, 10, 20]];
        assert!((r - (200.0 - 122.782) / 256.0).abs() < 1e-6, "got {r}");
        assert!((g - (117.0 - 117.001) / 256.0).abs() < 1e-6, "got {g}");
        assert!((b - (0.0 - 104.298) / 256.0).abs() < 1e-6, "got {b}");
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load(Path::new("/nonexistent/face_descriptor.onnx"), 0.5)
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
