// Face embedding backends

use crate::error::Result;
use crate::models::{FaceBox, Frame};

/// Computes a face embedding for a region of a frame
pub trait FaceEncoder: Send {
    /// `Ok(None)` when the region holds no usable face
    fn encode(&mut self, frame: &Frame, face: FaceBox) -> Result<Option<Vec<f32>>>;
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxFaceEncoder;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use crate::error::EmotionDetectorError;
    use image::imageops::{self, FilterType};
    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::Value;
    use std::path::Path;
    use tracing::error;

    const INPUT_SIZE: u32 = 112;
    /// Faces smaller than this carry too little detail to embed
    const MIN_FACE_SIDE: u32 = 20;

    /// ArcFace-style embedding model, 112x112 RGB input
    pub struct OnnxFaceEncoder {
        session: Session,
    }

    impl OnnxFaceEncoder {
        pub fn new(model_path: &Path) -> Result<Self> {
            let session = Session::builder()
                .map_err(|e| {
                    EmotionDetectorError::ModelLoad(format!(
                        "Failed to create session builder: {e}"
                    ))
                })?
                .commit_from_file(model_path)
                .map_err(|e| {
                    error!("Failed to load embedding model: {}", e);
                    EmotionDetectorError::ModelLoad(format!("Embedding model load failed: {e}"))
                })?;
            Ok(Self { session })
        }
    }

    impl FaceEncoder for OnnxFaceEncoder {
        fn encode(&mut self, frame: &Frame, face: FaceBox) -> Result<Option<Vec<f32>>> {
            let Some(region) = face.clamp_to(frame.width(), frame.height()) else {
                return Ok(None);
            };
            if region.width < MIN_FACE_SIDE || region.height < MIN_FACE_SIDE {
                return Ok(None);
            }

            let crop = imageops::crop_imm(
                &frame.image,
                region.x as u32,
                region.y as u32,
                region.width,
                region.height,
            )
            .to_image();
            let resized = imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

            let side = INPUT_SIZE as usize;
            let hwc = resized.as_raw();
            let mut chw = vec![0.0f32; 3 * side * side];
            for h in 0..side {
                for w in 0..side {
                    for c in 0..3 {
                        chw[c * side * side + h * side + w] =
                            (hwc[(h * side + w) * 3 + c] as f32 - 127.5) / 128.0;
                    }
                }
            }
            let input = Array4::from_shape_vec((1, 3, side, side), chw).map_err(|e| {
                EmotionDetectorError::FaceEncoding(format!("Failed to create input array: {e}"))
            })?;

            let input_tensor = Value::from_array(input)?;
            let outputs = self.session.run(ort::inputs![input_tensor])?;
            let (_, output_value) = outputs.iter().next().ok_or_else(|| {
                EmotionDetectorError::FaceEncoding("No output from model".to_string())
            })?;
            let tensor = output_value.try_extract_tensor::<f32>()?;

            let mut embedding = tensor.1.to_vec();
            let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm <= f32::EPSILON || !norm.is_finite() {
                return Ok(None);
            }
            for value in embedding.iter_mut() {
                *value /= norm;
            }
            Ok(Some(embedding))
        }
    }
}
