// Emotion classification with ONNX Runtime

use super::{AnalysisReport, CascadeLocator, Detector, DetectorKind};
use crate::config::ModelFamily;
use crate::error::{EmotionDetectorError, Result};
use crate::models::{Detection, EmotionScores, FaceBox, Frame};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use tracing::{error, warn};

/// Input side of the expression model
const EXPRESSION_SIZE: u32 = 64;
/// Input side of the analysis model
const ANALYSIS_SIZE: u32 = 260;

/// Analysis model output order
const ANALYSIS_LABELS: [&str; 8] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral", "contempt",
];

/// Emotion classifier using ONNX Runtime
pub struct EmotionClassifier {
    session: Session,
    family: ModelFamily,
}

impl EmotionClassifier {
    /// Creates a new EmotionClassifier by loading the ONNX model
    pub fn new(model_path: &Path, family: ModelFamily) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| {
                EmotionDetectorError::ModelLoad(format!("Failed to create session builder: {e}"))
            })?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load ONNX model: {}", e);
                EmotionDetectorError::ModelLoad(format!("ONNX model load failed: {e}"))
            })?;

        Ok(Self { session, family })
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Classifies the face region of `image`
    pub fn classify(&mut self, image: &RgbImage, face: FaceBox) -> Result<Detection> {
        let region = face
            .clamp_to(image.width(), image.height())
            .ok_or_else(|| EmotionDetectorError::FrameProcessing("Face outside frame".into()))?;
        let crop = imageops::crop_imm(
            image,
            region.x as u32,
            region.y as u32,
            region.width,
            region.height,
        )
        .to_image();

        match self.family {
            ModelFamily::Expression => {
                let output = self.run(expression_input(&crop)?)?;
                let probabilities: [f32; 7] = output
                    .get(..7)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| {
                        EmotionDetectorError::OnnxRuntime(format!(
                            "Expected 7 outputs, got {}",
                            output.len()
                        ))
                    })?;
                Ok(Detection::new(region, EmotionScores::from_weights(probabilities)))
            }
            ModelFamily::DeepAnalysis => {
                let logits = self.run(analysis_input(&crop)?)?;
                if logits.len() < 7 {
                    warn!("Analysis model returned {} outputs", logits.len());
                }
                Ok(AnalysisReport::from_logits(region, &ANALYSIS_LABELS, &logits).into_detection())
            }
        }
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_tensor = Value::from_array(input).map_err(|e| {
            EmotionDetectorError::OnnxRuntime(format!("Failed to create input tensor: {e}"))
        })?;

        let inputs = ort::inputs![input_tensor];
        let outputs = self.session.run(inputs).map_err(|e| {
            error!("ONNX inference failed: {}", e);
            EmotionDetectorError::OnnxRuntime(format!("Inference failed: {e}"))
        })?;

        let (_, output_value) = outputs
            .iter()
            .next()
            .ok_or_else(|| EmotionDetectorError::OnnxRuntime("No output from model".to_string()))?;

        let tensor = output_value.try_extract_tensor::<f32>().map_err(|e| {
            EmotionDetectorError::OnnxRuntime(format!("Failed to extract output tensor: {e}"))
        })?;

        Ok(tensor.1.to_vec())
    }
}

/// 64x64 grayscale scaled to [-1, 1], shape [1, 1, 64, 64]
fn expression_input(face: &RgbImage) -> Result<Array4<f32>> {
    let gray = DynamicImage::ImageRgb8(face.clone()).into_luma8();
    let resized = imageops::resize(&gray, EXPRESSION_SIZE, EXPRESSION_SIZE, FilterType::Triangle);
    let data: Vec<f32> = resized
        .as_raw()
        .iter()
        .map(|&p| (p as f32 / 255.0 - 0.5) * 2.0)
        .collect();
    let side = EXPRESSION_SIZE as usize;
    Array4::from_shape_vec((1, 1, side, side), data)
        .map_err(|e| {
            EmotionDetectorError::OnnxRuntime(format!("Failed to create input array: {e}"))
        })
}

/// 260x260 RGB scaled to [0, 1], converted from HWC to CHW
fn analysis_input(face: &RgbImage) -> Result<Array4<f32>> {
    let resized = imageops::resize(face, ANALYSIS_SIZE, ANALYSIS_SIZE, FilterType::Triangle);
    let side = ANALYSIS_SIZE as usize;
    let channels = 3;

    let hwc = resized.as_raw();
    let mut chw_data = vec![0.0f32; channels * side * side];
    for h in 0..side {
        for w in 0..side {
            for c in 0..channels {
                let hwc_idx = (h * side + w) * channels + c;
                let chw_idx = c * (side * side) + h * side + w;
                chw_data[chw_idx] = hwc[hwc_idx] as f32 / 255.0;
            }
        }
    }

    Array4::from_shape_vec((1, channels, side, side), chw_data)
        .map_err(|e| {
            EmotionDetectorError::OnnxRuntime(format!("Failed to create input array: {e}"))
        })
}

/// Cascade face regions classified by a CNN
pub struct OnnxEmotionDetector {
    locator: CascadeLocator,
    classifier: EmotionClassifier,
}

impl OnnxEmotionDetector {
    pub fn new(
        cascade_path: &Path,
        model_path: &Path,
        family: ModelFamily,
        min_face_size: u32,
    ) -> Result<Self> {
        Ok(Self {
            locator: CascadeLocator::new(cascade_path, min_face_size)?,
            classifier: EmotionClassifier::new(model_path, family)?,
        })
    }
}

impl Detector for OnnxEmotionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Cnn(self.classifier.family())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let faces = self.locator.locate(&frame.image)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            match self.classifier.classify(&frame.image, face) {
                Ok(detection) => detections.push(detection),
                Err(e) => warn!("Failed to classify face: {}", e),
            }
        }
        Ok(detections)
    }
}
