// Haar cascade face detection through OpenCV

use super::{Detector, DetectorKind, ScoreSimulator};
use crate::error::{EmotionDetectorError, Result};
use crate::models::{Detection, FaceBox, Frame};
use image::RgbImage;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::Path;
use tracing::error;

/// Face locator using OpenCV Haar Cascade
pub struct CascadeLocator {
    classifier: CascadeClassifier,
    min_face_size: i32,
}

impl CascadeLocator {
    /// Loads the Haar Cascade classifier
    pub fn new(cascade_path: &Path, min_face_size: u32) -> Result<Self> {
        let path = cascade_path.to_string_lossy();
        let classifier = CascadeClassifier::new(&path).map_err(|e| {
            error!("Failed to load Haar Cascade: {}", e);
            EmotionDetectorError::ModelLoad(format!("Haar Cascade load failed: {e}"))
        })?;

        if classifier.empty()? {
            return Err(EmotionDetectorError::ModelLoad(
                "Haar Cascade classifier is empty".to_string(),
            ));
        }

        Ok(Self {
            classifier,
            min_face_size: min_face_size as i32,
        })
    }

    /// Returns face regions found in the image
    pub fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        let mat = Mat::from_slice(image.as_raw()).map_err(|e| {
            EmotionDetectorError::FaceDetection(format!("Failed to create Mat: {e}"))
        })?;

        let mat = mat.reshape(3, image.height() as i32).map_err(|e| {
            EmotionDetectorError::FaceDetection(format!("Failed to reshape Mat: {e}"))
        })?;

        let mut gray = Mat::default();
        imgproc::cvt_color_def(&mat, &mut gray, imgproc::COLOR_RGB2GRAY).map_err(|e| {
            EmotionDetectorError::FaceDetection(format!("Failed to convert to grayscale: {e}"))
        })?;

        let mut faces = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut faces,
                1.1, // scale factor
                5,   // min neighbors
                0,   // flags
                Size::new(self.min_face_size, self.min_face_size),
                Size::new(0, 0), // no max size
            )
            .map_err(|e| {
                EmotionDetectorError::FaceDetection(format!("Face detection failed: {e}"))
            })?;

        Ok(faces
            .iter()
            .map(|r| FaceBox::new(r.x, r.y, r.width.max(0) as u32, r.height.max(0) as u32))
            .collect())
    }
}

/// Cascade faces with simulated scores, for when no classifier model loads
pub struct CascadeDetector {
    locator: CascadeLocator,
    scores: ScoreSimulator,
}

impl CascadeDetector {
    pub fn new(cascade_path: &Path, min_face_size: u32) -> Result<Self> {
        Ok(Self {
            locator: CascadeLocator::new(cascade_path, min_face_size)?,
            scores: ScoreSimulator::new(),
        })
    }
}

impl Detector for CascadeDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Cascade
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let faces = self.locator.locate(&frame.image)?;
        Ok(faces
            .into_iter()
            .map(|face| Detection::new(face, self.scores.next_scores()))
            .collect())
    }
}
