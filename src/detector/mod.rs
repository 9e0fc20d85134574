// Face detection and emotion classification backends

mod report;
mod simulated;

#[cfg(feature = "opencv")]
mod cascade;
#[cfg(all(feature = "opencv", feature = "onnx"))]
mod onnx;

pub use report::AnalysisReport;
pub use simulated::{NullDetector, ScoreSimulator, SimulatedDetector};

#[cfg(feature = "opencv")]
pub use cascade::{CascadeDetector, CascadeLocator};
#[cfg(all(feature = "opencv", feature = "onnx"))]
pub use onnx::{EmotionClassifier, OnnxEmotionDetector};

use crate::config::{AppConfig, ModelFamily};
use crate::error::Result;
use crate::models::{Detection, Frame};
use std::panic::{self, AssertUnwindSafe};
use tracing::{info, warn};

/// Which kind of backend produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Cascade face regions classified by a CNN
    Cnn(ModelFamily),
    /// Cascade face regions with simulated scores
    Cascade,
    /// Centered face with simulated scores
    Simulated,
    /// Never detects anything
    Null,
}

impl DetectorKind {
    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Cnn(ModelFamily::Expression) => "CNN (expression)",
            DetectorKind::Cnn(ModelFamily::DeepAnalysis) => "CNN (analysis)",
            DetectorKind::Cascade => "Cascade + simulated scores",
            DetectorKind::Simulated => "Simulated",
            DetectorKind::Null => "None",
        }
    }

    /// Whether the emotion scores are random rather than classified
    pub fn simulated_scores(self) -> bool {
        matches!(self, DetectorKind::Cascade | DetectorKind::Simulated)
    }
}

/// A face detector and emotion classifier
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    /// Returns every face found in the frame, in detector order
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Runs `detector`, turning both errors and panics into "no faces"
pub fn detect_guarded(detector: &mut dyn Detector, frame: &Frame) -> Vec<Detection> {
    match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame))) {
        Ok(Ok(detections)) => detections,
        Ok(Err(e)) => {
            warn!("Detection failed, skipping frame: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("Detector panicked, skipping frame");
            Vec::new()
        }
    }
}

/// Observable record of the negotiated backend
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub kind: DetectorKind,
    /// Reasons better backends were not used
    pub notes: Vec<String>,
}

impl Capability {
    pub fn simulated_scores(&self) -> bool {
        self.kind.simulated_scores()
    }

    /// One line for the status panel
    pub fn summary(&self) -> String {
        if self.simulated_scores() {
            format!("{} (emotions are simulated)", self.kind.name())
        } else {
            self.kind.name().to_string()
        }
    }
}

/// The chosen backend and its capability record
pub struct NegotiatedDetector {
    pub detector: Box<dyn Detector>,
    pub capability: Capability,
}

/// Builds the best available detector for `config`.
///
/// Order: CNN of the requested family, then the other family, then cascade
/// with simulated scores, then the simulated detector. When simulation is
/// disabled the last resort is the null detector.
pub fn negotiate(config: &AppConfig) -> NegotiatedDetector {
    let mut notes = Vec::new();

    if let Some(detector) = try_cnn(config, &mut notes) {
        return finish(detector, notes);
    }

    if config.detector.allow_simulated {
        if let Some(detector) = try_cascade(config, &mut notes) {
            return finish(detector, notes);
        }
        return finish(Box::new(SimulatedDetector::new()), notes);
    }

    notes.push("Simulated scores disabled".to_string());
    finish(Box::new(NullDetector), notes)
}

fn finish(detector: Box<dyn Detector>, notes: Vec<String>) -> NegotiatedDetector {
    let capability = Capability {
        kind: detector.kind(),
        notes,
    };
    for note in &capability.notes {
        warn!("Detector fallback: {}", note);
    }
    info!("Using detector: {}", capability.summary());
    NegotiatedDetector {
        detector,
        capability,
    }
}

#[cfg(all(feature = "opencv", feature = "onnx"))]
fn try_cnn(config: &AppConfig, notes: &mut Vec<String>) -> Option<Box<dyn Detector>> {
    let Some(cascade) = config.cascade_file() else {
        notes.push("No cascade file for face regions".to_string());
        return None;
    };

    let requested = config.detector.family;
    let other = match requested {
        ModelFamily::Expression => ModelFamily::DeepAnalysis,
        ModelFamily::DeepAnalysis => ModelFamily::Expression,
    };

    for family in [requested, other] {
        let model = config.emotion_model(family);
        if !model.is_file() {
            notes.push(format!("Model not found: {}", model.display()));
            continue;
        }
        match OnnxEmotionDetector::new(&cascade, &model, family, config.detector.min_face_size) {
            Ok(detector) => return Some(Box::new(detector)),
            Err(e) => notes.push(format!("{} model failed to load: {e}", family.name())),
        }
    }
    None
}

#[cfg(not(all(feature = "opencv", feature = "onnx")))]
fn try_cnn(_config: &AppConfig, notes: &mut Vec<String>) -> Option<Box<dyn Detector>> {
    notes.push("Built without CNN support (features `opencv` and `onnx`)".to_string());
    None
}

#[cfg(feature = "opencv")]
fn try_cascade(config: &AppConfig, notes: &mut Vec<String>) -> Option<Box<dyn Detector>> {
    let cascade = config.cascade_file()?;
    match CascadeDetector::new(&cascade, config.detector.min_face_size) {
        Ok(detector) => Some(Box::new(detector)),
        Err(e) => {
            notes.push(format!("Cascade failed to load: {e}"));
            None
        }
    }
}

#[cfg(not(feature = "opencv"))]
fn try_cascade(_config: &AppConfig, notes: &mut Vec<String>) -> Option<Box<dyn Detector>> {
    notes.push("Built without cascade support (feature `opencv`)".to_string());
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_simulated_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::with_data_dir(dir.path());
        let negotiated = negotiate(&config);
        assert_eq!(negotiated.capability.kind, DetectorKind::Simulated);
        assert!(negotiated.capability.simulated_scores());
        assert!(!negotiated.capability.notes.is_empty());
        assert!(negotiated.capability.summary().contains("simulated"));
    }

    #[test]
    fn null_detector_when_simulation_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path());
        config.detector.allow_simulated = false;
        let mut negotiated = negotiate(&config);
        assert_eq!(negotiated.capability.kind, DetectorKind::Null);
        assert!(!negotiated.capability.simulated_scores());

        let frame = Frame::new(image::RgbImage::new(8, 8));
        assert!(negotiated.detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn guarded_detection_absorbs_failures() {
        use crate::models::EmotionState;
        use crate::pipeline::test_support::{Scripted, ScriptedDetector};

        let mut detector = ScriptedDetector::new(vec![
            Scripted::Panic,
            Scripted::Fail,
            Scripted::Face(EmotionState::Happy),
        ]);
        let frame = Frame::new(image::RgbImage::new(8, 8));
        assert!(detect_guarded(&mut detector, &frame).is_empty());
        assert!(detect_guarded(&mut detector, &frame).is_empty());
        assert_eq!(detect_guarded(&mut detector, &frame).len(), 1);
    }
}
