// Per-frame processing: preprocess, detect, smooth, identify, render

use crate::detector::{detect_guarded, Capability, Detector};
use crate::identity::{IdentityMatcher, UNKNOWN_USER};
use crate::models::{Detection, EmotionResult, Frame};
use crate::preprocess;
use crate::render::Renderer;
use crate::smoothing::EmotionHistory;
use image::{RgbImage, RgbaImage};
use tracing::debug;

/// Everything produced from one frame
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Frame with boxes and captions drawn
    pub annotated: RgbImage,
    /// Emoji and bar chart panel
    pub panel: RgbaImage,
    pub face_count: usize,
    /// Raw detection of the first face
    pub detection: Option<Detection>,
    /// Smoothed emotion with the current frame's confidence for it
    pub emotion: Option<EmotionResult>,
    /// Set on the frame where the user was first recognized
    pub recognized: Option<String>,
}

/// Stateful frame processor owned by at most one session at a time
pub struct FramePipeline {
    detector: Box<dyn Detector>,
    capability: Capability,
    history: EmotionHistory,
    identity: Option<IdentityMatcher>,
    renderer: Renderer,
}

impl FramePipeline {
    pub fn new(
        detector: Box<dyn Detector>,
        capability: Capability,
        history: EmotionHistory,
        renderer: Renderer,
    ) -> Self {
        Self {
            detector,
            capability,
            history,
            identity: None,
            renderer,
        }
    }

    pub fn with_identity(mut self, identity: IdentityMatcher) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn detector_mut(&mut self) -> &mut dyn Detector {
        self.detector.as_mut()
    }

    pub fn identity_mut(&mut self) -> Option<&mut IdentityMatcher> {
        self.identity.as_mut()
    }

    /// Split borrow for enrolling a new user with the active detector
    pub fn identity_and_detector(&mut self) -> (Option<&mut IdentityMatcher>, &mut dyn Detector) {
        (self.identity.as_mut(), self.detector.as_mut())
    }

    pub fn current_user(&self) -> &str {
        self.identity
            .as_ref()
            .map(IdentityMatcher::current_user)
            .unwrap_or(UNKNOWN_USER)
    }

    /// Clears per-session state before a new session starts
    pub fn reset_session(&mut self) {
        self.history.clear();
        if let Some(identity) = self.identity.as_mut() {
            identity.reset();
        }
    }

    /// Processes one frame. Never fails: a broken detector means no faces.
    pub fn process(&mut self, frame: Frame, equalize: bool) -> FrameOutput {
        let frame = if equalize {
            Frame {
                image: preprocess::equalize(&frame.image),
                captured_at: frame.captured_at,
            }
        } else {
            frame
        };

        let detections = detect_guarded(self.detector.as_mut(), &frame);
        let face_count = detections.len();
        let detection = detections.into_iter().next();

        let emotion = match &detection {
            Some(detection) => {
                let (raw, _) = detection.dominant();
                let smoothed = self.history.push(raw);
                Some(EmotionResult::new(smoothed, detection.scores.get(smoothed)))
            }
            None => {
                if !self.history.is_empty() {
                    debug!("Face lost, clearing emotion history");
                }
                self.history.clear();
                None
            }
        };

        let recognized = match self.identity.as_mut() {
            Some(identity) => identity.observe(&frame, detection.as_ref().map(|d| d.face)),
            None => None,
        };

        let mut annotated = frame.image;
        if let (Some(detection), Some(result)) = (&detection, &emotion) {
            self.renderer.annotate(&mut annotated, detection, result);
        }
        if self.identity.is_some() {
            let user = self.current_user().to_string();
            self.renderer.draw_user(&mut annotated, &user);
        }

        let panel = self
            .renderer
            .side_panel(emotion.as_ref(), detection.as_ref().map(|d| &d.scores));

        FrameOutput {
            annotated,
            panel,
            face_count,
            detection,
            emotion,
            recognized,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::detector::DetectorKind;
    use crate::error::{EmotionDetectorError, Result};
    use crate::image_manager::ImageManager;
    use crate::models::{EmotionScores, EmotionState, FaceBox};
    use std::collections::VecDeque;

    /// Plays back a fixed script of per-frame outcomes, then repeats the last
    pub enum Scripted {
        Face(EmotionState),
        NoFace,
        Fail,
        Panic,
    }

    pub struct ScriptedDetector {
        script: VecDeque<Scripted>,
    }

    impl ScriptedDetector {
        pub fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Simulated
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            let step = if self.script.len() > 1 {
                self.script.pop_front()
            } else {
                self.script.front().map(|s| match s {
                    Scripted::Face(e) => Scripted::Face(*e),
                    Scripted::NoFace => Scripted::NoFace,
                    Scripted::Fail => Scripted::Fail,
                    Scripted::Panic => Scripted::Panic,
                })
            };
            let width = frame.width().saturating_sub(2).max(1);
            let height = frame.height().saturating_sub(2).max(1);
            match step.unwrap_or(Scripted::NoFace) {
                Scripted::Face(emotion) => Ok(vec![Detection::new(
                    FaceBox::new(1, 1, width, height),
                    EmotionScores::certain(emotion),
                )]),
                Scripted::NoFace => Ok(Vec::new()),
                Scripted::Fail => Err(EmotionDetectorError::FaceDetection("scripted".into())),
                Scripted::Panic => panic!("scripted detector panic"),
            }
        }
    }

    pub fn pipeline(detector: impl Detector + 'static, window: usize) -> FramePipeline {
        let detector: Box<dyn Detector> = Box::new(detector);
        let capability = Capability {
            kind: detector.kind(),
            notes: Vec::new(),
        };
        FramePipeline::new(
            detector,
            capability,
            EmotionHistory::new(window),
            Renderer::new(ImageManager::new("/nowhere"), None),
        )
    }
}
