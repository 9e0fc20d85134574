// Stand-in detectors used when no real classifier is available

use super::{Detector, DetectorKind};
use crate::error::Result;
use crate::models::{Detection, EmotionScores, EmotionState, FaceBox, Frame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Dominant-emotion draw, weighted towards happy, sad, angry and neutral
const DOMINANT_POOL: [EmotionState; 12] = [
    EmotionState::Angry,
    EmotionState::Angry,
    EmotionState::Disgust,
    EmotionState::Fear,
    EmotionState::Happy,
    EmotionState::Happy,
    EmotionState::Happy,
    EmotionState::Sad,
    EmotionState::Sad,
    EmotionState::Surprise,
    EmotionState::Neutral,
    EmotionState::Neutral,
];

/// Generates plausible-looking random emotion distributions
#[derive(Debug)]
pub struct ScoreSimulator {
    rng: StdRng,
}

impl ScoreSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Small base weights everywhere, one emotion boosted, then normalized
    pub fn next_scores(&mut self) -> EmotionScores {
        let mut weights = [0.0f32; 7];
        for weight in weights.iter_mut() {
            *weight = self.rng.random_range(0.05..0.15);
        }
        let dominant = DOMINANT_POOL[self.rng.random_range(0..DOMINANT_POOL.len())];
        weights[dominant.index()] = self.rng.random_range(0.4..0.7);
        EmotionScores::from_weights(weights)
    }
}

impl Default for ScoreSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports one centered face per frame with random scores
#[derive(Debug, Default)]
pub struct SimulatedDetector {
    scores: ScoreSimulator,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self {
            scores: ScoreSimulator::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            scores: ScoreSimulator::with_seed(seed),
        }
    }
}

impl Detector for SimulatedDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Simulated
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let side = (width.min(height) / 2).max(1);
        let face = FaceBox::new(
            ((width - side) / 2) as i32,
            ((height - side) / 2) as i32,
            side,
            side,
        );
        Ok(vec![Detection::new(face, self.scores.next_scores())])
    }
}

/// Never finds a face
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Null
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
