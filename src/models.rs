// Core data models for the Emotion Detector application

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A single captured video frame
#[derive(Clone, Debug)]
pub struct Frame {
    /// RGB pixels
    pub image: RgbImage,
    /// When the frame was captured
    pub captured_at: Instant,
}

impl Frame {
    /// Creates a new Frame captured now
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// The fixed emotion vocabulary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionState {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionState {
    /// All labels in canonical classifier order
    pub const ALL: [EmotionState; 7] = [
        EmotionState::Angry,
        EmotionState::Disgust,
        EmotionState::Fear,
        EmotionState::Happy,
        EmotionState::Sad,
        EmotionState::Surprise,
        EmotionState::Neutral,
    ];

    /// Choices offered by the survey form
    pub const SURVEY_CHOICES: [EmotionState; 5] = [
        EmotionState::Happy,
        EmotionState::Sad,
        EmotionState::Angry,
        EmotionState::Surprise,
        EmotionState::Neutral,
    ];

    /// Position in canonical order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase label, also the emoji file stem
    pub fn label(self) -> &'static str {
        match self {
            EmotionState::Angry => "angry",
            EmotionState::Disgust => "disgust",
            EmotionState::Fear => "fear",
            EmotionState::Happy => "happy",
            EmotionState::Sad => "sad",
            EmotionState::Surprise => "surprise",
            EmotionState::Neutral => "neutral",
        }
    }

    /// Maps a label from any detector onto the vocabulary.
    ///
    /// Contempt has no slot of its own and folds into disgust.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "angry" | "anger" => Some(EmotionState::Angry),
            "disgust" | "disgusted" | "contempt" => Some(EmotionState::Disgust),
            "fear" | "scared" | "fearful" => Some(EmotionState::Fear),
            "happy" | "happiness" => Some(EmotionState::Happy),
            "sad" | "sadness" => Some(EmotionState::Sad),
            "surprise" | "surprised" => Some(EmotionState::Surprise),
            "neutral" => Some(EmotionState::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = self.label();
        let mut chars = label.chars();
        if let Some(first) = chars.next() {
            write!(f, "{}{}", first.to_ascii_uppercase(), chars.as_str())?;
        }
        Ok(())
    }
}

/// Confidence per emotion. Values lie in [0, 1] and sum to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionScores([f32; 7]);

impl EmotionScores {
    /// Normalizes raw non-negative weights in canonical order.
    ///
    /// Negative and non-finite weights count as zero. If nothing is left the
    /// result is fully neutral.
    pub fn from_weights(weights: [f32; 7]) -> Self {
        let cleaned = weights.map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
        let total: f32 = cleaned.iter().sum();
        if total <= f32::EPSILON || !total.is_finite() {
            return Self::certain(EmotionState::Neutral);
        }
        Self(cleaned.map(|w| w / total))
    }

    /// Softmax over raw logits in canonical order
    pub fn from_logits(logits: [f32; 7]) -> Self {
        let max_logit = logits
            .iter()
            .cloned()
            .filter(|x| x.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max_logit.is_finite() {
            return Self::certain(EmotionState::Neutral);
        }
        Self::from_weights(logits.map(|x| if x.is_finite() { (x - max_logit).exp() } else { 0.0 }))
    }

    /// Builds scores from (label, weight) pairs. Unknown labels are ignored and
    /// repeated labels accumulate.
    pub fn from_labeled<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut weights = [0.0f32; 7];
        for (label, weight) in pairs {
            if let Some(emotion) = EmotionState::from_label(label) {
                if weight.is_finite() && weight > 0.0 {
                    weights[emotion.index()] += weight;
                }
            }
        }
        Self::from_weights(weights)
    }

    /// All confidence on a single emotion
    pub fn certain(emotion: EmotionState) -> Self {
        let mut values = [0.0; 7];
        values[emotion.index()] = 1.0;
        Self(values)
    }

    pub fn get(&self, emotion: EmotionState) -> f32 {
        self.0[emotion.index()]
    }

    /// The highest scoring emotion. Ties go to the earlier label.
    pub fn dominant(&self) -> (EmotionState, f32) {
        let mut best = (EmotionState::ALL[0], self.0[0]);
        for emotion in EmotionState::ALL.into_iter().skip(1) {
            let score = self.0[emotion.index()];
            if score > best.1 {
                best = (emotion, score);
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionState, f32)> + '_ {
        EmotionState::ALL.into_iter().map(|e| (e, self.0[e.index()]))
    }

    pub fn as_array(&self) -> &[f32; 7] {
        &self.0
    }
}

/// Face region in frame pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects the box with a `width` x `height` image.
    ///
    /// Returns `None` when nothing of the box is inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceBox> {
        let left = i64::from(self.x).max(0);
        let top = i64::from(self.y).max(0);
        let right = (i64::from(self.x) + i64::from(self.width)).min(i64::from(width));
        let bottom = (i64::from(self.y) + i64::from(self.height)).min(i64::from(height));
        if right <= left || bottom <= top {
            return None;
        }
        Some(FaceBox::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    /// A box covering the whole image
    pub fn full(width: u32, height: u32) -> Self {
        FaceBox::new(0, 0, width, height)
    }
}

/// One detected face with its emotion distribution. Lives for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub face: FaceBox,
    pub scores: EmotionScores,
}

impl Detection {
    pub fn new(face: FaceBox, scores: EmotionScores) -> Self {
        Self { face, scores }
    }

    pub fn dominant(&self) -> (EmotionState, f32) {
        self.scores.dominant()
    }
}

/// Result of emotion detection after smoothing
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionResult {
    /// The displayed emotion state
    pub emotion: EmotionState,
    /// Confidence level (0.0 to 1.0)
    pub confidence: f32,
}

impl EmotionResult {
    /// Creates a new EmotionResult
    pub fn new(emotion: EmotionState, confidence: f32) -> Self {
        Self {
            emotion,
            confidence,
        }
    }

    /// Returns the confidence as a percentage (0-100)
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

impl std::fmt::Display for EmotionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}%)", self.emotion.label(), self.confidence_percent())
    }
}
