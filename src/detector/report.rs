// Per-face analysis report, the raw shape of the deep-analysis family

use crate::models::{Detection, EmotionScores, EmotionState, FaceBox};
use std::collections::BTreeMap;

/// Raw analysis output: percentages per label plus the dominant label.
///
/// Labels are the model's own and may fall outside the vocabulary (for
/// example `contempt`); conversion maps them onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub region: FaceBox,
    /// Label to percentage (0..=100)
    pub emotion: BTreeMap<String, f32>,
    pub dominant_emotion: String,
}

impl AnalysisReport {
    /// Builds a report from raw logits and the model's label order
    pub fn from_logits(region: FaceBox, labels: &[&str], logits: &[f32]) -> Self {
        let count = labels.len().min(logits.len());
        let max_logit = logits[..count]
            .iter()
            .cloned()
            .filter(|x| x.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);

        let exps: Vec<f32> = logits[..count]
            .iter()
            .map(|&x| {
                if x.is_finite() && max_logit.is_finite() {
                    (x - max_logit).exp()
                } else {
                    0.0
                }
            })
            .collect();
        let total: f32 = exps.iter().sum();

        let mut emotion = BTreeMap::new();
        let mut dominant = (EmotionState::Neutral.label().to_string(), f32::NEG_INFINITY);
        for (label, value) in labels.iter().zip(exps) {
            let percent = if total > 0.0 { value / total * 100.0 } else { 0.0 };
            if percent > dominant.1 {
                dominant = (label.to_string(), percent);
            }
            *emotion.entry(label.to_string()).or_insert(0.0) += percent;
        }

        Self {
            region,
            emotion,
            dominant_emotion: dominant.0,
        }
    }

    /// Maps the report onto the vocabulary and renormalizes to [0, 1]
    pub fn into_detection(self) -> Detection {
        let has_mass = self.emotion.values().any(|v| v.is_finite() && *v > 0.0);
        let scores = if has_mass {
            EmotionScores::from_labeled(self.emotion.iter().map(|(k, v)| (k.as_str(), *v)))
        } else {
            let dominant =
                EmotionState::from_label(&self.dominant_emotion).unwrap_or(EmotionState::Neutral);
            EmotionScores::certain(dominant)
        };
        Detection::new(self.region, scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [&str; 8] = [
        "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral", "contempt",
    ];

    #[test]
    fn percentages_become_probabilities() {
        let mut emotion = BTreeMap::new();
        emotion.insert("happy".to_string(), 72.0);
        emotion.insert("neutral".to_string(), 18.0);
        emotion.insert("sad".to_string(), 10.0);
        let report = AnalysisReport {
            region: FaceBox::new(10, 10, 50, 50),
            emotion,
            dominant_emotion: "happy".to_string(),
        };

        let detection = report.into_detection();
        assert_eq!(detection.face, FaceBox::new(10, 10, 50, 50));
        let (label, confidence) = detection.dominant();
        assert_eq!(label, EmotionState::Happy);
        assert!((confidence - 0.72).abs() < 1e-5);
    }

    #[test]
    fn logits_report_percentages_and_dominant() {
        let logits = [0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 1.0, 0.0];
        let report = AnalysisReport::from_logits(FaceBox::new(0, 0, 4, 4), &LABELS, &logits);
        assert_eq!(report.dominant_emotion, "happy");
        let total: f32 = report.emotion.values().sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn contempt_folds_into_disgust() {
        let logits = [0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0];
        let report = AnalysisReport::from_logits(FaceBox::new(0, 0, 4, 4), &LABELS, &logits);
        let detection = report.into_detection();
        assert_eq!(detection.dominant().0, EmotionState::Disgust);
        let sum: f32 = detection.scores.as_array().iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn empty_report_uses_dominant_label() {
        let report = AnalysisReport {
            region: FaceBox::new(0, 0, 1, 1),
            emotion: BTreeMap::new(),
            dominant_emotion: "surprise".to_string(),
        };
        assert_eq!(report.into_detection().dominant(), (EmotionState::Surprise, 1.0));
    }
}
