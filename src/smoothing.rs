// Rolling label history used to stabilize the displayed emotion

use crate::models::EmotionState;
use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent per-frame labels
#[derive(Debug, Clone)]
pub struct EmotionHistory {
    labels: VecDeque<EmotionState>,
    capacity: usize,
}

impl EmotionHistory {
    /// Creates an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a raw label, evicting the oldest when full, and returns the
    /// smoothed label.
    pub fn push(&mut self, label: EmotionState) -> EmotionState {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
        self.smoothed().unwrap_or(label)
    }

    /// Majority label of the window. Ties go to the label that appears first
    /// in the window.
    pub fn smoothed(&self) -> Option<EmotionState> {
        let mut counts = [0usize; 7];
        for label in &self.labels {
            counts[label.index()] += 1;
        }

        let mut best: Option<(EmotionState, usize)> = None;
        for label in &self.labels {
            let count = counts[label.index()];
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((*label, count)),
            }
        }
        best.map(|(label, _)| label)
    }

    /// Forgets all labels, used when the face leaves the frame
    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use EmotionState::*;

    #[test]
    fn majority_wins_over_latest() {
        let mut history = EmotionHistory::new(5);
        history.push(Happy);
        history.push(Happy);
        assert_eq!(history.push(Sad), Happy);
    }

    #[test]
    fn tie_goes_to_first_seen() {
        let mut history = EmotionHistory::new(4);
        history.push(Sad);
        history.push(Happy);
        history.push(Happy);
        assert_eq!(history.push(Sad), Sad);
    }

    #[test]
    fn oldest_labels_are_evicted() {
        let mut history = EmotionHistory::new(3);
        for label in [Angry, Angry, Angry, Fear, Fear] {
            history.push(label);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.smoothed(), Some(Fear));
    }

    #[test]
    fn clear_empties_window() {
        let mut history = EmotionHistory::new(3);
        history.push(Neutral);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.smoothed(), None);
        assert_eq!(history.push(Surprise), Surprise);
    }

    fn naive_majority(window: &[EmotionState]) -> EmotionState {
        let mut best = window[0];
        let mut best_count = 0;
        for candidate in window {
            let count = window.iter().filter(|l| *l == candidate).count();
            if count > best_count {
                best = *candidate;
                best_count = count;
            }
        }
        best
    }

    proptest! {
        #[test]
        fn smoothed_label_is_majority_of_recent_window(
            capacity in 1usize..10,
            indices in prop::collection::vec(0usize..7, 1..60),
        ) {
            let labels: Vec<EmotionState> = indices.iter().map(|i| EmotionState::ALL[*i]).collect();
            let mut history = EmotionHistory::new(capacity);
            for (seen, label) in labels.iter().enumerate() {
                let smoothed = history.push(*label);
                let start = (seen + 1).saturating_sub(capacity);
                prop_assert_eq!(smoothed, naive_majority(&labels[start..=seen]));
                prop_assert!(history.len() <= capacity);
            }
        }
    }
}
