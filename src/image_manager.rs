// Image manager module for emotion emojis

use crate::error::{EmotionDetectorError, Result};
use crate::models::EmotionState;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Loads an RGBA image from a file path
pub fn load_rgba<P: AsRef<Path>>(path: P) -> Result<RgbaImage> {
    let img = image::open(path.as_ref()).map_err(|e| {
        EmotionDetectorError::ImageLoad(format!(
            "Failed to load image from {:?}: {}",
            path.as_ref(),
            e
        ))
    })?;
    Ok(img.to_rgba8())
}

/// Emoji images keyed by emotion, loaded from `img/<label>.png`
pub struct ImageManager {
    base_dir: PathBuf,
    images: HashMap<EmotionState, RgbaImage>,
}

impl ImageManager {
    /// Creates an empty manager over `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            images: HashMap::new(),
        }
    }

    /// Loads every emoji that exists. Missing or broken files are logged and
    /// skipped; the panel then shows no emoji for that emotion.
    pub fn load_emojis(&mut self) -> usize {
        self.images.clear();
        for emotion in EmotionState::ALL {
            let path = self.base_dir.join(format!("{}.png", emotion.label()));
            if !path.exists() {
                warn!("Emoji missing: {}", path.display());
                continue;
            }
            match load_rgba(&path) {
                Ok(img) => {
                    self.images.insert(emotion, img);
                }
                Err(e) => warn!("{}", e),
            }
        }
        info!("Loaded {} emoji images", self.images.len());
        self.images.len()
    }

    /// Gets the emoji for a specific emotion, if loaded
    pub fn get_image_for_emotion(&self, emotion: EmotionState) -> Option<&RgbaImage> {
        self.images.get(&emotion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn loads_present_emojis_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 200, 0, 255]))
            .save(dir.path().join("happy.png"))
            .unwrap();
        std::fs::write(dir.path().join("sad.png"), b"corrupt").unwrap();

        let mut manager = ImageManager::new(dir.path());
        assert_eq!(manager.load_emojis(), 1);
        assert!(manager.get_image_for_emotion(EmotionState::Happy).is_some());
        assert!(manager.get_image_for_emotion(EmotionState::Sad).is_none());
        assert!(manager.get_image_for_emotion(EmotionState::Fear).is_none());
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let mut manager = ImageManager::new("/definitely/not/here");
        assert_eq!(manager.load_emojis(), 0);
    }
}
