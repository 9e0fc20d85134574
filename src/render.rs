// Frame annotation and side panel composition. Captions need a TrueType font

use crate::image_manager::ImageManager;
use crate::models::{Detection, EmotionResult, EmotionScores, EmotionState};
use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

pub const PANEL_WIDTH: u32 = 150;
pub const PANEL_HEIGHT: u32 = 440;
const EMOJI_SIZE: u32 = 100;
const EMOJI_POS: (i64, i64) = (25, 150);
const CAPTION_POS: (i32, i32) = (30, 270);
const BARS_TOP: i32 = 306;
const BAR_STEP: i32 = 18;
const BAR_HEIGHT: u32 = 12;
const BAR_LEFT: i32 = 10;
const BAR_MAX_WIDTH: u32 = 130;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const USER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const PANEL_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BAR_TRACK: Rgba<u8> = Rgba([50, 50, 50, 255]);
const BAR_FILL: Rgba<u8> = Rgba([70, 130, 180, 255]);
const BAR_HIGHLIGHT: Rgba<u8> = Rgba([40, 167, 69, 255]);

/// Draws detections on frames and builds the emoji side panel
pub struct Renderer {
    font: Option<FontArc>,
    emojis: ImageManager,
}

impl Renderer {
    pub fn new(emojis: ImageManager, font: Option<FontArc>) -> Self {
        Self { font, emojis }
    }

    /// Loads emojis from `emoji_dir` and the caption font from `font_path`
    pub fn load(emoji_dir: &Path, font_path: &Path) -> Self {
        let mut emojis = ImageManager::new(emoji_dir);
        emojis.load_emojis();
        Self::new(emojis, load_font(font_path))
    }

    /// Draws the face box and the `label (NN%)` caption above it
    pub fn annotate(&self, image: &mut RgbImage, detection: &Detection, result: &EmotionResult) {
        let Some(face) = detection.face.clamp_to(image.width(), image.height()) else {
            return;
        };

        let outer = Rect::at(face.x, face.y).of_size(face.width.max(1), face.height.max(1));
        draw_hollow_rect_mut(image, outer, BOX_COLOR);
        if face.width > 2 && face.height > 2 {
            let inner = Rect::at(face.x + 1, face.y + 1).of_size(face.width - 2, face.height - 2);
            draw_hollow_rect_mut(image, inner, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let y = (face.y - 26).max(0);
            let caption = result.to_string();
            draw_text_mut(image, LABEL_COLOR, face.x, y, PxScale::from(22.0), font, &caption);
        }
    }

    /// Writes the recognized user name in the top-left corner
    pub fn draw_user(&self, image: &mut RgbImage, user: &str) {
        if let Some(font) = &self.font {
            let caption = format!("User: {user}");
            draw_text_mut(image, USER_COLOR, 10, 10, PxScale::from(20.0), font, &caption);
        }
    }

    /// Composes the fixed-size panel: emoji, caption and one bar per emotion
    pub fn side_panel(
        &self,
        result: Option<&EmotionResult>,
        scores: Option<&EmotionScores>,
    ) -> RgbaImage {
        let mut panel = RgbaImage::from_pixel(PANEL_WIDTH, PANEL_HEIGHT, PANEL_BACKGROUND);

        if let Some(result) = result {
            if let Some(emoji) = self.emojis.get_image_for_emotion(result.emotion) {
                let resized = imageops::resize(emoji, EMOJI_SIZE, EMOJI_SIZE, FilterType::Triangle);
                imageops::overlay(&mut panel, &resized, EMOJI_POS.0, EMOJI_POS.1);
            }
            if let Some(font) = &self.font {
                let scale = PxScale::from(16.0);
                let (x, y) = CAPTION_POS;
                let label = result.emotion.to_string();
                draw_text_mut(&mut panel, TEXT_COLOR, x, y, scale, font, &label);
                let percent = format!("{}%", result.confidence_percent());
                draw_text_mut(&mut panel, TEXT_COLOR, x, y + 16, scale, font, &percent);
            }
        }

        if let Some(scores) = scores {
            let highlighted = result.map(|r| r.emotion);
            for (row, (emotion, score)) in scores.iter().enumerate() {
                let highlight = highlighted == Some(emotion);
                self.draw_bar(&mut panel, row as i32, emotion, score, highlight);
            }
        }

        panel
    }

    fn draw_bar(
        &self,
        panel: &mut RgbaImage,
        row: i32,
        emotion: EmotionState,
        score: f32,
        highlight: bool,
    ) {
        let y = BARS_TOP + row * BAR_STEP;
        let track = Rect::at(BAR_LEFT, y).of_size(BAR_MAX_WIDTH, BAR_HEIGHT);
        draw_filled_rect_mut(panel, track, BAR_TRACK);

        let width = bar_width(score);
        if width > 0 {
            let color = if highlight { BAR_HIGHLIGHT } else { BAR_FILL };
            draw_filled_rect_mut(panel, Rect::at(BAR_LEFT, y).of_size(width, BAR_HEIGHT), color);
        }

        if let Some(font) = &self.font {
            let caption = format!("{} {:.0}%", &emotion.label()[..3], score * 100.0);
            draw_text_mut(panel, TEXT_COLOR, BAR_LEFT + 2, y, PxScale::from(11.0), font, &caption);
        }
    }
}

fn bar_width(score: f32) -> u32 {
    (score.clamp(0.0, 1.0) * BAR_MAX_WIDTH as f32).round() as u32
}

/// Reads a TrueType font, or `None` with a warning
pub fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Font {} unavailable, captions disabled: {}", path.display(), e);
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            info!("Loaded font {}", path.display());
            Some(font)
        }
        Err(e) => {
            warn!("Font {} is invalid, captions disabled: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FaceBox;

    fn renderer_with_emoji() -> Renderer {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("happy.png"))
            .unwrap();
        let mut emojis = ImageManager::new(dir.path());
        emojis.load_emojis();
        Renderer::new(emojis, None)
    }

    #[test]
    fn panel_has_fixed_size_and_emoji() {
        let renderer = renderer_with_emoji();
        let result = EmotionResult::new(EmotionState::Happy, 0.8);
        let scores = EmotionScores::certain(EmotionState::Happy);
        let panel = renderer.side_panel(Some(&result), Some(&scores));

        assert_eq!(panel.dimensions(), (PANEL_WIDTH, PANEL_HEIGHT));
        assert_eq!(panel.get_pixel(75, 200), &Rgba([255, 0, 0, 255]));
        assert_eq!(panel.get_pixel(5, 5), &PANEL_BACKGROUND);
    }

    #[test]
    fn bars_scale_with_scores() {
        let renderer = Renderer::new(ImageManager::new("/nowhere"), None);
        let scores = EmotionScores::from_weights([0.5, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0]);
        let result = EmotionResult::new(EmotionState::Happy, 0.5);
        let panel = renderer.side_panel(Some(&result), Some(&scores));

        let angry_y = (BARS_TOP + 1) as u32;
        let happy_y = (BARS_TOP + 3 * BAR_STEP + 1) as u32;
        let disgust_y = (BARS_TOP + BAR_STEP + 1) as u32;
        assert_eq!(panel.get_pixel(BAR_LEFT as u32 + 10, angry_y), &BAR_FILL);
        assert_eq!(panel.get_pixel(BAR_LEFT as u32 + 100, angry_y), &BAR_TRACK);
        assert_eq!(panel.get_pixel(BAR_LEFT as u32 + 10, happy_y), &BAR_HIGHLIGHT);
        assert_eq!(panel.get_pixel(BAR_LEFT as u32 + 10, disgust_y), &BAR_TRACK);
    }

    #[test]
    fn bars_fit_inside_panel() {
        let last_bar_bottom = BARS_TOP + 6 * BAR_STEP + BAR_HEIGHT as i32;
        assert!(last_bar_bottom <= PANEL_HEIGHT as i32);
        assert!(BAR_LEFT as u32 + BAR_MAX_WIDTH <= PANEL_WIDTH);
    }

    #[test]
    fn empty_panel_without_result() {
        let renderer = renderer_with_emoji();
        let panel = renderer.side_panel(None, None);
        assert!(panel.pixels().all(|p| *p == PANEL_BACKGROUND));
    }

    #[test]
    fn annotate_clamps_boxes_to_frame() {
        let renderer = Renderer::new(ImageManager::new("/nowhere"), None);
        let mut image = RgbImage::new(40, 30);
        let result = EmotionResult::new(EmotionState::Sad, 0.6);

        let sad = EmotionScores::certain(EmotionState::Sad);
        let partial = Detection::new(FaceBox::new(-5, 10, 20, 40), sad);
        renderer.annotate(&mut image, &partial, &result);
        assert_eq!(image.get_pixel(0, 10), &BOX_COLOR);

        let outside = Detection::new(FaceBox::new(100, 100, 5, 5), sad);
        let before = image.clone();
        renderer.annotate(&mut image, &outside, &result);
        assert_eq!(image, before);
    }

    #[test]
    fn missing_font_disables_captions() {
        assert!(load_font(Path::new("/no/such/font.ttf")).is_none());
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();
        assert!(load_font(&bogus).is_none());
    }
}
