// Library exports for the Emotion Detector

pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod identity;
pub mod image_manager;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod registration;
pub mod render;
pub mod session;
pub mod smoothing;
pub mod survey;
#[cfg(feature = "gui")]
pub mod ui;

pub use config::AppConfig;
pub use error::{EmotionDetectorError, Result};
pub use models::{EmotionResult, EmotionState};
