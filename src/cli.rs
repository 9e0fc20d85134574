use clap::Parser;
use emotion_detector::config::{AppConfig, ModelFamily};
use emotion_detector::error::{EmotionDetectorError, Result};
use std::path::PathBuf;

/// Real-time facial emotion detection
#[derive(Parser, Debug)]
#[command(name = "emotion-detector", version, about)]
pub struct Args {
    /// Data directory holding img/, usuarios/, models/ and the survey log
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Camera device index
    #[arg(long)]
    pub camera_index: Option<u32>,

    /// Emotion model family: expression or analysis
    #[arg(long)]
    pub family: Option<String>,

    /// Never fall back to simulated emotion scores
    #[arg(long)]
    pub no_simulated: bool,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the available cameras and exit
    #[arg(long)]
    pub list_cameras: bool,
}

impl Args {
    /// Applies command line overrides on top of the environment config
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(index) = self.camera_index {
            config.camera.index = index;
        }
        if let Some(family) = &self.family {
            config.detector.family = ModelFamily::parse(family).ok_or_else(|| {
                EmotionDetectorError::Config(format!("Unknown model family '{family}'"))
            })?;
        }
        if self.no_simulated {
            config.detector.allow_simulated = false;
        }
        if let Some(path) = &self.log_file {
            config.log_file = path.clone();
        }
        Ok(())
    }
}
