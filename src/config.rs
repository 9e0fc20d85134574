// Application configuration resolved once at startup

use crate::error::{EmotionDetectorError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CASCADE_FILE_NAME: &str = "haarcascade_frontalface_default.xml";
pub const SURVEY_FILE_NAME: &str = "respuestas_encuesta.csv";
pub const USERS_DIR_NAME: &str = "usuarios";
pub const EMOJI_DIR_NAME: &str = "img";

/// Which classifier family to try first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// FER-style 64x64 grayscale expression CNN
    Expression,
    /// HSEmotion-style 260x260 RGB analysis CNN
    DeepAnalysis,
}

impl ModelFamily {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "expression" | "fer" => Some(ModelFamily::Expression),
            "analysis" | "deep" | "deepanalysis" | "deepface" => Some(ModelFamily::DeepAnalysis),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::Expression => "expression",
            ModelFamily::DeepAnalysis => "analysis",
        }
    }
}

/// How the identity matcher picks among several gallery entries in tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// First entry in gallery order within tolerance
    FirstMatch,
    /// Closest entry within tolerance
    Nearest,
}

/// Camera capture settings
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Device index tried first; the next index is tried as a fallback
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Detector negotiation settings
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub family: ModelFamily,
    /// Explicit cascade file, used when the data directory has none
    pub cascade_override: Option<PathBuf>,
    /// Fall back to randomized scores when no real classifier is available
    pub allow_simulated: bool,
    /// Faces smaller than this (pixels) are ignored by the cascade
    pub min_face_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            family: ModelFamily::Expression,
            cascade_override: None,
            allow_simulated: true,
            min_face_size: 40,
        }
    }
}

/// Label smoothing settings
#[derive(Debug, Clone)]
pub struct SmoothingConfig {
    /// Number of recent labels considered by the majority vote
    pub window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { window: 5 }
    }
}

/// Identity matching settings
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub enabled: bool,
    /// Frames at the start of a session during which matching is attempted
    pub frame_budget: u64,
    /// Maximum euclidean distance between L2-normalized embeddings
    pub tolerance: f32,
    pub policy: MatchPolicy,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_budget: 25,
            tolerance: 1.0,
            policy: MatchPolicy::FirstMatch,
        }
    }
}

/// Face registration settings
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub photos_required: usize,
    pub max_attempts: usize,
    pub capture_interval: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            photos_required: 5,
            max_attempts: 30,
            capture_interval: Duration::from_millis(500),
        }
    }
}

/// Detection session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum time between two processed frames
    pub frame_interval: Duration,
    /// Consecutive read failures tolerated before the camera is considered lost
    pub max_consecutive_read_failures: u32,
    /// Pause after a failed read
    pub read_retry_delay: Duration,
    /// Apply histogram equalization when the session starts
    pub equalize_histogram: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            max_consecutive_read_failures: 30,
            read_retry_delay: Duration::from_millis(20),
            equalize_histogram: true,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub smoothing: SmoothingConfig,
    pub identity: IdentityConfig,
    pub registration: RegistrationConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_file: PathBuf::from("emotion_detector.log"),
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            smoothing: SmoothingConfig::default(),
            identity: IdentityConfig::default(),
            registration: RegistrationConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Create config from `EMOTION_*` environment variables.
    ///
    /// The data directory comes from `EMOTION_DATA_DIR` or is resolved next to
    /// the executable.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None)
    }

    /// Like [`AppConfig::from_env`], but an explicit `data_dir` wins over both
    /// the environment and the executable location. Touches no files.
    pub fn from_env_with(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match (data_dir, std::env::var("EMOTION_DATA_DIR")) {
            (Some(dir), _) => dir,
            (None, Ok(dir)) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => resolve_data_dir(&executable_dir()?),
        };

        let mut config = Self::with_data_dir(data_dir);
        if let Ok(path) = std::env::var("EMOTION_LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }
        if let Some(index) = env_parse("EMOTION_CAMERA_INDEX") {
            config.camera.index = index;
        }
        if let Some(family) = std::env::var("EMOTION_MODEL_FAMILY")
            .ok()
            .and_then(|v| ModelFamily::parse(&v))
        {
            config.detector.family = family;
        }
        if let Ok(path) = std::env::var("EMOTION_CASCADE_FILE") {
            config.detector.cascade_override = Some(PathBuf::from(path));
        }
        if let Some(allow) = env_parse("EMOTION_ALLOW_SIMULATED") {
            config.detector.allow_simulated = allow;
        }
        if let Some(window) = env_parse::<usize>("EMOTION_SMOOTHING_WINDOW") {
            config.smoothing.window = window.max(1);
        }
        if let Some(budget) = env_parse("EMOTION_RECOGNITION_FRAMES") {
            config.identity.frame_budget = budget;
        }
        if let Some(tolerance) = env_parse("EMOTION_MATCH_TOLERANCE") {
            config.identity.tolerance = tolerance;
        }
        if std::env::var("EMOTION_MATCH_POLICY")
            .map(|v| v.eq_ignore_ascii_case("nearest"))
            .unwrap_or(false)
        {
            config.identity.policy = MatchPolicy::Nearest;
        }
        Ok(config)
    }

    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join(USERS_DIR_NAME)
    }

    pub fn emoji_dir(&self) -> PathBuf {
        self.data_dir.join(EMOJI_DIR_NAME)
    }

    pub fn survey_file(&self) -> PathBuf {
        self.data_dir.join(SURVEY_FILE_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn emotion_model(&self, family: ModelFamily) -> PathBuf {
        match family {
            ModelFamily::Expression => self.models_dir().join("emotion_expression.onnx"),
            ModelFamily::DeepAnalysis => self.models_dir().join("emotion_analysis.onnx"),
        }
    }

    pub fn embedding_model(&self) -> PathBuf {
        self.models_dir().join("face_embedding.onnx")
    }

    pub fn font_file(&self) -> PathBuf {
        self.data_dir.join("fonts").join("DejaVuSans.ttf")
    }

    /// Locates the Haar cascade: data directory first, then the override
    pub fn cascade_file(&self) -> Option<PathBuf> {
        let candidates = std::iter::once(self.data_dir.join(CASCADE_FILE_NAME))
            .chain(self.detector.cascade_override.clone());
        for candidate in candidates {
            if candidate.is_file() {
                info!("Using cascade file: {}", candidate.display());
                return Some(candidate);
            }
        }
        warn!("{} not found", CASCADE_FILE_NAME);
        None
    }

    /// Creates the data directory with its `img/` and `usuarios/` subfolders
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.data_dir.clone(), self.emoji_dir(), self.users_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    EmotionDetectorError::Config(format!(
                        "Cannot create directory {}: {e}",
                        dir.display()
                    ))
                })?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| EmotionDetectorError::Config("Executable has no parent directory".into()))
}

/// Picks `<base>/data`, then `<base>/_internal/data`, falling back to
/// `<base>/data`. [`AppConfig::ensure_layout`] creates it when missing.
pub fn resolve_data_dir(base: &Path) -> PathBuf {
    let internal = base.join("_internal").join("data");
    let default_dir = base.join("data");
    if !default_dir.is_dir() && internal.is_dir() {
        return internal;
    }
    default_dir
}
