// Error types for the Emotion Detector application

use thiserror::Error;

/// Main error type for the Emotion Detector application
#[derive(Debug, Error)]
pub enum EmotionDetectorError {
    #[error("Camera initialization failed: {0}")]
    CameraInit(String),

    #[error("Frame capture failed: {0}")]
    FrameCapture(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image loading failed: {0}")]
    ImageLoad(String),

    #[error("Face detection failed: {0}")]
    FaceDetection(String),

    #[error("Face encoding failed: {0}")]
    FaceEncoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Only {captured} of {required} photos captured, face not detected clearly")]
    PartialCapture { captured: usize, required: usize },

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for Emotion Detector operations
pub type Result<T> = std::result::Result<T, EmotionDetectorError>;

// Conversion from nokhwa errors
#[cfg(feature = "camera")]
impl From<nokhwa::NokhwaError> for EmotionDetectorError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::StructureError { structure, error } => {
                EmotionDetectorError::CameraInit(format!("{structure}: {error}"))
            }
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                EmotionDetectorError::CameraInit(format!("Device {device}: {error}"))
            }
            nokhwa::NokhwaError::ReadFrameError(error) => {
                EmotionDetectorError::FrameCapture(error)
            }
            _ => EmotionDetectorError::CameraInit(err.to_string()),
        }
    }
}

// Conversion from OpenCV errors
#[cfg(feature = "opencv")]
impl From<opencv::Error> for EmotionDetectorError {
    fn from(err: opencv::Error) -> Self {
        EmotionDetectorError::OpenCV(err.to_string())
    }
}

// Conversion from ONNX Runtime errors
#[cfg(feature = "onnx")]
impl From<ort::Error> for EmotionDetectorError {
    fn from(err: ort::Error) -> Self {
        EmotionDetectorError::OnnxRuntime(err.to_string())
    }
}
