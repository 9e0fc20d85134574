// Camera module for webcam capture

use crate::config::CameraConfig;
use crate::error::{EmotionDetectorError, Result};
use crate::models::Frame;
use tracing::{error, info};

/// Anything that yields frames on demand
pub trait FrameSource {
    /// Reads the next frame. Errors are transient unless they repeat.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Releases the underlying device. Must be idempotent.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Frame> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Owns a frame source and releases it when dropped, including during
/// unwinding.
pub struct CaptureGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> CaptureGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        self.source.read_frame()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> Drop for CaptureGuard<S> {
    fn drop(&mut self) {
        self.source.release();
    }
}

/// Opens a frame source inside the worker thread that will own it
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Factory for the configured native camera
pub fn camera_factory(config: CameraConfig) -> SourceFactory {
    Box::new(move || {
        let camera = CameraSource::open(&config)?;
        Ok(Box::new(camera) as Box<dyn FrameSource>)
    })
}

#[cfg(feature = "camera")]
pub use native::{list_devices, CameraSource};

#[cfg(feature = "camera")]
mod native {
    use super::*;
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    };
    use nokhwa::Camera;

    /// Webcam frame source backed by nokhwa
    pub struct CameraSource {
        camera: Camera,
        streaming: bool,
    }

    impl CameraSource {
        /// Opens the configured camera, falling back to the next index
        pub fn open(config: &CameraConfig) -> Result<Self> {
            let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(
                    Resolution::new(config.width, config.height),
                    FrameFormat::YUYV,
                    config.fps,
                ),
            ));

            // Some systems start at 0, others at 1
            let mut camera = Self::try_open_camera(config.index, requested_format)
                .or_else(|_| Self::try_open_camera(config.index + 1, requested_format))
                .map_err(|e| {
                    error!("Failed to initialize camera: {}", e);
                    EmotionDetectorError::CameraInit(format!(
                        "Could not open camera. Make sure:\n\
                        1. A camera is connected\n\
                        2. No other app is using it\n\
                        3. Camera permissions are granted\n\
                        Error: {e}"
                    ))
                })?;

            camera.open_stream()?;
            let source = Self {
                camera,
                streaming: true,
            };
            let (width, height) = source.resolution();
            info!(
                "Camera opened: {} at {}x{}",
                source.camera.info().human_name(),
                width,
                height
            );
            Ok(source)
        }

        fn try_open_camera(index: u32, requested_format: RequestedFormat) -> Result<Camera> {
            Camera::new(CameraIndex::Index(index), requested_format)
                .map_err(|e| EmotionDetectorError::CameraInit(e.to_string()))
        }

        /// Returns the current camera resolution
        pub fn resolution(&self) -> (u32, u32) {
            let res = self.camera.resolution();
            (res.width(), res.height())
        }
    }

    impl FrameSource for CameraSource {
        fn read_frame(&mut self) -> Result<Frame> {
            if !self.streaming {
                return Err(EmotionDetectorError::FrameCapture(
                    "Camera stream is closed".to_string(),
                ));
            }

            let frame_data = self.camera.frame().map_err(|e| {
                EmotionDetectorError::FrameCapture(format!("Failed to capture frame: {e}"))
            })?;

            let buffer = frame_data.decode_image::<RgbFormat>().map_err(|e| {
                EmotionDetectorError::FrameProcessing(format!("Failed to decode frame: {e}"))
            })?;

            let (width, height) = (buffer.width(), buffer.height());
            let image = RgbImage::from_raw(width, height, buffer.into_raw()).ok_or_else(|| {
                EmotionDetectorError::FrameProcessing("Frame buffer size mismatch".to_string())
            })?;

            Ok(Frame::new(image))
        }

        fn release(&mut self) {
            if !self.streaming {
                return;
            }
            self.streaming = false;

            if let Err(e) = self.camera.stop_stream() {
                error!("Error stopping camera stream: {}", e);
            } else {
                info!("Camera released");
            }
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            self.release();
        }
    }

    /// Lists available camera devices
    pub fn list_devices() -> Result<Vec<String>> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(|e| {
            EmotionDetectorError::CameraInit(format!("Failed to query cameras: {e}"))
        })?;

        Ok(devices
            .iter()
            .map(|info| info.human_name().to_string())
            .collect())
    }
}

/// Placeholder when the crate is built without a camera backend
#[cfg(not(feature = "camera"))]
pub struct CameraSource;

#[cfg(not(feature = "camera"))]
impl CameraSource {
    pub fn open(_config: &CameraConfig) -> Result<Self> {
        error!("Camera requested but built without the `camera` feature");
        Err(EmotionDetectorError::CameraInit(
            "This build has no camera support (enable the `camera` feature)".to_string(),
        ))
    }
}

#[cfg(not(feature = "camera"))]
impl FrameSource for CameraSource {
    fn read_frame(&mut self) -> Result<Frame> {
        Err(EmotionDetectorError::FrameCapture("No camera backend".to_string()))
    }

    fn release(&mut self) {}
}

#[cfg(not(feature = "camera"))]
pub fn list_devices() -> Result<Vec<String>> {
    Ok(Vec::new())
}
