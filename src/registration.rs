// Face registration: capture reference photos for a new user

use crate::camera::{CaptureGuard, FrameSource, SourceFactory};
use crate::config::RegistrationConfig;
use crate::detector::{detect_guarded, Detector};
use crate::error::{EmotionDetectorError, Result};
use crate::models::{Detection, Frame};
use crate::pipeline::FramePipeline;
use crate::session::lock;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PREVIEW_BOX: Rgb<u8> = Rgb([0, 255, 0]);

const NAME_PATTERN: &str = r"^[a-zA-ZáéíóúÁÉÍÓÚüÜñÑ ]+$";

/// Trims `name` and checks it only holds letters and spaces
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EmotionDetectorError::InvalidInput(
            "Name must not be empty".to_string(),
        ));
    }
    let pattern = Regex::new(NAME_PATTERN)
        .map_err(|e| EmotionDetectorError::Config(format!("Invalid name pattern: {e}")))?;
    if !pattern.is_match(trimmed) {
        return Err(EmotionDetectorError::InvalidInput(format!(
            "Name '{trimmed}' may only contain letters and spaces"
        )));
    }
    Ok(trimmed.to_string())
}

/// Folder name for a user: spaces become underscores
pub fn folder_name(name: &str) -> String {
    name.replace(' ', "_")
}

/// A completed registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub name: String,
    pub folder: PathBuf,
    pub photos: Vec<PathBuf>,
}

/// Captures reference photos under `usuarios/<name>/`
pub struct Registrar {
    users_dir: PathBuf,
    config: RegistrationConfig,
    preview: watch::Sender<Option<RgbImage>>,
}

impl Registrar {
    pub fn new<P: Into<PathBuf>>(users_dir: P, config: RegistrationConfig) -> Self {
        let (preview, _) = watch::channel(None);
        Self {
            users_dir: users_dir.into(),
            config,
            preview,
        }
    }

    /// Latest sampled frame, with the detected face outlined
    pub fn subscribe_preview(&self) -> watch::Receiver<Option<RgbImage>> {
        self.preview.subscribe()
    }

    fn publish(&self, frame: &Frame, detections: &[Detection]) {
        let mut image = frame.image.clone();
        if let Some(face) = detections
            .first()
            .and_then(|d| d.face.clamp_to(image.width(), image.height()))
        {
            let rect = Rect::at(face.x, face.y).of_size(face.width.max(1), face.height.max(1));
            draw_hollow_rect_mut(&mut image, rect, PREVIEW_BOX);
        }
        self.preview.send_replace(Some(image));
    }

    /// Samples frames until enough photos with a face are saved.
    ///
    /// Every sample counts against `max_attempts`, failed reads included.
    /// Photos go to a staging folder that replaces the user's folder only
    /// once all of them are captured. A failed attempt leaves any earlier
    /// registration as it was.
    pub fn register(
        &self,
        name: &str,
        source: &mut dyn FrameSource,
        detector: &mut dyn Detector,
    ) -> Result<RegistrationOutcome> {
        let name = validate_name(name)?;
        let dir_name = folder_name(&name);
        let folder = self.users_dir.join(&dir_name);
        let staging = self.users_dir.join(format!(".{dir_name}.partial"));
        std::fs::create_dir_all(&self.users_dir)?;
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir(&staging)?;
        self.preview.send_replace(None);
        info!("Registering {} into {}", name, folder.display());

        let required = self.config.photos_required;
        let mut captured = 0;

        for attempt in 0..self.config.max_attempts {
            if captured >= required {
                break;
            }

            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Registration read {} failed: {}", attempt + 1, e);
                    continue;
                }
            };

            let detections = detect_guarded(detector, &frame);
            self.publish(&frame, &detections);
            if detections.is_empty() {
                debug!("No face in registration sample {}", attempt + 1);
                continue;
            }

            let path = staging.join(photo_name(captured));
            if let Err(e) = frame.image.save(&path) {
                warn!("Failed to save {}: {}", path.display(), e);
                continue;
            }
            captured += 1;
            info!("Saved photo {}/{} for {}", captured, required, name);

            if captured < required && !self.config.capture_interval.is_zero() {
                std::thread::sleep(self.config.capture_interval);
            }
        }

        if captured < required {
            warn!(
                "Registration of {} failed: {} of {} photos",
                name, captured, required
            );
            if let Err(e) = std::fs::remove_dir_all(&staging) {
                warn!("Failed to remove {}: {}", staging.display(), e);
            }
            return Err(EmotionDetectorError::PartialCapture { captured, required });
        }

        let backup = self.users_dir.join(format!(".{dir_name}.previous"));
        replace_folder(&staging, &folder, &backup)?;
        Ok(RegistrationOutcome {
            photos: (0..captured).map(|i| folder.join(photo_name(i))).collect(),
            name,
            folder,
        })
    }
}

fn photo_name(index: usize) -> String {
    format!("{index}.jpg")
}

/// Moves `staging` to `folder`, restoring the old folder if the move fails
fn replace_folder(staging: &Path, folder: &Path, backup: &Path) -> Result<()> {
    let had_previous = folder.exists();
    if had_previous {
        if backup.exists() {
            std::fs::remove_dir_all(backup)?;
        }
        std::fs::rename(folder, backup)?;
    }

    if let Err(e) = std::fs::rename(staging, folder) {
        if had_previous {
            if let Err(restore) = std::fs::rename(backup, folder) {
                warn!("Failed to restore {}: {}", folder.display(), restore);
            }
        }
        let _ = std::fs::remove_dir_all(staging);
        return Err(e.into());
    }

    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(backup) {
            warn!("Failed to remove {}: {}", backup.display(), e);
        }
    }
    Ok(())
}

/// Opens a source, registers `name` with the pipeline's detector and enrolls
/// the new photos when face identification is active.
///
/// Returns the outcome and how many photos were enrolled. The source is
/// released before returning.
pub fn register_and_enroll(
    registrar: &Registrar,
    name: &str,
    factory: SourceFactory,
    pipeline: &Mutex<FramePipeline>,
) -> Result<(RegistrationOutcome, usize)> {
    let name = validate_name(name)?;
    let mut capture = CaptureGuard::new(factory()?);
    let mut pipeline = lock(pipeline);

    let outcome = registrar.register(&name, capture.source_mut(), pipeline.detector_mut())?;
    drop(capture);

    let enrolled = match pipeline.identity_and_detector() {
        (Some(identity), detector) => {
            identity.enroll_photos(&outcome.name, &outcome.photos, detector)
        }
        (None, _) => 0,
    };
    info!(
        "Registered {} with {} photos, {} enrolled",
        outcome.name,
        outcome.photos.len(),
        enrolled
    );
    Ok((outcome, enrolled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmotionState, Frame};
    use crate::pipeline::test_support::{Scripted, ScriptedDetector};
    use image::RgbImage;
    use std::time::Duration;

    struct Source {
        fail_every: Option<usize>,
        reads: usize,
    }

    impl FrameSource for Source {
        fn read_frame(&mut self) -> Result<Frame> {
            self.reads += 1;
            if self.fail_every.is_some_and(|n| self.reads % n == 0) {
                return Err(EmotionDetectorError::FrameCapture("glitch".into()));
            }
            Ok(Frame::new(RgbImage::new(32, 24)))
        }

        fn release(&mut self) {}
    }

    fn registrar(dir: &Path) -> Registrar {
        Registrar::new(
            dir.join("usuarios"),
            RegistrationConfig {
                photos_required: 5,
                max_attempts: 30,
                capture_interval: Duration::ZERO,
            },
        )
    }

    #[test]
    fn validates_names() {
        assert_eq!(validate_name("  María José ").unwrap(), "María José");
        assert_eq!(validate_name("Ñandú Güemes").unwrap(), "Ñandú Güemes");
        assert!(validate_name("   ").is_err());
        assert!(validate_name("R2D2").is_err());
        assert!(validate_name("ana/../x").is_err());
        assert_eq!(folder_name("María José"), "María_José");
    }

    #[test]
    fn saves_required_photos() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = registrar(dir.path());
        let mut source = Source { fail_every: Some(3), reads: 0 };
        let mut detector = ScriptedDetector::new(vec![
            Scripted::NoFace,
            Scripted::Face(EmotionState::Neutral),
        ]);

        let outcome = registrar
            .register(" Ana Pérez ", &mut source, &mut detector)
            .unwrap();

        assert_eq!(outcome.name, "Ana Pérez");
        assert_eq!(outcome.folder, dir.path().join("usuarios").join("Ana_Pérez"));
        assert_eq!(outcome.photos.len(), 5);
        for (i, photo) in outcome.photos.iter().enumerate() {
            assert_eq!(photo, &outcome.folder.join(format!("{i}.jpg")));
            assert!(image::open(photo).is_ok());
        }
    }

    #[test]
    fn too_few_faces_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = Registrar::new(
            dir.path().join("usuarios"),
            RegistrationConfig {
                photos_required: 5,
                max_attempts: 6,
                capture_interval: Duration::ZERO,
            },
        );
        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![
            Scripted::Face(EmotionState::Happy),
            Scripted::NoFace,
            Scripted::Face(EmotionState::Happy),
            Scripted::NoFace,
        ]);

        let err = registrar.register("Luis", &mut source, &mut detector).unwrap_err();
        assert!(matches!(
            err,
            EmotionDetectorError::PartialCapture { captured: 2, required: 5 }
        ));
        assert_eq!(source.reads, 6);
        let users = dir.path().join("usuarios");
        assert!(!users.join("Luis").exists());
        assert_eq!(std::fs::read_dir(&users).unwrap().count(), 0);
    }

    #[test]
    fn failed_retry_keeps_previous_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Source { fail_every: None, reads: 0 };
        let mut faces = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Happy)]);
        let first = registrar(dir.path())
            .register("Eva", &mut source, &mut faces)
            .unwrap();
        let before: Vec<_> = first.photos.iter().map(|p| std::fs::read(p).unwrap()).collect();

        let retry = Registrar::new(
            dir.path().join("usuarios"),
            RegistrationConfig {
                photos_required: 5,
                max_attempts: 2,
                capture_interval: Duration::ZERO,
            },
        );
        let mut detector = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Sad)]);
        let err = retry.register("Eva", &mut source, &mut detector).unwrap_err();
        assert!(matches!(
            err,
            EmotionDetectorError::PartialCapture { captured: 2, required: 5 }
        ));

        for (photo, bytes) in first.photos.iter().zip(&before) {
            assert_eq!(&std::fs::read(photo).unwrap(), bytes);
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("usuarios"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("Eva")]);
    }

    #[test]
    fn successful_retry_replaces_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("usuarios").join("Eva");
        std::fs::create_dir_all(&folder).unwrap();
        for i in 0..7 {
            std::fs::write(folder.join(format!("{i}.jpg")), b"old").unwrap();
        }

        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Happy)]);
        let outcome = registrar(dir.path())
            .register("Eva", &mut source, &mut detector)
            .unwrap();

        assert_eq!(outcome.photos.len(), 5);
        assert!(outcome.photos.iter().all(|p| image::open(p).is_ok()));
        assert!(!folder.join("5.jpg").exists());
        assert_eq!(std::fs::read_dir(dir.path().join("usuarios")).unwrap().count(), 1);
    }

    #[test]
    fn detector_panic_skips_the_sample() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = Registrar::new(
            dir.path().join("usuarios"),
            RegistrationConfig {
                photos_required: 1,
                max_attempts: 3,
                capture_interval: Duration::ZERO,
            },
        );
        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![
            Scripted::Panic,
            Scripted::Face(EmotionState::Neutral),
        ]);

        let outcome = registrar.register("Ana", &mut source, &mut detector).unwrap();
        assert_eq!(outcome.photos.len(), 1);
        assert_eq!(source.reads, 2);
    }

    #[test]
    fn publishes_sampled_frames() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = registrar(dir.path());
        let mut preview = registrar.subscribe_preview();
        assert!(preview.borrow_and_update().is_none());

        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Happy)]);
        registrar.register("Ana", &mut source, &mut detector).unwrap();

        assert!(preview.has_changed().unwrap());
        let latest = preview.borrow_and_update();
        let image = (*latest).as_ref().unwrap();
        assert_eq!(image.dimensions(), (32, 24));
        // Scripted faces start at (1, 1)
        assert_eq!(*image.get_pixel(1, 1), PREVIEW_BOX);
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn failed_reads_count_as_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = registrar(dir.path());
        let mut source = Source { fail_every: Some(1), reads: 0 };
        let mut detector = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Sad)]);

        let err = registrar.register("Eva", &mut source, &mut detector).unwrap_err();
        assert!(matches!(err, EmotionDetectorError::PartialCapture { captured: 0, .. }));
        assert_eq!(source.reads, 30);
    }

    #[test]
    fn cleanup_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("usuarios").join("Eva");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("notes.txt"), b"keep").unwrap();

        let registrar = registrar(dir.path());
        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![Scripted::NoFace]);
        assert!(registrar.register("Eva", &mut source, &mut detector).is_err());
        assert!(folder.join("notes.txt").exists());
    }

    #[test]
    fn register_and_enroll_releases_source() {
        use crate::config::IdentityConfig;
        use crate::identity::{FaceEncoder, Gallery, IdentityMatcher};
        use crate::models::FaceBox;
        use crate::pipeline::test_support::pipeline;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        struct Released(Source, Arc<AtomicBool>);
        impl FrameSource for Released {
            fn read_frame(&mut self) -> Result<Frame> {
                self.0.read_frame()
            }
            fn release(&mut self) {
                self.1.store(true, Ordering::SeqCst);
            }
        }

        struct ConstantEncoder;
        impl FaceEncoder for ConstantEncoder {
            fn encode(&mut self, _frame: &Frame, _face: FaceBox) -> Result<Option<Vec<f32>>> {
                Ok(Some(vec![1.0, 0.0]))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let registrar = registrar(dir.path());
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let factory: SourceFactory = Box::new(move || {
            let source = Source { fail_every: None, reads: 0 };
            Ok(Box::new(Released(source, flag)) as Box<dyn FrameSource>)
        });
        let identity = IdentityMatcher::new(
            Gallery::new(),
            Box::new(ConstantEncoder),
            IdentityConfig::default(),
        );
        let shared = Mutex::new(
            pipeline(ScriptedDetector::new(vec![Scripted::Face(EmotionState::Happy)]), 5)
                .with_identity(identity),
        );

        let (outcome, enrolled) =
            register_and_enroll(&registrar, "Sofía", factory, &shared).unwrap();
        assert_eq!(outcome.photos.len(), 5);
        assert_eq!(enrolled, 5);
        assert!(released.load(Ordering::SeqCst));

        {
            let mut pipeline = shared.lock().unwrap();
            let identity = pipeline.identity_mut().unwrap();
            assert_eq!(identity.gallery().len(), 5);
            assert_eq!(identity.gallery().names()[0], "Sofía");
        }

        // Registering again replaces the entries instead of adding to them
        let flag = Arc::new(AtomicBool::new(false));
        let factory: SourceFactory = Box::new(move || {
            let source = Source { fail_every: None, reads: 0 };
            Ok(Box::new(Released(source, flag)) as Box<dyn FrameSource>)
        });
        let (_, enrolled) = register_and_enroll(&registrar, "Sofía", factory, &shared).unwrap();
        assert_eq!(enrolled, 5);
        let mut pipeline = shared.lock().unwrap();
        assert_eq!(pipeline.identity_mut().unwrap().gallery().len(), 5);
    }

    #[test]
    fn invalid_name_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = registrar(dir.path());
        let mut source = Source { fail_every: None, reads: 0 };
        let mut detector = ScriptedDetector::new(vec![Scripted::Face(EmotionState::Happy)]);
        assert!(matches!(
            registrar.register("1234", &mut source, &mut detector),
            Err(EmotionDetectorError::InvalidInput(_))
        ));
        assert_eq!(source.reads, 0);
        assert!(!dir.path().join("usuarios").exists());
    }
}
