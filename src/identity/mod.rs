// Identity matching against a gallery of registered faces

mod encoder;

pub use encoder::FaceEncoder;
#[cfg(feature = "onnx")]
pub use encoder::OnnxFaceEncoder;

use crate::config::{IdentityConfig, MatchPolicy};
use crate::detector::{detect_guarded, Detector};
use crate::error::Result;
use crate::models::{FaceBox, Frame};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name reported when no gallery entry matches
pub const UNKNOWN_USER: &str = "Unknown";

/// Registered faces: names and embeddings, index-aligned
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    names: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one reference embedding for `name`
    pub fn enroll(&mut self, name: impl Into<String>, embedding: Vec<f32>) {
        self.names.push(name.into());
        self.embeddings.push(embedding);
    }

    /// Drops every embedding of `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.names.len();
        let mut idx = 0;
        while idx < self.names.len() {
            if self.names[idx] == name {
                self.names.remove(idx);
                self.embeddings.remove(idx);
            } else {
                idx += 1;
            }
        }
        before - self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Gallery entry for `embedding` within `tolerance`, per `policy`
    pub fn find(&self, embedding: &[f32], tolerance: f32, policy: MatchPolicy) -> Option<&str> {
        let mut nearest: Option<(usize, f32)> = None;
        for (idx, reference) in self.embeddings.iter().enumerate() {
            let Some(distance) = euclidean_distance(reference, embedding) else {
                continue;
            };
            if distance > tolerance {
                continue;
            }
            match policy {
                MatchPolicy::FirstMatch => return Some(&self.names[idx]),
                MatchPolicy::Nearest => {
                    if nearest.map_or(true, |(_, best)| distance < best) {
                        nearest = Some((idx, distance));
                    }
                }
            }
        }
        nearest.map(|(idx, _)| self.names[idx].as_str())
    }

    /// Enrolls every readable image in `folder` under `name`.
    /// Returns how many images were enrolled.
    pub fn enroll_folder(
        &mut self,
        name: &str,
        folder: &Path,
        encoder: &mut dyn FaceEncoder,
        detector: &mut dyn Detector,
    ) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(folder)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_image_file(path))
            .collect();
        paths.sort();
        Ok(self.enroll_images(name, &paths, encoder, detector))
    }

    /// Enrolls the given images under `name`.
    ///
    /// The face in each image is located with `detector`; the whole image is
    /// used when no face is found. Unreadable images are skipped.
    pub fn enroll_images(
        &mut self,
        name: &str,
        paths: &[PathBuf],
        encoder: &mut dyn FaceEncoder,
        detector: &mut dyn Detector,
    ) -> usize {
        let mut enrolled = 0;
        for path in paths {
            let image = match image::open(path) {
                Ok(img) => img.into_rgb8(),
                Err(e) => {
                    warn!("Skipping reference image {}: {}", path.display(), e);
                    continue;
                }
            };
            let frame = Frame::new(image);
            let face = detect_guarded(detector, &frame)
                .first()
                .map(|d| d.face)
                .unwrap_or_else(|| FaceBox::full(frame.width(), frame.height()));

            match encoder.encode(&frame, face) {
                Ok(Some(embedding)) => {
                    self.enroll(name, embedding);
                    enrolled += 1;
                }
                Ok(None) => debug!("No embedding for {}", path.display()),
                Err(e) => warn!("Failed to encode {}: {}", path.display(), e),
            }
        }
        enrolled
    }

    /// Loads every user folder under `users_dir`. Folder names use `_` for
    /// spaces; hidden folders are skipped.
    pub fn load(
        users_dir: &Path,
        encoder: &mut dyn FaceEncoder,
        detector: &mut dyn Detector,
    ) -> Result<Self> {
        let mut gallery = Gallery::new();
        if !users_dir.is_dir() {
            return Ok(gallery);
        }

        let mut folders: Vec<_> = std::fs::read_dir(users_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        for folder in folders {
            let Some(folder_name) = folder.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            if folder_name.starts_with('.') {
                continue;
            }
            let name = folder_name.replace('_', " ");
            match gallery.enroll_folder(&name, &folder, encoder, detector) {
                Ok(count) => debug!("Loaded {} reference images for {}", count, name),
                Err(e) => warn!("Failed to read {}: {}", folder.display(), e),
            }
        }
        info!("Gallery loaded with {} embeddings", gallery.len());
        Ok(gallery)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            matches!(ext.as_str(), "jpg" | "jpeg" | "png")
        })
        .unwrap_or(false)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    )
}

/// Per-session matcher with a frame budget
pub struct IdentityMatcher {
    gallery: Gallery,
    encoder: Box<dyn FaceEncoder>,
    config: IdentityConfig,
    frames_seen: u64,
    finished: bool,
    resolved: Option<String>,
}

impl IdentityMatcher {
    pub fn new(gallery: Gallery, encoder: Box<dyn FaceEncoder>, config: IdentityConfig) -> Self {
        Self {
            gallery,
            encoder,
            config,
            frames_seen: 0,
            finished: false,
            resolved: None,
        }
    }

    /// Forgets the previous session's result
    pub fn reset(&mut self) {
        self.frames_seen = 0;
        self.finished = false;
        self.resolved = None;
    }

    /// Counts one frame and attempts a match if still within budget.
    ///
    /// Returns the newly resolved name on the frame where it was found.
    pub fn observe(&mut self, frame: &Frame, face: Option<FaceBox>) -> Option<String> {
        self.frames_seen += 1;
        if self.finished {
            return None;
        }
        if self.frames_seen > self.config.frame_budget {
            self.finished = true;
            return None;
        }

        let mut found = None;
        if let Some(face) = face {
            if !self.gallery.is_empty() {
                match self.encoder.encode(frame, face) {
                    Ok(Some(embedding)) => {
                        found = self
                            .gallery
                            .find(&embedding, self.config.tolerance, self.config.policy)
                            .map(str::to_string);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Face encoding failed: {}", e),
                }
            }
        }

        if let Some(name) = &found {
            info!("Recognized user: {}", name);
            self.resolved = Some(name.clone());
            self.finished = true;
        } else if self.frames_seen >= self.config.frame_budget {
            debug!("Identity frame budget exhausted");
            self.finished = true;
        }
        found
    }

    /// Resolved name, or [`UNKNOWN_USER`]
    pub fn current_user(&self) -> &str {
        self.resolved.as_deref().unwrap_or(UNKNOWN_USER)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Replaces the gallery entries of a freshly registered user
    pub fn enroll_photos(
        &mut self,
        name: &str,
        photos: &[PathBuf],
        detector: &mut dyn Detector,
    ) -> usize {
        let removed = self.gallery.remove(name);
        if removed > 0 {
            debug!("Replacing {} reference embeddings of {}", removed, name);
        }
        self.gallery
            .enroll_images(name, photos, self.encoder.as_mut(), detector)
    }
}
