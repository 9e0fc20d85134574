// Face registration view

use crate::camera::camera_factory;
use crate::config::{AppConfig, CameraConfig};
use crate::error::Result;
use crate::registration::{register_and_enroll, validate_name, Registrar, RegistrationOutcome};
use crate::session::DetectionSession;
use egui::{Color32, TextureHandle};
use image::RgbImage;
use tokio::sync::{oneshot, watch};
use tracing::error;

type Pending = oneshot::Receiver<Result<(RegistrationOutcome, usize)>>;

pub(super) struct RegistrationView {
    name: String,
    message: Option<(String, bool)>,
    pending: Option<Pending>,
    camera: CameraConfig,
    registrar: std::sync::Arc<Registrar>,
    preview: watch::Receiver<Option<RgbImage>>,
    texture: Option<TextureHandle>,
}

impl RegistrationView {
    pub(super) fn new(config: &AppConfig) -> Self {
        let registrar = Registrar::new(config.users_dir(), config.registration.clone());
        let preview = registrar.subscribe_preview();
        Self {
            name: String::new(),
            message: None,
            pending: None,
            camera: config.camera.clone(),
            registrar: std::sync::Arc::new(registrar),
            preview,
            texture: None,
        }
    }

    /// Uploads the newest sampled frame, if any
    fn refresh_preview(&mut self, ctx: &egui::Context) {
        if !self.preview.has_changed().unwrap_or(false) {
            return;
        }
        let latest = self.preview.borrow_and_update();
        match &*latest {
            Some(frame) => {
                let image = egui::ColorImage::from_rgb(
                    [frame.width() as usize, frame.height() as usize],
                    frame.as_raw(),
                );
                super::upload(ctx, &mut self.texture, "registration", image);
            }
            None => self.texture = None,
        }
    }

    pub(super) fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Collects a finished registration, returning a message for the user
    pub(super) fn poll(&mut self) -> Option<String> {
        let pending = self.pending.as_mut()?;
        let result = match pending.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                let text = "Registration stopped unexpectedly".to_string();
                self.message = Some((text.clone(), false));
                return Some(text);
            }
        };
        self.pending = None;

        let (text, ok) = match result {
            Ok((outcome, _)) => (
                format!("User {} registered with {} photos", outcome.name, outcome.photos.len()),
                true,
            ),
            Err(e) => (e.to_string(), false),
        };
        self.message = Some((text.clone(), ok));
        Some(text)
    }

    fn begin(&mut self, session: &mut DetectionSession) {
        let name = match validate_name(&self.name) {
            Ok(name) => name,
            Err(e) => {
                self.message = Some((e.to_string(), false));
                return;
            }
        };

        // The camera can only have one owner
        session.stop_and_wait();

        let (tx, rx) = oneshot::channel();
        let registrar = self.registrar.clone();
        let pipeline = session.pipeline();
        let factory = camera_factory(self.camera.clone());
        let spawned = std::thread::Builder::new()
            .name("registration".to_string())
            .spawn(move || {
                let result = register_and_enroll(&registrar, &name, factory, &pipeline);
                let _ = tx.send(result);
            });

        match spawned {
            Ok(_) => {
                self.pending = Some(rx);
                self.message = Some(("Look at the camera...".to_string(), true));
            }
            Err(e) => {
                error!("Failed to spawn registration thread: {}", e);
                self.message = Some((e.to_string(), false));
            }
        }
    }

    pub(super) fn show(&mut self, ui: &mut egui::Ui, session: &mut DetectionSession) {
        ui.heading("Register face");
        ui.label("Photos are saved under the users folder and used to recognize you.");
        ui.add_space(10.0);

        ui.horizontal(|ui| {
            ui.label("Name:");
            ui.add_enabled(!self.is_busy(), egui::TextEdit::singleline(&mut self.name));
        });

        let button = ui.add_enabled(!self.is_busy(), egui::Button::new("Capture photos"));
        if button.clicked() {
            self.begin(session);
        }
        if self.is_busy() {
            ui.spinner();
        }

        if let Some((text, ok)) = &self.message {
            let color = if *ok { Color32::LIGHT_GREEN } else { Color32::LIGHT_RED };
            ui.colored_label(color, text);
        }

        self.refresh_preview(ui.ctx());
        if let Some(texture) = self.texture.as_ref().filter(|_| self.is_busy()) {
            ui.add_space(10.0);
            let size = super::fit(texture.size_vec2(), ui.available_size());
            ui.add(egui::Image::new(texture).fit_to_exact_size(size));
        }
    }
}
