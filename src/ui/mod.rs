// UI module for the emotion detector application

mod registration;
mod survey;

use crate::camera::camera_factory;
use crate::config::AppConfig;
use crate::session::{lock, DetectionSession, SessionEvent, SessionSnapshot, SessionStatus};
use crate::survey::SurveyLog;
use egui::{Color32, TextureHandle, TextureOptions};
use registration::RegistrationView;
use survey::SurveyView;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Welcome,
    Detector,
    Registration,
    Survey,
}

/// Main application UI
pub struct EmotionDetectorApp {
    config: AppConfig,
    session: DetectionSession,
    events: broadcast::Receiver<SessionEvent>,
    view: View,
    capability: String,
    capability_notes: String,
    camera_texture: Option<TextureHandle>,
    panel_texture: Option<TextureHandle>,
    shown_frame: u64,
    snapshot: SessionSnapshot,
    notice: Option<String>,
    registration: RegistrationView,
    survey: SurveyView,
}

impl EmotionDetectorApp {
    pub fn new(config: AppConfig, session: DetectionSession) -> Self {
        let events = session.subscribe();
        let (capability, capability_notes) = {
            let pipeline = session.pipeline();
            let pipeline = lock(&pipeline);
            let capability = pipeline.capability();
            (capability.summary(), capability.notes.join("\n"))
        };
        let survey = SurveyView::new(SurveyLog::new(config.survey_file()));
        let registration = RegistrationView::new(&config);
        Self {
            config,
            session,
            events,
            view: View::Welcome,
            capability,
            capability_notes,
            camera_texture: None,
            panel_texture: None,
            shown_frame: 0,
            snapshot: SessionSnapshot::default(),
            notice: None,
            registration,
            survey,
        }
    }

    fn start_session(&mut self) {
        if self.registration.is_busy() {
            self.notice = Some("Wait for the registration to finish".to_string());
            return;
        }
        if self.session.start(camera_factory(self.config.camera.clone())) {
            info!("Detection started from the UI");
            self.shown_frame = 0;
        }
        self.view = View::Detector;
    }

    fn stop_session(&mut self) {
        self.session.stop();
    }

    /// Pulls the latest snapshot and uploads new frames as textures
    fn refresh(&mut self, ctx: &egui::Context) {
        self.snapshot = self.session.snapshot();
        if self.snapshot.frames_processed == self.shown_frame {
            return;
        }
        self.shown_frame = self.snapshot.frames_processed;

        if let Some(frame) = &self.snapshot.frame {
            let image = egui::ColorImage::from_rgb(
                [frame.width() as usize, frame.height() as usize],
                frame.as_raw(),
            );
            upload(ctx, &mut self.camera_texture, "camera", image);
        }
        if let Some(panel) = &self.snapshot.panel {
            let image = egui::ColorImage::from_rgba_unmultiplied(
                [panel.width() as usize, panel.height() as usize],
                panel.as_raw(),
            );
            upload(ctx, &mut self.panel_texture, "panel", image);
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SessionEvent::UserRecognized(name)) => {
                    self.notice = Some(format!("Welcome back, {name}"));
                }
                Ok(SessionEvent::EmotionChanged(result)) => debug!("Emotion changed: {}", result),
                Ok(SessionEvent::Started) => self.notice = None,
                Ok(SessionEvent::Stopped(status)) => {
                    if status.needs_reinitialize() {
                        self.notice = Some(status.text());
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    fn render_controls(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("controls")
            .resizable(false)
            .min_width(200.0)
            .show(ctx, |ui| {
                ui.heading("Control");
                let running = self.session.is_running();
                ui.horizontal(|ui| {
                    let start = egui::Button::new("Start").fill(Color32::from_rgb(40, 167, 69));
                    if ui.add_enabled(!running, start).clicked() {
                        self.start_session();
                    }
                    let stop = egui::Button::new("Stop").fill(Color32::from_rgb(220, 53, 69));
                    if ui.add_enabled(running, stop).clicked() {
                        self.stop_session();
                    }
                });

                ui.separator();
                ui.heading("Views");
                for (view, label) in [
                    (View::Detector, "Detector"),
                    (View::Registration, "Register face"),
                    (View::Survey, "Survey"),
                ] {
                    if ui.selectable_label(self.view == view, label).clicked() {
                        self.view = view;
                    }
                }

                ui.separator();
                ui.heading("Options");
                let mut equalize = self.session.equalize();
                if ui.checkbox(&mut equalize, "Equalize histogram").changed() {
                    self.session.set_equalize(equalize);
                }

                ui.separator();
                ui.heading("Status");
                let status = &self.snapshot.status;
                let color = match status {
                    SessionStatus::Running => Color32::LIGHT_GREEN,
                    SessionStatus::Stopped | SessionStatus::Starting => Color32::YELLOW,
                    _ => Color32::LIGHT_RED,
                };
                ui.colored_label(color, status.text());
                let reinitialize = status.needs_reinitialize() && !running;
                if reinitialize && ui.button("Reinitialize camera").clicked() {
                    self.start_session();
                }

                ui.label(format!("FPS: {:.1}", self.snapshot.fps));
                ui.label(format!("Faces: {}", self.snapshot.face_count));
                ui.label(format!("User: {}", self.snapshot.user));
                let detector = ui.small(format!("Detector: {}", self.capability));
                if !self.capability_notes.is_empty() {
                    detector.on_hover_text(self.capability_notes.as_str());
                }
            });
    }

    fn render_detector(&self, ui: &mut egui::Ui) {
        if let Some(notice) = &self.notice {
            ui.colored_label(Color32::LIGHT_BLUE, notice);
        }
        ui.horizontal_top(|ui| {
            if let Some(panel) = &self.panel_texture {
                ui.add(egui::Image::new(panel).fit_to_exact_size(panel.size_vec2()));
            }
            let available = ui.available_size();
            match &self.camera_texture {
                Some(texture) if self.session.is_running() => {
                    let size = fit(texture.size_vec2(), available);
                    ui.add(egui::Image::new(texture).fit_to_exact_size(size));
                }
                _ => {
                    ui.label("Press Start to begin detecting.");
                }
            }
        });
    }

    fn render_view(&mut self, ui: &mut egui::Ui) {
        match self.view {
            View::Welcome => self.render_welcome(ui),
            View::Detector => self.render_detector(ui),
            View::Registration => self.registration.show(ui, &mut self.session),
            View::Survey => self.survey.show(ui),
        }
    }

    fn render_welcome(&self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.add_space(80.0);
            ui.heading("Emotion Detection System");
            ui.add_space(20.0);
            ui.label("This system detects your emotions in real time.");
            ui.label("Press Start to begin, register your face, or answer the survey.");
        });
    }
}

fn upload(
    ctx: &egui::Context,
    slot: &mut Option<TextureHandle>,
    name: &str,
    image: egui::ColorImage,
) {
    match slot {
        Some(texture) => texture.set(image, TextureOptions::LINEAR),
        None => *slot = Some(ctx.load_texture(name, image, TextureOptions::LINEAR)),
    }
}

/// Largest size with the texture's aspect ratio that fits `available`
fn fit(texture: egui::Vec2, available: egui::Vec2) -> egui::Vec2 {
    if texture.x <= 0.0 || texture.y <= 0.0 {
        return egui::Vec2::ZERO;
    }
    let aspect = texture.x / texture.y;
    let mut width = available.x;
    let mut height = width / aspect;
    if height > available.y {
        height = available.y;
        width = height * aspect;
    }
    egui::vec2(width, height)
}

impl eframe::App for EmotionDetectorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        self.refresh(ctx);
        if let Some(message) = self.registration.poll() {
            self.notice = Some(message);
        }

        self.render_controls(ctx);
        egui::CentralPanel::default().show(ctx, |ui| self.render_view(ui));

        if self.session.is_running() || self.registration.is_busy() {
            ctx.request_repaint_after(self.config.session.frame_interval);
        }
    }
}
