// Survey view

use crate::models::EmotionState;
use crate::survey::{SurveyForm, SurveyLog, MAX_INTENSITY, MIN_INTENSITY};
use egui::Color32;

pub(super) struct SurveyView {
    log: SurveyLog,
    form: SurveyForm,
    message: Option<(String, bool)>,
}

impl SurveyView {
    pub(super) fn new(log: SurveyLog) -> Self {
        Self {
            log,
            form: SurveyForm::default(),
            message: None,
        }
    }

    pub(super) fn show(&mut self, ui: &mut egui::Ui) {
        ui.heading("Emotion survey");
        ui.add_space(10.0);

        egui::Grid::new("survey_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Name:");
                ui.text_edit_singleline(&mut self.form.name);
                ui.end_row();

                ui.label("Email:");
                ui.text_edit_singleline(&mut self.form.email);
                ui.end_row();

                ui.label("How do you feel?");
                ui.vertical(|ui| {
                    for choice in EmotionState::SURVEY_CHOICES {
                        ui.radio_value(&mut self.form.emotion, choice, choice.to_string());
                    }
                });
                ui.end_row();

                ui.label("Intensity:");
                ui.add(egui::Slider::new(
                    &mut self.form.intensity,
                    MIN_INTENSITY..=MAX_INTENSITY,
                ));
                ui.end_row();

                ui.label("Comment:");
                ui.add(egui::TextEdit::multiline(&mut self.form.comment).desired_rows(3));
                ui.end_row();
            });

        ui.add_space(10.0);
        if ui.button("Submit").clicked() {
            self.message = Some(match self.log.submit(&self.form) {
                Ok(record) => {
                    self.form = SurveyForm::default();
                    (format!("Thank you, {}!", record.name), true)
                }
                Err(e) => (e.to_string(), false),
            });
        }

        if let Some((text, ok)) = &self.message {
            let color = if *ok { Color32::LIGHT_GREEN } else { Color32::LIGHT_RED };
            ui.colored_label(color, text);
        }
    }
}
