// Satisfaction survey appended to a CSV log

use crate::error::{EmotionDetectorError, Result};
use crate::models::EmotionState;
use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 10;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the user typed into the survey form
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyForm {
    pub name: String,
    pub email: String,
    pub emotion: EmotionState,
    pub intensity: u8,
    pub comment: String,
}

impl Default for SurveyForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            emotion: EmotionState::Happy,
            intensity: 5,
            comment: String::new(),
        }
    }
}

/// One row of the survey log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyRecord {
    #[serde(rename = "timestamp")]
    pub timestamp: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "email")]
    pub email: String,
    #[serde(rename = "emocion")]
    pub emotion: EmotionState,
    #[serde(rename = "intensidad")]
    pub intensity: u8,
    #[serde(rename = "comentario")]
    pub comment: String,
}

impl SurveyForm {
    /// Validates the form and builds the row to store
    pub fn to_record(&self, timestamp: String) -> Result<SurveyRecord> {
        let name = self.name.trim();
        let email = self.email.trim();
        if name.is_empty() || email.is_empty() {
            return Err(EmotionDetectorError::InvalidInput(
                "Name and email are required".to_string(),
            ));
        }
        Ok(SurveyRecord {
            timestamp,
            name: name.to_string(),
            email: email.to_string(),
            emotion: self.emotion,
            intensity: self.intensity.clamp(MIN_INTENSITY, MAX_INTENSITY),
            comment: self.comment.trim().to_string(),
        })
    }
}

/// Append-only CSV log of survey answers
pub struct SurveyLog {
    path: PathBuf,
}

impl SurveyLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validates and appends one answer. Nothing is written on rejection.
    pub fn submit(&self, form: &SurveyForm) -> Result<SurveyRecord> {
        let record = form.to_record(Local::now().format(TIMESTAMP_FORMAT).to_string())?;
        self.append(&record)?;
        info!("Survey answer saved for {}", record.name);
        Ok(record)
    }

    fn append(&self, record: &SurveyRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let needs_header = std::fs::metadata(&self.path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
