mod cli;

use clap::Parser;
use cli::Args;
use emotion_detector::camera::list_devices;
use emotion_detector::config::AppConfig;
use emotion_detector::detector::negotiate;
use emotion_detector::error::{EmotionDetectorError, Result};
use emotion_detector::identity::IdentityMatcher;
use emotion_detector::pipeline::FramePipeline;
use emotion_detector::render::Renderer;
use emotion_detector::session::DetectionSession;
use emotion_detector::smoothing::EmotionHistory;
use emotion_detector::ui::EmotionDetectorApp;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system (file only, no console output)
fn init_logging(log_file: &Path) -> Result<()> {
    let log_file = std::fs::File::create(log_file).map_err(EmotionDetectorError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(feature = "onnx")]
fn build_identity(
    config: &AppConfig,
    detector: &mut dyn emotion_detector::detector::Detector,
) -> Option<IdentityMatcher> {
    use emotion_detector::identity::{Gallery, OnnxFaceEncoder};

    if !config.identity.enabled {
        return None;
    }
    let model = config.embedding_model();
    if !model.is_file() {
        info!("No embedding model at {}, face recognition disabled", model.display());
        return None;
    }
    let mut encoder = match OnnxFaceEncoder::new(&model) {
        Ok(encoder) => encoder,
        Err(e) => {
            error!("Face recognition disabled: {}", e);
            return None;
        }
    };
    let gallery = match Gallery::load(&config.users_dir(), &mut encoder, detector) {
        Ok(gallery) => gallery,
        Err(e) => {
            error!("Failed to load registered users: {}", e);
            Gallery::new()
        }
    };
    Some(IdentityMatcher::new(
        gallery,
        Box::new(encoder),
        config.identity.clone(),
    ))
}

#[cfg(not(feature = "onnx"))]
fn build_identity(
    _config: &AppConfig,
    _detector: &mut dyn emotion_detector::detector::Detector,
) -> Option<IdentityMatcher> {
    info!("Built without ONNX support, face recognition disabled");
    None
}

fn build_pipeline(config: &AppConfig) -> FramePipeline {
    let mut negotiated = negotiate(config);
    let identity = build_identity(config, negotiated.detector.as_mut());
    let renderer = Renderer::load(&config.emoji_dir(), &config.font_file());

    let pipeline = FramePipeline::new(
        negotiated.detector,
        negotiated.capability,
        EmotionHistory::new(config.smoothing.window),
        renderer,
    );
    match identity {
        Some(identity) => pipeline.with_identity(identity),
        None => pipeline,
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.list_cameras {
        let devices = list_devices()?;
        if devices.is_empty() {
            println!("No cameras found");
        }
        for (index, name) in devices.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let mut config = AppConfig::from_env_with(args.data_dir.clone())?;
    args.apply(&mut config)?;
    init_logging(&config.log_file)?;
    info!("Data directory: {}", config.data_dir.display());
    config.ensure_layout()?;

    let pipeline = Arc::new(Mutex::new(build_pipeline(&config)));
    let session = DetectionSession::new(pipeline, config.session.clone());

    let result = eframe::run_native(
        "Emotion Detector",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1100.0, 640.0])
                .with_title("Emotion Detection System"),
            ..Default::default()
        },
        Box::new(move |_cc| Ok(Box::new(EmotionDetectorApp::new(config, session)))),
    );

    if let Err(e) = result {
        error!("Application error: {}", e);
    }

    Ok(())
}
