#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gpui::Application;
use isl_translator::{
    ClassifierFacade, DetectorOptions, GesturePipeline, HandSelection, LabelTable, OverlayStyle,
    PipelineConfig,
    model_download::{default_handpose_model_path, ensure_handpose_model_ready},
    pipeline::{
        available_cameras,
        recognizer::{OrtHandposeDetector, OrtModelLoader},
        start_camera_stream,
    },
    ui::{self, ViewerSession},
};
use nokhwa::utils::CameraIndex;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HandChoice {
    First,
    MostConfident,
}

impl From<HandChoice> for HandSelection {
    fn from(choice: HandChoice) -> Self {
        match choice {
            HandChoice::First => HandSelection::First,
            HandChoice::MostConfident => HandSelection::MostConfident,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "isl-translator", version, about = "Live hand-sign alphabet recognition")]
struct Args {
    /// Camera index to open.
    #[arg(short, long, default_value_t = 0)]
    camera: u32,

    /// Hand landmark model; downloaded on first run when missing.
    #[arg(long)]
    handpose_model: Option<PathBuf>,

    /// ONNX gesture classifier taking 63 features.
    #[arg(long)]
    classifier_model: PathBuf,

    /// Label file, one class per line. Defaults to A-Z.
    #[arg(long)]
    labels: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    max_hands: usize,

    #[arg(long, default_value_t = 0.2)]
    min_presence: f32,

    /// Which detected hand is classified.
    #[arg(long, value_enum, default_value_t = HandChoice::First)]
    hand: HandChoice,

    /// Flip the view horizontally.
    #[arg(long)]
    mirror: bool,

    /// Append detected landmarks to this CSV file.
    #[arg(long)]
    landmark_log: Option<PathBuf>,

    /// ONNX Runtime intra-op threads for each model.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Print the available cameras and exit.
    #[arg(long)]
    list_cameras: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_cameras {
        for device in available_cameras().context("failed to query cameras")? {
            println!("{}: {}", device.index, device.label);
        }
        return Ok(());
    }

    let handpose_path = args
        .handpose_model
        .clone()
        .unwrap_or_else(default_handpose_model_path);
    ensure_handpose_model_ready(&handpose_path, |event| log::debug!("model download: {event:?}"))?;

    let labels = match &args.labels {
        Some(path) => LabelTable::load(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?,
        None => LabelTable::alphabet(),
    };
    let model_bytes = fs::read(&args.classifier_model).with_context(|| {
        format!(
            "failed to read classifier model {}",
            args.classifier_model.display()
        )
    })?;
    let loader = OrtModelLoader::with_intra_threads(args.threads);
    let classifier = ClassifierFacade::load(&loader, &model_bytes, labels)
        .context("failed to load gesture classifier")?;
    log::info!(
        "classifying into {} labels, first {:?}",
        classifier.labels().len(),
        classifier.labels().get(0)
    );

    let config = PipelineConfig {
        detector: DetectorOptions {
            max_hands: args.max_hands,
            min_presence: args.min_presence,
            ..DetectorOptions::default()
        },
        hand_selection: args.hand.into(),
        landmark_log: args.landmark_log.clone(),
    };
    let (pipeline, receiver) = GesturePipeline::setup(
        config,
        Box::new(OrtHandposeDetector::new(handpose_path).with_intra_threads(args.threads)),
        classifier,
    )
    .context("failed to start gesture pipeline")?;

    let frames = pipeline
        .frame_source()
        .context("gesture pipeline has no frame source")?;
    let camera = start_camera_stream(CameraIndex::Index(args.camera), frames)?;

    let session = ViewerSession {
        camera: Some(camera),
        pipeline,
        receiver,
        style: OverlayStyle {
            mirror: args.mirror,
            ..OverlayStyle::default()
        },
    };

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_viewer(app, session) {
                eprintln!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
