use thiserror::Error;

use crate::{config::RunningMode, types::PixelFormat};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame has no backing data")]
    EmptyFrame,
    #[error("{format:?} frame needs {expected} planes, got {got}")]
    PlaneCount {
        format: PixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("{format:?} plane {plane} too small: got {got}, expected {expected}")]
    PlaneTooSmall {
        format: PixelFormat,
        plane: usize,
        got: usize,
        expected: usize,
    },
    #[error("{format:?} conversion failed: {reason}")]
    Conversion { format: PixelFormat, reason: String },
    #[error("decode produced zero bytes")]
    ZeroBytes,
    #[error("decoded image is {got_width}x{got_height}, frame is {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("landmark detector only supports live-stream mode, got {0:?}")]
    UnsupportedMode(RunningMode),
    #[error("max_hands must be 1 or 2, got {0}")]
    InvalidMaxHands(usize),
    #[error("landmark detector backend failed")]
    Backend(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("gesture classifier is not loaded or already released")]
    Unavailable,
    #[error("classifier returned no output rows")]
    EmptyOutput,
    #[error("classifier returned {got} scores, label table has {expected}")]
    ClassCount { expected: usize, got: usize },
    #[error("gesture classifier backend failed")]
    Backend(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("label table is empty")]
    EmptyLabels,
    #[error("failed to read label table")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("failed to start pipeline worker")]
    Spawn(#[source] std::io::Error),
    #[error("failed to open landmark recorder")]
    Recorder(#[source] std::io::Error),
}
