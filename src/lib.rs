//! Live hand-sign alphabet recognition.
//!
//! Camera frames flow through [`pipeline::GesturePipeline`]: each frame is
//! normalized to RGBA, handed to a landmark detector, reduced to a 63-value
//! feature vector and classified into one of the alphabet letters. The newest
//! result lands in a single-slot mailbox that the overlay renderer drains.

pub mod config;
pub mod error;
#[cfg(feature = "model-download")]
pub mod model_download;
pub mod pipeline;
pub mod recorder;
pub mod types;
#[cfg(feature = "ui")]
pub mod ui;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{DetectorOptions, HandSelection, LabelTable, OverlayStyle, PipelineConfig};
pub use error::{ClassifierError, DecodeError, DetectorError, PipelineError};
pub use pipeline::{ClassifierFacade, GesturePipeline, RenderReceiver};
pub use types::{CycleId, FrameId, LandmarkSet, RawFrame, RenderState};
