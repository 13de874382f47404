#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod classifier;
pub mod detector;
pub mod dispatcher;
pub mod features;
pub mod frame_source;
pub mod inference;
pub mod normalizer;
#[cfg(feature = "backend-ort")]
pub mod recognizer;
pub mod skeleton;
pub mod stats;

use std::sync::Arc;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, available_cameras, start_camera_stream};
pub use classifier::{ClassifierFacade, GestureModel, GestureModelLoader, arg_max};
pub use detector::{
    DetectionRequest, DetectionResponse, DetectorFacade, LandmarkCallback, LandmarkDetector,
    SubmitOutcome,
};
pub use dispatcher::{DispatchOutcome, RenderReceiver, ResultDispatcher};
pub use features::{FeatureBuilder, FeatureVector, HandFeatures};
pub use frame_source::{FrameDisposition, FrameHandler, FrameSource, FrameSourceHandle};
pub use normalizer::normalize;
pub use skeleton::{
    CanvasSurface, HAND_CONNECTIONS, Overlay, OverlayRenderer, RenderSurface, Viewport, compose,
    render,
};
pub use stats::{PipelineStats, StatsSnapshot};

use crate::{config::PipelineConfig, error::PipelineError, recorder::LandmarkRecorder};
use inference::{FrameAnalyzer, InferenceStage};

/// Owns every stage of a running recognizer, from frame intake to the render
/// mailbox.
///
/// Built with [`GesturePipeline::setup`] and torn down with
/// [`GesturePipeline::teardown`] (or on drop). After teardown, frames are
/// released without processing and late detector callbacks are ignored.
pub struct GesturePipeline {
    source: Option<FrameSource>,
    detector: Arc<DetectorFacade>,
    stage: Arc<InferenceStage>,
    stats: Arc<PipelineStats>,
}

impl GesturePipeline {
    pub fn setup(
        config: PipelineConfig,
        detector: Box<dyn LandmarkDetector>,
        classifier: ClassifierFacade,
    ) -> Result<(Self, RenderReceiver), PipelineError> {
        let stats = Arc::new(PipelineStats::default());
        let (dispatcher, receiver) = dispatcher::with_stats(Some(stats.clone()));

        let mut stage = InferenceStage::new(
            FeatureBuilder::new(config.hand_selection),
            classifier,
            dispatcher,
            stats.clone(),
        );
        if let Some(path) = &config.landmark_log {
            let recorder = LandmarkRecorder::open(path).map_err(PipelineError::Recorder)?;
            stage = stage.with_recorder(recorder);
        }
        let stage = Arc::new(stage);

        let callback_stage = stage.clone();
        let detector = Arc::new(DetectorFacade::setup(
            detector,
            &config.detector,
            Arc::new(move |response: DetectionResponse| callback_stage.on_landmarks(response)),
        )?);

        let analyzer = FrameAnalyzer::new(detector.clone(), stage.clone(), stats.clone());
        let source = match FrameSource::start(analyzer, stats.clone()) {
            Ok(source) => source,
            Err(err) => {
                detector.teardown();
                stage.teardown();
                return Err(PipelineError::Spawn(err));
            }
        };

        log::info!("gesture pipeline running");
        Ok((
            Self {
                source: Some(source),
                detector,
                stage,
                stats,
            },
            receiver,
        ))
    }

    /// Handle for the camera's frame-delivery thread.
    pub fn frame_source(&self) -> Option<FrameSourceHandle> {
        self.source.as_ref().map(FrameSource::handle)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        source.stop();
        self.detector.teardown();
        self.stage.teardown();
        log::info!("gesture pipeline stopped: {:?}", self.stats.snapshot());
    }
}

impl Drop for GesturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
