use std::sync::{Arc, Mutex, PoisonError};

use super::{
    classifier::ClassifierFacade,
    detector::{DetectionResponse, DetectorFacade, SubmitOutcome},
    dispatcher::ResultDispatcher,
    features::FeatureBuilder,
    frame_source::FrameHandler,
    normalizer,
    stats::PipelineStats,
};
use crate::{
    recorder::LandmarkRecorder,
    types::{CycleId, RawFrame, RenderState},
};

/// Everything that runs after landmarks come back: feature building,
/// classification and dispatch to the renderer.
///
/// Runs on the detector's callback thread.
pub struct InferenceStage {
    builder: FeatureBuilder,
    classifier: Mutex<ClassifierFacade>,
    dispatcher: ResultDispatcher,
    stats: Arc<PipelineStats>,
    recorder: Option<Mutex<LandmarkRecorder>>,
}

impl InferenceStage {
    pub fn new(
        builder: FeatureBuilder,
        classifier: ClassifierFacade,
        dispatcher: ResultDispatcher,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            builder,
            classifier: Mutex::new(classifier),
            dispatcher,
            stats,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: LandmarkRecorder) -> Self {
        self.recorder = Some(Mutex::new(recorder));
        self
    }

    pub fn on_landmarks(&self, response: DetectionResponse) {
        let DetectionResponse {
            cycle,
            landmarks,
            image,
            ..
        } = response;

        let mut classifier = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !classifier.is_available() {
            log::debug!("cycle {cycle}: pipeline torn down, ignoring landmarks");
            return;
        }

        if let Some(recorder) = &self.recorder {
            let mut recorder = recorder.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = recorder.record(&landmarks) {
                log::warn!("failed to record landmarks: {err}");
            }
        }

        let features = self.builder.build(&landmarks);
        let Some(hand) = features.as_hand() else {
            drop(classifier);
            log::trace!("cycle {cycle}: landmarks absent");
            self.stats.no_hand();
            self.dispatcher.dispatch(RenderState::cleared(cycle, Some(image)));
            return;
        };

        log::trace!(
            "cycle {cycle}: landmarks present ({} hands)",
            landmarks.hands.len()
        );
        let classification = classifier.classify(hand);
        drop(classifier);

        let state = match classification {
            Some(classification) => {
                log::trace!("cycle {cycle}: classified as {}", classification.label);
                self.stats.classified();
                RenderState::recognized(cycle, landmarks, classification, Some(image))
            }
            None => RenderState::cleared(cycle, Some(image)),
        };
        self.dispatcher.dispatch(state);
    }

    /// A frame that could not be decoded still ends its cycle with a clear.
    pub fn on_decode_failure(&self, cycle: CycleId) {
        self.dispatcher.dispatch(RenderState::cleared(cycle, None));
    }

    pub fn teardown(&self) {
        self.classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .teardown();
    }
}

/// Frame-source handler: normalizes the accepted frame, releases it, and
/// hands the image to the detector.
pub struct FrameAnalyzer {
    detector: Arc<DetectorFacade>,
    stage: Arc<InferenceStage>,
    stats: Arc<PipelineStats>,
}

impl FrameAnalyzer {
    pub fn new(
        detector: Arc<DetectorFacade>,
        stage: Arc<InferenceStage>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            detector,
            stage,
            stats,
        }
    }
}

impl FrameHandler for FrameAnalyzer {
    fn handle(&mut self, cycle: CycleId, frame: RawFrame) {
        let timestamp = frame.timestamp;
        let normalized = normalizer::normalize(&frame);
        frame.release();

        match normalized {
            Ok(image) => {
                log::trace!("cycle {cycle}: normalized {}x{}", image.width, image.height);
                match self.detector.submit(cycle, image, timestamp) {
                    SubmitOutcome::Submitted => self.stats.submitted(),
                    SubmitOutcome::Unavailable => self.stats.submit_unavailable(),
                }
            }
            Err(err) => {
                log::warn!("cycle {cycle}: dropping frame: {err}");
                self.stats.decode_failed();
                self.stage.on_decode_failure(cycle);
            }
        }
    }
}
