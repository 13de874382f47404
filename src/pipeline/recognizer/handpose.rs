use std::{
    path::{Path, PathBuf},
    thread,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{common, recv_latest};
use crate::{
    config::DetectorOptions,
    error::DetectorError,
    pipeline::detector::{DetectionRequest, DetectionResponse, LandmarkCallback, LandmarkDetector},
    types::{Hand, Handedness, LandmarkSet, NormalizedImage},
};

/// MediaPipe handpose estimator run on the whole letterboxed frame.
///
/// Inference runs on a dedicated worker thread. Only the newest request is
/// kept while the worker is busy, and the model reports at most one hand.
pub struct OrtHandposeDetector {
    model_path: PathBuf,
    intra_threads: usize,
    tx: Option<Sender<DetectionRequest>>,
    evict_rx: Option<Receiver<DetectionRequest>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl OrtHandposeDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads: 2,
            tx: None,
            evict_rx: None,
            worker: None,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }
}

impl LandmarkDetector for OrtHandposeDetector {
    fn setup(
        &mut self,
        options: &DetectorOptions,
        callback: LandmarkCallback,
    ) -> Result<(), DetectorError> {
        let engine = OrtEngine::new(&self.model_path, self.intra_threads, options.min_presence)
            .map_err(|err| DetectorError::Backend(err.into()))?;
        log::info!(
            "handpose ORT backend ready using {}",
            self.model_path.display()
        );

        let (tx, rx) = bounded::<DetectionRequest>(1);
        let evict_rx = rx.clone();
        let worker = thread::Builder::new()
            .name("handpose-worker".into())
            .spawn(move || run_worker_loop(engine, rx, callback))
            .map_err(|err| DetectorError::Backend(Box::new(err)))?;

        self.tx = Some(tx);
        self.evict_rx = Some(evict_rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn submit(&mut self, request: DetectionRequest) {
        let (Some(tx), Some(evict_rx)) = (&self.tx, &self.evict_rx) else {
            log::debug!("handpose worker not running, dropping {}", request.cycle);
            return;
        };

        match tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                if let Ok(stale) = evict_rx.try_recv() {
                    log::debug!("cycle {}: superseded before inference", stale.cycle);
                }
                let _ = tx.try_send(request);
            }
            Err(TrySendError::Disconnected(request)) => {
                log::warn!("cycle {}: handpose worker exited", request.cycle);
            }
        }
    }

    fn release(&mut self) {
        self.tx.take();
        self.evict_rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for OrtHandposeDetector {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker_loop(
    mut engine: OrtEngine,
    rx: Receiver<DetectionRequest>,
    callback: LandmarkCallback,
) {
    while let Some(request) = recv_latest(&rx) {
        let landmarks = engine.detect(&request.image).unwrap_or_else(|err| {
            log::warn!("cycle {}: handpose inference failed: {err:?}", request.cycle);
            LandmarkSet::empty()
        });
        callback(DetectionResponse {
            cycle: request.cycle,
            timestamp: request.timestamp,
            landmarks,
            image: request.image,
        });
    }
    log::debug!("handpose worker stopped");
}

struct OrtEngine {
    session: Session,
    min_presence: f32,
}

impl OrtEngine {
    fn new(model_path: &Path, intra_threads: usize, min_presence: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        Ok(Self {
            session,
            min_presence,
        })
    }

    fn detect(&mut self, image: &NormalizedImage) -> Result<LandmarkSet> {
        let (input, letterbox) = common::prepare_letterbox(image, common::INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let first_scalar = |idx: usize| -> Option<f32> {
            if outputs.len() <= idx {
                return None;
            }
            outputs[idx]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
        };
        let confidence = first_scalar(1)
            .filter(|score| score.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let handedness = first_scalar(2);

        if confidence < self.min_presence {
            return Ok(LandmarkSet::empty());
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened)?;

        Ok(LandmarkSet::with_hands(vec![Hand {
            keypoints: common::unletterbox(&landmarks, &letterbox),
            handedness: Handedness::from_score(handedness),
            score: confidence,
        }]))
    }
}
