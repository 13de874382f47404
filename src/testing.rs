//! Deterministic stand-ins for the camera, the landmark model and the gesture
//! model.
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]`. Frames built
//! here report back to a [`CountingPool`], so tests can assert that every
//! frame was released exactly once.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Sender, unbounded};

use crate::{
    config::DetectorOptions,
    error::{ClassifierError, DetectorError},
    pipeline::{
        classifier::{GestureModel, GestureModelLoader},
        detector::{DetectionRequest, DetectionResponse, LandmarkCallback, LandmarkDetector},
    },
    types::{
        CycleId, FrameId, FramePool, Hand, Handedness, Keypoint, LandmarkSet, NormalizedImage,
        PixelFormat, Plane, RawFrame,
    },
};

/// Initialise `env_logger` for tests. Safe to call more than once.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
struct PoolState {
    next_id: AtomicU64,
    issued: Mutex<Vec<FrameId>>,
    releases: Mutex<HashMap<FrameId, usize>>,
}

impl FramePool for PoolState {
    fn release(&self, id: FrameId) {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(id)
            .or_default() += 1;
    }
}

/// Frame factory that counts how often each frame is released.
#[derive(Clone, Default)]
pub struct CountingPool {
    state: Arc<PoolState>,
}

impl CountingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
    ) -> RawFrame {
        let id = FrameId(self.state.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.issued.lock().unwrap().push(id);
        let timestamp = Duration::from_millis(id.0 * 33);
        RawFrame::new(id, width, height, format, planes, timestamp).with_pool(self.state.clone())
    }

    pub fn empty_frame(&self) -> RawFrame {
        self.frame(0, 0, PixelFormat::Nv21, Vec::new())
    }

    pub fn rgba_frame(&self, width: u32, height: u32, color: [u8; 4]) -> RawFrame {
        let data = color.repeat(width as usize * height as usize);
        self.frame(
            width,
            height,
            PixelFormat::Rgba,
            vec![Plane::packed(data, width as usize * 4)],
        )
    }

    /// Three-plane 4:2:0 frame with constant luma and neutral chroma.
    pub fn yuv420_frame(&self, width: u32, height: u32, luma: u8) -> RawFrame {
        let (cw, ch) = (width.div_ceil(2) as usize, height.div_ceil(2) as usize);
        self.frame(
            width,
            height,
            PixelFormat::Yuv420,
            vec![
                Plane::packed(vec![luma; width as usize * height as usize], width as usize),
                Plane::packed(vec![128; cw * ch], cw),
                Plane::packed(vec![128; cw * ch], cw),
            ],
        )
    }

    /// A 4:2:0 frame whose chroma planes are cut short, so decoding fails.
    pub fn truncated_yuv420_frame(&self, width: u32, height: u32) -> RawFrame {
        self.frame(
            width,
            height,
            PixelFormat::Yuv420,
            vec![
                Plane::packed(vec![16; width as usize * height as usize], width as usize),
                Plane::packed(vec![128; 1], 1),
                Plane::packed(vec![128; 1], 1),
            ],
        )
    }

    pub fn issued(&self) -> usize {
        self.state.issued.lock().unwrap().len()
    }

    pub fn released(&self) -> usize {
        self.state.releases.lock().unwrap().values().sum()
    }

    pub fn release_count(&self, id: FrameId) -> usize {
        self.state
            .releases
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    #[track_caller]
    pub fn assert_all_released_once(&self) {
        for id in self.state.issued.lock().unwrap().iter() {
            assert_eq!(
                self.release_count(*id),
                1,
                "frame {id:?} released wrong number of times"
            );
        }
        assert_eq!(self.released(), self.issued());
    }
}

pub fn solid_image(width: u32, height: u32) -> NormalizedImage {
    NormalizedImage {
        rgba: [90, 120, 150, 255].repeat(width as usize * height as usize),
        width,
        height,
        timestamp: Duration::ZERO,
    }
}

/// A right hand held up with all five fingers extended, in normalized image
/// coordinates.
pub fn open_palm_hand() -> Hand {
    const POINTS: [(f32, f32, f32); 21] = [
        (0.50, 0.80, 0.00),
        (0.42, 0.74, -0.02),
        (0.36, 0.67, -0.03),
        (0.31, 0.61, -0.04),
        (0.27, 0.56, -0.05),
        (0.44, 0.58, -0.01),
        (0.42, 0.47, -0.02),
        (0.41, 0.40, -0.03),
        (0.40, 0.34, -0.03),
        (0.50, 0.57, -0.01),
        (0.50, 0.45, -0.02),
        (0.50, 0.37, -0.03),
        (0.50, 0.31, -0.03),
        (0.56, 0.58, -0.01),
        (0.57, 0.47, -0.02),
        (0.58, 0.40, -0.03),
        (0.59, 0.35, -0.03),
        (0.62, 0.61, -0.01),
        (0.65, 0.53, -0.02),
        (0.67, 0.48, -0.03),
        (0.69, 0.43, -0.03),
    ];
    Hand {
        keypoints: POINTS
            .iter()
            .map(|&(x, y, z)| Keypoint::new(x, y, z))
            .collect(),
        handedness: Handedness::Right,
        score: 0.97,
    }
}

pub fn open_palm_landmarks() -> LandmarkSet {
    LandmarkSet::with_hands(vec![open_palm_hand()])
}

#[derive(Default)]
struct ManualState {
    set_up: bool,
    callback: Option<LandmarkCallback>,
    pending: Vec<DetectionRequest>,
    submitted: Vec<CycleId>,
    releases: usize,
}

/// Detector that records submissions and only answers when told to.
pub struct ManualDetector {
    state: Arc<Mutex<ManualState>>,
}

/// Test-side view of a [`ManualDetector`].
#[derive(Clone)]
pub struct DetectorProbe {
    state: Arc<Mutex<ManualState>>,
}

impl ManualDetector {
    pub fn new() -> (Self, DetectorProbe) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (
            Self {
                state: state.clone(),
            },
            DetectorProbe { state },
        )
    }
}

impl LandmarkDetector for ManualDetector {
    fn setup(
        &mut self,
        _options: &DetectorOptions,
        callback: LandmarkCallback,
    ) -> Result<(), DetectorError> {
        let mut state = self.state.lock().unwrap();
        state.set_up = true;
        state.callback = Some(callback);
        Ok(())
    }

    fn submit(&mut self, request: DetectionRequest) {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(request.cycle);
        state.pending.push(request);
    }

    fn release(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.releases += 1;
        state.callback = None;
        state.pending.clear();
    }
}

impl DetectorProbe {
    pub fn is_set_up(&self) -> bool {
        self.state.lock().unwrap().set_up
    }

    pub fn submitted_cycles(&self) -> Vec<CycleId> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn pending_cycles(&self) -> Vec<CycleId> {
        self.state
            .lock()
            .unwrap()
            .pending
            .iter()
            .map(|r| r.cycle)
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    /// Answers the pending request for `cycle` with `landmarks`, on the
    /// calling thread. Returns false if no such request is pending.
    pub fn fire(&self, cycle: CycleId, landmarks: LandmarkSet) -> bool {
        let (request, callback) = {
            let mut state = self.state.lock().unwrap();
            let Some(pos) = state.pending.iter().position(|r| r.cycle == cycle) else {
                return false;
            };
            let Some(callback) = state.callback.clone() else {
                return false;
            };
            (state.pending.remove(pos), callback)
        };
        callback(DetectionResponse {
            cycle: request.cycle,
            timestamp: request.timestamp,
            landmarks,
            image: request.image,
        });
        true
    }
}

/// Detector that answers every request with the same landmarks from its own
/// worker thread.
pub struct EchoDetector {
    landmarks: LandmarkSet,
    tx: Option<Sender<DetectionRequest>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl EchoDetector {
    pub fn new(landmarks: LandmarkSet) -> Self {
        Self {
            landmarks,
            tx: None,
            worker: None,
        }
    }
}

impl LandmarkDetector for EchoDetector {
    fn setup(
        &mut self,
        _options: &DetectorOptions,
        callback: LandmarkCallback,
    ) -> Result<(), DetectorError> {
        let (tx, rx) = unbounded::<DetectionRequest>();
        let landmarks = self.landmarks.clone();
        let worker = thread::Builder::new()
            .name("echo-detector".into())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    callback(DetectionResponse {
                        cycle: request.cycle,
                        timestamp: request.timestamp,
                        landmarks: landmarks.clone(),
                        image: request.image,
                    });
                }
            })
            .map_err(|err| DetectorError::Backend(Box::new(err)))?;
        self.tx = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn submit(&mut self, request: DetectionRequest) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(request);
        }
    }

    fn release(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[derive(Default)]
struct ModelState {
    calls: usize,
    last_input: Option<Vec<f32>>,
}

/// Gesture model returning the same scores for every input.
pub struct ScriptedModel {
    scores: Vec<f32>,
    state: Arc<Mutex<ModelState>>,
}

#[derive(Clone)]
pub struct ModelProbe {
    state: Arc<Mutex<ModelState>>,
}

impl ScriptedModel {
    pub fn new(scores: Vec<f32>) -> (Self, ModelProbe) {
        let state = Arc::new(Mutex::new(ModelState::default()));
        (
            Self {
                scores,
                state: state.clone(),
            },
            ModelProbe { state },
        )
    }
}

impl GestureModel for ScriptedModel {
    fn infer(
        &mut self,
        features: &[f32],
        _num_classes: usize,
    ) -> Result<Vec<Vec<f32>>, ClassifierError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.last_input = Some(features.to_vec());
        Ok(vec![self.scores.clone()])
    }
}

impl ModelProbe {
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn last_input(&self) -> Option<Vec<f32>> {
        self.state.lock().unwrap().last_input.clone()
    }
}

/// Loader that ignores the model bytes and hands out a [`ScriptedModel`].
pub struct ScriptedLoader {
    pub scores: Vec<f32>,
}

impl GestureModelLoader for ScriptedLoader {
    type Model = ScriptedModel;

    fn load(&self, model_bytes: &[u8]) -> Result<Self::Model, ClassifierError> {
        if model_bytes.is_empty() {
            return Err(ClassifierError::Backend("empty model".into()));
        }
        Ok(ScriptedModel::new(self.scores.clone()).0)
    }
}
