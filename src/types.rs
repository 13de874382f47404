use std::{fmt, sync::Arc, time::Duration};

pub const NUM_KEYPOINTS: usize = 21;
pub const FEATURE_LEN: usize = NUM_KEYPOINTS * 3;

/// Identifier handed out by the camera layer for each delivered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

/// Monotonic number stamped on every frame the pipeline accepts.
///
/// A detection cycle keeps its number from frame acceptance through
/// dispatch, which lets the dispatcher discard results that complete out of
/// order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(pub u64);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Three-plane YUV 4:2:0 (Y, U, V), chroma planes may be interleaved
    /// through their pixel stride.
    Yuv420,
    Nv12,
    Nv21,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
    Rgba,
}

#[derive(Clone, Debug)]
pub struct Plane {
    pub data: Vec<u8>,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn packed(data: Vec<u8>, row_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride: 1,
        }
    }
}

/// Receives frames back from the pipeline once it is done with them.
pub trait FramePool: Send + Sync {
    fn release(&self, id: FrameId);
}

/// Sensor-plane data for a single camera frame.
///
/// The frame is returned to its pool exactly once, when it is dropped. Every
/// path through the pipeline (processed, dropped under load, failed to decode)
/// ends with the frame going out of scope, so no path can forget to release
/// it.
pub struct RawFrame {
    id: FrameId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub timestamp: Duration,
    pool: Option<Arc<dyn FramePool>>,
}

impl RawFrame {
    pub fn new(
        id: FrameId,
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
        timestamp: Duration,
    ) -> Self {
        Self {
            id,
            width,
            height,
            format,
            planes,
            timestamp,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: Arc<dyn FramePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.planes.iter().all(|plane| plane.data.is_empty())
    }

    /// Hands the frame back to its pool now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(self.id);
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Decoded RGBA8 image built from exactly one raw frame.
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    /// Maps a right-hand probability to a side; `None` or NaN is unknown.
    pub fn from_score(score: Option<f32>) -> Self {
        match score {
            Some(score) if score >= 0.5 => Handedness::Right,
            Some(score) if score >= 0.0 => Handedness::Left,
            _ => Handedness::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hand {
    pub keypoints: Vec<Keypoint>,
    pub handedness: Handedness,
    pub score: f32,
}

impl Hand {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self {
            keypoints,
            handedness: Handedness::Unknown,
            score: 1.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.keypoints.len() == NUM_KEYPOINTS
    }
}

/// Hands found in one image, in detector order, coordinates normalized to
/// the image size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    pub hands: Vec<Hand>,
}

impl LandmarkSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_hands(hands: Vec<Hand>) -> Self {
        Self { hands }
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub probabilities: Vec<f32>,
    pub index: usize,
    pub label: String,
}

impl ClassificationResult {
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.index).copied().unwrap_or(0.0)
    }
}

/// Landmarks and the label computed from them, always from the same cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizedGesture {
    pub landmarks: LandmarkSet,
    pub classification: ClassificationResult,
}

/// What the rendering thread shows: either nothing, or a consistent
/// landmarks + label pair.
#[derive(Clone, Debug)]
pub struct RenderState {
    pub cycle: CycleId,
    pub gesture: Option<RecognizedGesture>,
    /// Image the landmarks were detected on, used as the preview backdrop.
    pub backdrop: Option<Arc<NormalizedImage>>,
}

impl RenderState {
    pub fn cleared(cycle: CycleId, backdrop: Option<Arc<NormalizedImage>>) -> Self {
        Self {
            cycle,
            gesture: None,
            backdrop,
        }
    }

    pub fn recognized(
        cycle: CycleId,
        landmarks: LandmarkSet,
        classification: ClassificationResult,
        backdrop: Option<Arc<NormalizedImage>>,
    ) -> Self {
        Self {
            cycle,
            gesture: Some(RecognizedGesture {
                landmarks,
                classification,
            }),
            backdrop,
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.gesture.is_none()
    }

    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        self.gesture.as_ref().map(|g| &g.landmarks)
    }

    pub fn label(&self) -> Option<&str> {
        self.gesture
            .as_ref()
            .map(|g| g.classification.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingPool {
        released: Mutex<Vec<FrameId>>,
    }

    impl FramePool for RecordingPool {
        fn release(&self, id: FrameId) {
            self.released.lock().unwrap().push(id);
        }
    }

    fn frame(pool: &Arc<RecordingPool>, id: u64) -> RawFrame {
        RawFrame::new(
            FrameId(id),
            2,
            2,
            PixelFormat::Gray,
            vec![Plane::packed(vec![0; 4], 2)],
            Duration::ZERO,
        )
        .with_pool(pool.clone())
    }

    #[test]
    fn drop_returns_frame_to_pool_once() {
        let pool = Arc::new(RecordingPool::default());
        {
            let _frame = frame(&pool, 7);
        }
        frame(&pool, 8).release();
        assert_eq!(*pool.released.lock().unwrap(), vec![FrameId(7), FrameId(8)]);
    }

    #[test]
    fn frame_without_planes_is_empty() {
        let frame = RawFrame::new(
            FrameId(1),
            640,
            480,
            PixelFormat::Nv21,
            Vec::new(),
            Duration::ZERO,
        );
        assert!(frame.is_empty());
    }

    #[test]
    fn handedness_thresholds() {
        assert_eq!(Handedness::from_score(Some(0.9)), Handedness::Right);
        assert_eq!(Handedness::from_score(Some(0.2)), Handedness::Left);
        assert_eq!(Handedness::from_score(Some(0.0)), Handedness::Left);
        assert_eq!(Handedness::from_score(Some(f32::NAN)), Handedness::Unknown);
        assert_eq!(Handedness::from_score(None), Handedness::Unknown);
    }
}
