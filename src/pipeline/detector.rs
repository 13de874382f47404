use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{
    config::{DetectorOptions, RunningMode},
    error::DetectorError,
    types::{CycleId, LandmarkSet, NormalizedImage},
};

#[derive(Clone, Debug)]
pub struct DetectionRequest {
    pub cycle: CycleId,
    pub timestamp: Duration,
    pub image: Arc<NormalizedImage>,
}

#[derive(Clone, Debug)]
pub struct DetectionResponse {
    pub cycle: CycleId,
    pub timestamp: Duration,
    pub landmarks: LandmarkSet,
    pub image: Arc<NormalizedImage>,
}

/// Invoked by the detector, on a thread the detector owns, once per finished
/// request.
pub type LandmarkCallback = Arc<dyn Fn(DetectionResponse) + Send + Sync>;

/// An asynchronous hand landmark model.
///
/// `submit` must return without waiting for inference. Results come back
/// through the callback registered in `setup`; a request may be skipped when
/// newer ones arrive, and callbacks may fire in any order.
pub trait LandmarkDetector: Send {
    fn setup(
        &mut self,
        options: &DetectorOptions,
        callback: LandmarkCallback,
    ) -> Result<(), DetectorError>;

    fn submit(&mut self, request: DetectionRequest);

    /// Stops inference and frees the model. No callbacks fire afterwards.
    fn release(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    Unavailable,
}

/// Owns a set-up detector until teardown.
///
/// After teardown every `submit` is a no-op that reports `Unavailable`, so a
/// frame racing with shutdown never reaches a released model.
pub struct DetectorFacade {
    slot: Mutex<Option<Box<dyn LandmarkDetector>>>,
}

impl DetectorFacade {
    pub fn setup(
        mut detector: Box<dyn LandmarkDetector>,
        options: &DetectorOptions,
        callback: LandmarkCallback,
    ) -> Result<Self, DetectorError> {
        if options.mode != RunningMode::LiveStream {
            return Err(DetectorError::UnsupportedMode(options.mode));
        }
        if !(1..=2).contains(&options.max_hands) {
            return Err(DetectorError::InvalidMaxHands(options.max_hands));
        }

        detector.setup(options, callback)?;
        log::info!(
            "landmark detector ready (max_hands={}, min_presence={:.2})",
            options.max_hands,
            options.min_presence
        );

        Ok(Self {
            slot: Mutex::new(Some(detector)),
        })
    }

    pub fn submit(
        &self,
        cycle: CycleId,
        image: NormalizedImage,
        timestamp: Duration,
    ) -> SubmitOutcome {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(detector) = slot.as_mut() else {
            log::debug!("cycle {cycle}: detector released, skipping submit");
            return SubmitOutcome::Unavailable;
        };

        log::trace!("cycle {cycle}: landmarks pending");
        detector.submit(DetectionRequest {
            cycle,
            timestamp,
            image: Arc::new(image),
        });
        SubmitOutcome::Submitted
    }

    pub fn is_available(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn teardown(&self) {
        let detector = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut detector) = detector {
            detector.release();
            log::info!("landmark detector released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualDetector, solid_image};

    fn noop_callback() -> LandmarkCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn submit_after_teardown_is_noop() {
        let (detector, probe) = ManualDetector::new();
        let facade =
            DetectorFacade::setup(Box::new(detector), &DetectorOptions::default(), noop_callback())
                .unwrap();

        assert_eq!(
            facade.submit(CycleId(1), solid_image(4, 4), Duration::ZERO),
            SubmitOutcome::Submitted
        );
        facade.teardown();
        facade.teardown();
        assert_eq!(
            facade.submit(CycleId(2), solid_image(4, 4), Duration::ZERO),
            SubmitOutcome::Unavailable
        );

        assert_eq!(probe.submitted_cycles(), vec![CycleId(1)]);
        assert_eq!(probe.release_count(), 1);
        assert!(!facade.is_available());
    }

    #[test]
    fn rejects_non_streaming_mode() {
        let (detector, probe) = ManualDetector::new();
        let options = DetectorOptions {
            mode: RunningMode::Image,
            ..DetectorOptions::default()
        };
        let err = DetectorFacade::setup(Box::new(detector), &options, noop_callback())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DetectorError::UnsupportedMode(RunningMode::Image)
        ));
        assert!(!probe.is_set_up());
    }

    #[test]
    fn rejects_more_than_two_hands() {
        let (detector, _probe) = ManualDetector::new();
        let options = DetectorOptions {
            max_hands: 3,
            ..DetectorOptions::default()
        };
        assert!(matches!(
            DetectorFacade::setup(Box::new(detector), &options, noop_callback()),
            Err(DetectorError::InvalidMaxHands(3))
        ));
    }
}
