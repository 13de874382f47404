use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::stats::PipelineStats;
use crate::types::{CycleId, RawFrame};

/// Work done on each accepted frame, on the analyzer thread.
pub trait FrameHandler: Send + 'static {
    fn handle(&mut self, cycle: CycleId, frame: RawFrame);
}

impl<F> FrameHandler for F
where
    F: FnMut(CycleId, RawFrame) + Send + 'static,
{
    fn handle(&mut self, cycle: CycleId, frame: RawFrame) {
        self(cycle, frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    Accepted(CycleId),
    /// The analyzer was still busy with an earlier frame.
    Dropped,
    /// The frame had no backing data.
    Empty,
    /// The source has been stopped.
    Stopped,
}

struct SourceShared {
    busy: AtomicBool,
    next_cycle: AtomicU64,
    tx: Mutex<Option<Sender<(CycleId, RawFrame)>>>,
    stats: Arc<PipelineStats>,
}

/// Keep-latest entry point for camera frames.
///
/// At most one frame is in flight at a time. A frame that arrives while the
/// analyzer is busy is released on the spot instead of being queued, so the
/// pipeline never builds a backlog and always works on a recent frame.
pub struct FrameSource {
    shared: Arc<SourceShared>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Cheap clonable handle the platform's frame-delivery thread calls into.
#[derive(Clone)]
pub struct FrameSourceHandle {
    shared: Arc<SourceShared>,
}

impl FrameSource {
    pub fn start<H: FrameHandler>(handler: H, stats: Arc<PipelineStats>) -> std::io::Result<Self> {
        let (tx, rx) = bounded(1);
        let shared = Arc::new(SourceShared {
            busy: AtomicBool::new(false),
            next_cycle: AtomicU64::new(1),
            tx: Mutex::new(Some(tx)),
            stats,
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("frame-analyzer".into())
            .spawn(move || analyzer_loop(handler, rx, worker_shared))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> FrameSourceHandle {
        FrameSourceHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn on_frame(&self, frame: RawFrame) -> FrameDisposition {
        self.shared.on_frame(frame)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender ends the analyzer loop once the current frame is done.
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl FrameSourceHandle {
    pub fn on_frame(&self, frame: RawFrame) -> FrameDisposition {
        self.shared.on_frame(frame)
    }
}

impl SourceShared {
    fn on_frame(&self, frame: RawFrame) -> FrameDisposition {
        self.stats.frame_received();

        if frame.is_empty() {
            self.stats.empty_frame();
            log::debug!("dropping empty frame {:?}", frame.id());
            return FrameDisposition::Empty;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.frame_dropped();
            log::trace!("analyzer busy, dropping frame {:?}", frame.id());
            return FrameDisposition::Dropped;
        }

        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            self.busy.store(false, Ordering::Release);
            self.stats.frame_dropped();
            return FrameDisposition::Stopped;
        };

        let cycle = CycleId(self.next_cycle.fetch_add(1, Ordering::Relaxed));
        match tx.try_send((cycle, frame)) {
            Ok(()) => FrameDisposition::Accepted(cycle),
            Err(err) => {
                self.busy.store(false, Ordering::Release);
                self.stats.frame_dropped();
                let disposition = match &err {
                    TrySendError::Full(_) => FrameDisposition::Dropped,
                    TrySendError::Disconnected(_) => FrameDisposition::Stopped,
                };
                drop(err.into_inner());
                disposition
            }
        }
    }
}

fn analyzer_loop<H: FrameHandler>(
    mut handler: H,
    rx: Receiver<(CycleId, RawFrame)>,
    shared: Arc<SourceShared>,
) {
    while let Ok((cycle, frame)) = rx.recv() {
        log::trace!("cycle {cycle}: frame acquired");
        handler.handle(cycle, frame);
        shared.busy.store(false, Ordering::Release);
        shared.stats.frame_processed();
    }
    log::debug!("frame analyzer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::CountingPool;

    #[test]
    fn empty_frame_never_reaches_handler() {
        let pool = CountingPool::new();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let stats = Arc::new(PipelineStats::default());
        let source = FrameSource::start(
            move |cycle: CycleId, _frame: RawFrame| {
                let _ = seen_tx.send(cycle);
            },
            stats.clone(),
        )
        .unwrap();

        let disposition = source.on_frame(pool.empty_frame());
        assert_eq!(disposition, FrameDisposition::Empty);
        source.stop();

        assert!(seen_rx.try_recv().is_err());
        assert_eq!(stats.snapshot().empty_frames, 1);
        pool.assert_all_released_once();
    }

    #[test]
    fn cycles_increase_across_accepted_frames() {
        let pool = CountingPool::new();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let source = FrameSource::start(
            move |cycle: CycleId, _frame: RawFrame| {
                let _ = seen_tx.send(cycle);
            },
            Arc::new(PipelineStats::default()),
        )
        .unwrap();

        let mut cycles = Vec::new();
        for _ in 0..3 {
            let disposition = source.on_frame(pool.rgba_frame(4, 4, [0, 0, 0, 255]));
            assert!(matches!(disposition, FrameDisposition::Accepted(_)));
            cycles.push(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap());
            // Let the analyzer clear its busy flag before the next frame.
            while source.shared.busy.load(Ordering::Acquire) {
                thread::yield_now();
            }
        }
        source.stop();

        assert_eq!(cycles, vec![CycleId(1), CycleId(2), CycleId(3)]);
        pool.assert_all_released_once();
    }

    #[test]
    fn frames_after_stop_are_released() {
        let pool = CountingPool::new();
        let source =
            FrameSource::start(|_: CycleId, _: RawFrame| {}, Arc::new(PipelineStats::default()))
                .unwrap();
        let handle = source.handle();
        source.stop();

        assert_eq!(
            handle.on_frame(pool.rgba_frame(2, 2, [1, 2, 3, 255])),
            FrameDisposition::Stopped
        );
        pool.assert_all_released_once();
    }
}
