use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};

use super::stats::PipelineStats;
use crate::types::{CycleId, RenderState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published,
    /// A newer cycle was already published; the state was discarded.
    Stale,
}

#[derive(Default)]
struct Mailbox {
    latest: Option<CycleId>,
    pending: Option<RenderState>,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    stats: Option<Arc<PipelineStats>>,
}

/// Inference-side end of the render mailbox.
#[derive(Clone)]
pub struct ResultDispatcher {
    shared: Arc<Shared>,
    doorbell: Sender<()>,
}

/// Rendering-side end of the render mailbox.
pub struct RenderReceiver {
    shared: Arc<Shared>,
    doorbell: Receiver<()>,
}

/// Creates a single-slot mailbox between the inference and rendering threads.
///
/// A new state overwrites whatever the renderer has not picked up yet, and a
/// state whose cycle is not newer than the last published one is discarded,
/// so a slow detection that finishes late can never replace a newer result.
pub fn channel() -> (ResultDispatcher, RenderReceiver) {
    with_stats(None)
}

pub(crate) fn with_stats(stats: Option<Arc<PipelineStats>>) -> (ResultDispatcher, RenderReceiver) {
    let shared = Arc::new(Shared {
        mailbox: Mutex::new(Mailbox::default()),
        stats,
    });
    let (tx, rx) = bounded(1);
    (
        ResultDispatcher {
            shared: shared.clone(),
            doorbell: tx,
        },
        RenderReceiver {
            shared,
            doorbell: rx,
        },
    )
}

impl ResultDispatcher {
    pub fn dispatch(&self, state: RenderState) -> DispatchOutcome {
        let cycle = state.cycle;
        {
            let mut mailbox = self
                .shared
                .mailbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if mailbox.latest.is_some_and(|latest| cycle <= latest) {
                drop(mailbox);
                if let Some(stats) = &self.shared.stats {
                    stats.stale_dispatch();
                }
                log::debug!("cycle {cycle}: stale result discarded");
                return DispatchOutcome::Stale;
            }
            mailbox.latest = Some(cycle);
            mailbox.pending = Some(state);
        }

        // A full doorbell already means "something is waiting".
        let _ = self.doorbell.try_send(());
        log::trace!("cycle {cycle}: published");
        DispatchOutcome::Published
    }
}

impl RenderReceiver {
    /// Takes the newest unseen state, if any.
    pub fn try_take(&self) -> Option<RenderState> {
        let _ = self.doorbell.try_recv();
        self.shared
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take()
    }

    /// Waits up to `timeout` for a state to be published.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RenderState> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(state) = self.try_take() {
                return Some(state);
            }
            // A leftover ring for an already-taken state just loops again.
            self.doorbell.recv_deadline(deadline).ok()?;
        }
    }

    /// Cycle of the most recently published state.
    pub fn latest_cycle(&self) -> Option<CycleId> {
        self.shared
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(cycle: u64) -> RenderState {
        RenderState::cleared(CycleId(cycle), None)
    }

    #[test]
    fn late_older_cycle_is_discarded() {
        let (dispatcher, receiver) = channel();

        assert_eq!(dispatcher.dispatch(cleared(6)), DispatchOutcome::Published);
        assert_eq!(dispatcher.dispatch(cleared(5)), DispatchOutcome::Stale);

        assert_eq!(receiver.try_take().unwrap().cycle, CycleId(6));
        assert!(receiver.try_take().is_none());
    }

    #[test]
    fn stale_after_consumption_is_still_discarded() {
        let (dispatcher, receiver) = channel();
        dispatcher.dispatch(cleared(2));
        assert_eq!(receiver.try_take().unwrap().cycle, CycleId(2));

        assert_eq!(dispatcher.dispatch(cleared(1)), DispatchOutcome::Stale);
        assert_eq!(dispatcher.dispatch(cleared(2)), DispatchOutcome::Stale);
        assert!(receiver.try_take().is_none());
        assert_eq!(receiver.latest_cycle(), Some(CycleId(2)));
    }

    #[test]
    fn newer_state_overwrites_unread_one() {
        let (dispatcher, receiver) = channel();
        for cycle in 1..=4 {
            dispatcher.dispatch(cleared(cycle));
        }
        assert_eq!(receiver.try_take().unwrap().cycle, CycleId(4));
        assert!(receiver.try_take().is_none());
    }

    #[test]
    fn wait_wakes_on_dispatch_from_other_thread() {
        let (dispatcher, receiver) = channel();
        let worker = std::thread::spawn(move || {
            dispatcher.dispatch(cleared(1));
        });
        let state = receiver.wait_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(state.cycle, CycleId(1));
        worker.join().unwrap();
        assert!(receiver.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn leftover_doorbell_does_not_cut_wait_short() {
        let (dispatcher, receiver) = channel();
        dispatcher.dispatch(cleared(1));
        assert_eq!(receiver.try_take().unwrap().cycle, CycleId(1));
        // A ring that lands after its state was already taken.
        dispatcher.doorbell.try_send(()).unwrap();

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            dispatcher.dispatch(cleared(2));
        });
        let state = receiver.wait_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(state.cycle, CycleId(2));
        worker.join().unwrap();
    }

    #[test]
    fn stale_dispatch_is_counted() {
        let stats = Arc::new(PipelineStats::default());
        let (dispatcher, _receiver) = with_stats(Some(stats.clone()));
        dispatcher.dispatch(cleared(3));
        dispatcher.dispatch(cleared(1));
        assert_eq!(stats.snapshot().stale_dispatches, 1);
    }
}
