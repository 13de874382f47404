use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    empty_frames: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    decode_failures: AtomicU64,
    submissions: AtomicU64,
    unavailable_submissions: AtomicU64,
    no_hand_cycles: AtomicU64,
    classified_cycles: AtomicU64,
    stale_dispatches: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub empty_frames: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub decode_failures: u64,
    pub submissions: u64,
    pub unavailable_submissions: u64,
    pub no_hand_cycles: u64,
    pub classified_cycles: u64,
    pub stale_dispatches: u64,
}

macro_rules! counters {
    ($($field:ident => $method:ident),* $(,)?) => {
        impl PipelineStats {
            $(
                pub(crate) fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    frames_received => frame_received,
    empty_frames => empty_frame,
    frames_dropped => frame_dropped,
    frames_processed => frame_processed,
    decode_failures => decode_failed,
    submissions => submitted,
    unavailable_submissions => submit_unavailable,
    no_hand_cycles => no_hand,
    classified_cycles => classified,
    stale_dispatches => stale_dispatch,
}
