//! ONNX Runtime backends for the landmark detector and the gesture model.

mod common;
mod gesture_model;
mod handpose;

pub use gesture_model::{OrtGestureModel, OrtModelLoader};
pub use handpose::OrtHandposeDetector;

use crossbeam_channel::Receiver;

/// Blocks for the next request, then skips ahead to the newest queued one.
fn recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut item = rx.recv().ok()?;
    while let Ok(newer) = rx.try_recv() {
        item = newer;
    }
    Some(item)
}
