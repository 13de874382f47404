use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::frame_source::{FrameDisposition, FrameSourceHandle};
use crate::types::{FrameId, FramePool, PixelFormat, Plane, RawFrame};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode, but prefer higher FPS to
        // avoid very low default rates (e.g. 15 FPS) that some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

/// Tracks capture buffers the pipeline still holds.
#[derive(Debug, Default)]
struct CapturePool {
    in_flight: AtomicU64,
}

impl FramePool for CapturePool {
    fn release(&self, id: FrameId) {
        let before = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        log::trace!("frame {} released ({} in flight)", id.0, before - 1);
    }
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Wraps a captured buffer as a raw frame without converting it.
fn to_raw_frame(buffer: &Buffer, id: FrameId, started: Instant) -> RawFrame {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer().to_vec();

    let (format, row_stride) = match buffer.source_frame_format() {
        FrameFormat::NV12 => (PixelFormat::Nv12, width as usize),
        FrameFormat::YUYV => (PixelFormat::Yuyv, width as usize * 2),
        FrameFormat::MJPEG => (PixelFormat::Mjpeg, 0),
        FrameFormat::RAWRGB => (PixelFormat::Rgb, width as usize * 3),
        FrameFormat::RAWBGR => (PixelFormat::Bgr, width as usize * 3),
        FrameFormat::GRAY => (PixelFormat::Gray, width as usize),
    };

    RawFrame::new(
        id,
        width,
        height,
        format,
        vec![Plane::packed(data, row_stride)],
        started.elapsed(),
    )
}

/// Opens camera `index` and pushes every captured frame into `frames` from a
/// capture thread.
pub fn start_camera_stream(index: CameraIndex, frames: FrameSourceHandle) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    let probe = build_camera(index.clone()).context("failed to open camera")?;
    log::info!(
        "camera opened: {} @ {:?}",
        probe.info().human_name(),
        probe.camera_format()
    );
    drop(probe);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let pool = Arc::new(CapturePool::default());

    let handle = thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            let started = Instant::now();
            let mut next_id = 0u64;
            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            frame_start.elapsed()
                        );
                        continue;
                    }
                };

                let id = FrameId(next_id);
                next_id += 1;
                pool.in_flight.fetch_add(1, Ordering::AcqRel);
                let frame = to_raw_frame(&buffer, id, started).with_pool(pool.clone());

                if frames.on_frame(frame) == FrameDisposition::Stopped {
                    log::debug!("frame source stopped, ending capture");
                    break;
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        })
        .context("failed to spawn camera thread")?;

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}
