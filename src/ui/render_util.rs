use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use gpui::RenderImage;
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::{
    config::OverlayStyle,
    pipeline::{CanvasSurface, Overlay, RenderSurface, Viewport},
    types::NormalizedImage,
};

/// Composes on the CPU, then hands the frame to gpui as a texture.
pub(super) struct ImageSurface {
    canvas: CanvasSurface,
    fresh: Option<Arc<RenderImage>>,
}

impl ImageSurface {
    pub(super) fn new(style: OverlayStyle) -> Self {
        Self {
            canvas: CanvasSurface::new(style),
            fresh: None,
        }
    }

    /// The image composed since the last call, if any.
    pub(super) fn take_image(&mut self) -> Option<Arc<RenderImage>> {
        self.fresh.take()
    }
}

impl RenderSurface for ImageSurface {
    fn present(
        &mut self,
        overlay: &Overlay,
        backdrop: Option<&NormalizedImage>,
        viewport: Viewport,
    ) {
        self.canvas.present(overlay, backdrop, viewport);
        let composed = self.canvas.viewport();
        if let Some(image) = canvas_to_image(self.canvas.canvas(), composed.width, composed.height)
        {
            self.fresh = Some(image);
        }
    }
}

fn canvas_to_image(canvas: &[u8], width: u32, height: u32) -> Option<Arc<RenderImage>> {
    if width == 0 || height == 0 {
        return None;
    }
    let mut bgra = canvas.to_vec();
    // GPUI expects BGRA; convert in place to avoid the async asset pipeline and flicker.
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

/// Render-state updates per second, averaged over one-second windows.
pub(super) struct FpsCounter {
    window_start: Instant,
    updates: u32,
    fps: f32,
}

impl FpsCounter {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            updates: 0,
            fps: 0.0,
        }
    }

    pub(super) fn tick(&mut self, now: Instant) {
        self.updates += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.updates as f32 / elapsed.as_secs_f32();
            self.updates = 0;
            self.window_start = now;
        }
    }

    pub(super) fn fps(&self) -> f32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_settles_after_one_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        for i in 1..=30 {
            counter.tick(start + Duration::from_millis(i * 1000 / 30));
        }
        assert!((counter.fps() - 30.0).abs() < 0.5);
    }
}
