use anyhow::{Context, Result};
use fast_image_resize as fir;
use rayon::prelude::*;

use super::dispatcher::RenderReceiver;
use crate::{
    config::OverlayStyle,
    types::{NormalizedImage, RenderState},
};

/// Bones of the 21-keypoint hand model: thumb, index, middle, ring, pinky.
pub const HAND_CONNECTIONS: [(usize, usize); 20] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub from: (f32, f32),
    pub to: (f32, f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Marker {
    pub center: (f32, f32),
    pub radius: i32,
}

/// Draw list for one render state, in viewport pixels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub segments: Vec<Segment>,
    pub markers: Vec<Marker>,
    pub label: Option<String>,
}

/// Lays out skeletons and label for `state` in `viewport`.
pub fn render(state: &RenderState, viewport: Viewport, style: &OverlayStyle) -> Overlay {
    let Some(gesture) = &state.gesture else {
        return Overlay::default();
    };

    let (w, h) = (viewport.width as f32, viewport.height as f32);
    let to_pixels = |x: f32, y: f32| {
        let x = if style.mirror { 1.0 - x } else { x };
        (x * w, y * h)
    };

    let mut overlay = Overlay {
        label: Some(gesture.classification.label.clone()),
        ..Overlay::default()
    };
    for hand in &gesture.landmarks.hands {
        let points: Vec<(f32, f32)> = hand
            .keypoints
            .iter()
            .map(|kp| to_pixels(kp.x, kp.y))
            .collect();
        for &(a, b) in &HAND_CONNECTIONS {
            if let (Some(&from), Some(&to)) = (points.get(a), points.get(b)) {
                overlay.segments.push(Segment { from, to });
            }
        }
        overlay
            .markers
            .extend(points.iter().map(|&center| Marker {
                center,
                radius: style.point_radius,
            }));
    }
    overlay
}

impl Overlay {
    pub fn is_clear(&self) -> bool {
        self.segments.is_empty() && self.markers.is_empty() && self.label.is_none()
    }

    /// Rasterizes segments and markers into an RGBA buffer.
    pub fn paint(&self, buffer: &mut [u8], width: u32, height: u32, style: &OverlayStyle) {
        for segment in &self.segments {
            draw_line(
                buffer,
                width,
                height,
                &segment.from,
                &segment.to,
                style.line_color,
                style.line_thickness,
            );
        }
        for marker in &self.markers {
            draw_circle(
                buffer,
                width,
                height,
                (marker.center.0 as i32, marker.center.1 as i32),
                marker.radius,
                style.point_color,
            );
        }
    }
}

/// Scales the backdrop to the viewport (black when absent) and paints the
/// overlay on top.
pub fn compose(
    backdrop: Option<&NormalizedImage>,
    overlay: &Overlay,
    viewport: Viewport,
    style: &OverlayStyle,
) -> Result<Vec<u8>> {
    let (width, height) = (viewport.width, viewport.height);
    let len = (width as usize) * (height as usize) * 4;

    let mut canvas = match backdrop {
        Some(image) if image.width == width && image.height == height => image.rgba.clone(),
        Some(image) => {
            let src = fir::images::Image::from_vec_u8(
                image.width,
                image.height,
                image.rgba.clone(),
                fir::PixelType::U8x4,
            )
            .context("invalid backdrop buffer")?;
            let mut dst = fir::images::Image::new(width, height, fir::PixelType::U8x4);
            let options = fir::ResizeOptions::new()
                .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
            fir::Resizer::new()
                .resize(&src, &mut dst, Some(&options))
                .context("backdrop resize failed")?;
            dst.into_vec()
        }
        None => {
            let mut canvas = vec![0u8; len];
            for px in canvas.chunks_exact_mut(4) {
                px[3] = 255;
            }
            canvas
        }
    };

    if style.mirror && backdrop.is_some() {
        mirror_rows(&mut canvas, width);
    }
    overlay.paint(&mut canvas, width, height, style);
    Ok(canvas)
}

fn mirror_rows(buffer: &mut [u8], width: u32) {
    let stride = width as usize * 4;
    if stride == 0 {
        return;
    }
    buffer.par_chunks_exact_mut(stride).for_each(|row| {
        let w = width as usize;
        for x in 0..w / 2 {
            let (l, r) = (x * 4, (w - 1 - x) * 4);
            for c in 0..4 {
                row.swap(l + c, r + c);
            }
        }
    });
}

/// Where composed frames end up.
pub trait RenderSurface {
    fn present(
        &mut self,
        overlay: &Overlay,
        backdrop: Option<&NormalizedImage>,
        viewport: Viewport,
    );
}

/// Software surface holding the last composed RGBA frame.
pub struct CanvasSurface {
    style: OverlayStyle,
    canvas: Vec<u8>,
    viewport: Viewport,
}

impl CanvasSurface {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            canvas: Vec::new(),
            viewport: Viewport::new(0, 0),
        }
    }

    pub fn canvas(&self) -> &[u8] {
        &self.canvas
    }

    /// Size of the last composed frame.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

impl RenderSurface for CanvasSurface {
    fn present(
        &mut self,
        overlay: &Overlay,
        backdrop: Option<&NormalizedImage>,
        viewport: Viewport,
    ) {
        match compose(backdrop, overlay, viewport, &self.style) {
            Ok(canvas) => {
                self.canvas = canvas;
                self.viewport = viewport;
            }
            Err(err) => log::warn!("failed to compose preview: {err:?}"),
        }
    }
}

/// Rendering-thread owner of the last received state.
pub struct OverlayRenderer<S> {
    surface: S,
    viewport: Viewport,
    style: OverlayStyle,
    last: Option<RenderState>,
}

impl<S: RenderSurface> OverlayRenderer<S> {
    pub fn new(surface: S, viewport: Viewport, style: OverlayStyle) -> Self {
        Self {
            surface,
            viewport,
            style,
            last: None,
        }
    }

    /// Picks up the newest published state, if any, and redraws.
    pub fn poll(&mut self, receiver: &RenderReceiver) -> bool {
        match receiver.try_take() {
            Some(state) => {
                self.apply(state);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, state: RenderState) {
        self.last = Some(state);
        self.draw();
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.draw();
    }

    pub fn draw(&mut self) {
        let (overlay, backdrop) = match &self.last {
            Some(state) => (
                render(state, self.viewport, &self.style),
                state.backdrop.as_deref(),
            ),
            None => (Overlay::default(), None),
        };
        self.surface.present(&overlay, backdrop, self.viewport);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn last_state(&self) -> Option<&RenderState> {
        self.last.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(buffer, width, height, x0, y0, color);
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}
