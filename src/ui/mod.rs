use std::{sync::Arc, time::Instant};

use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div, img, px,
};
use gpui_component::{Root, StyledExt, h_flex, v_flex};

use crate::{
    config::OverlayStyle,
    pipeline::{
        CameraStream, GesturePipeline, OverlayRenderer, RenderReceiver, StatsSnapshot, Viewport,
    },
};

mod render_util;

use render_util::{FpsCounter, ImageSurface};

const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 640,
    height: 480,
};

/// Everything the viewer keeps alive while its window is open.
pub struct ViewerSession {
    pub camera: Option<CameraStream>,
    pub pipeline: GesturePipeline,
    pub receiver: RenderReceiver,
    pub style: OverlayStyle,
}

pub fn launch_viewer(app: &mut App, session: ViewerSession) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("ISL Translator".into()),
            appears_transparent: false,
            traffic_light_position: None,
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| ViewerView::new(session));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct ViewerView {
    // Dropped first, so capture stops before the pipeline is torn down.
    _camera: Option<CameraStream>,
    pipeline: GesturePipeline,
    receiver: RenderReceiver,
    renderer: OverlayRenderer<ImageSurface>,
    latest_image: Option<Arc<RenderImage>>,
    fps: FpsCounter,
}

impl ViewerView {
    fn new(session: ViewerSession) -> Self {
        let ViewerSession {
            camera,
            pipeline,
            receiver,
            style,
        } = session;
        Self {
            _camera: camera,
            pipeline,
            receiver,
            renderer: OverlayRenderer::new(
                ImageSurface::new(style.clone()),
                DEFAULT_VIEWPORT,
                style,
            ),
            latest_image: None,
            fps: FpsCounter::new(Instant::now()),
        }
    }

    fn poll_results(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        if !self.renderer.poll(&self.receiver) {
            return;
        }
        self.fps.tick(Instant::now());

        // Compose at the camera's native size so landmarks line up.
        let backdrop_size = self
            .renderer
            .last_state()
            .and_then(|state| state.backdrop.as_deref())
            .map(|image| Viewport::new(image.width, image.height));
        if let Some(size) = backdrop_size.filter(|size| *size != self.renderer.viewport()) {
            self.renderer.resize(size);
        }

        if let Some(image) = self.renderer.surface_mut().take_image() {
            self.replace_latest_image(image, window, cx);
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // Explicitly drop the previous GPU texture; otherwise the sprite atlas keeps
            // every frame and memory will climb rapidly while the camera is running.
            cx.drop_image(old_image, Some(window));
        }
    }

    fn label_text(&self) -> String {
        match self.renderer.last_state().and_then(|state| state.gesture.as_ref()) {
            Some(gesture) => format!(
                "{} ({:.0}%)",
                gesture.classification.label,
                gesture.classification.confidence() * 100.0
            ),
            None => "No hands detected".to_string(),
        }
    }
}

fn stats_text(stats: &StatsSnapshot) -> String {
    format!(
        "frames {} · dropped {} · decode errors {} · classified {} · no hand {}",
        stats.frames_received,
        stats.frames_dropped,
        stats.decode_failures,
        stats.classified_cycles,
        stats.no_hand_cycles
    )
}

impl Render for ViewerView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.poll_results(window, cx);

        let frame_view: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .rounded_lg()
                .into_any_element()
        } else {
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("Waiting for camera...")
                .into_any_element()
        };

        let hands_present = self
            .renderer
            .last_state()
            .is_some_and(|state| !state.is_cleared());

        v_flex()
            .size_full()
            .gap_3()
            .p_4()
            .bg(gpui::rgb(0x1a2332))
            .child(
                div()
                    .relative()
                    .flex_1()
                    .w_full()
                    .overflow_hidden()
                    .rounded_lg()
                    .bg(gpui::rgb(0x000000))
                    .child(frame_view),
            )
            .child(
                h_flex()
                    .justify_between()
                    .items_center()
                    .child(
                        div()
                            .text_xl()
                            .font_semibold()
                            .text_color(if hands_present {
                                gpui::rgb(0x4ade80)
                            } else {
                                gpui::rgb(0xf87171)
                            })
                            .child(self.label_text()),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(gpui::rgb(0xa0aab8))
                            .child(format!("FPS: {:.0}", self.fps.fps())),
                    ),
            )
            .child(
                div()
                    .h(px(20.0))
                    .text_xs()
                    .text_color(gpui::rgb(0x8b95a5))
                    .overflow_hidden()
                    .text_ellipsis()
                    .whitespace_nowrap()
                    .child(stats_text(&self.pipeline.stats())),
            )
    }
}
