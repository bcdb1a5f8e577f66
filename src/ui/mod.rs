//! Diagnostics overlay
//!
//! A small egui window with frame rate, particle and worker counters and a
//! preview of the latest mask. Hidden by default; the app toggles it.

use std::sync::Arc;

use winit::event::WindowEvent;
use winit::window::Window;

use crate::effects::MaskView;
use crate::pipeline::{WorkerStats, WorkerStatus};
use crate::render::OverlayPass;

const MASK_PREVIEW_WIDTH: f32 = 240.0;

/// Values shown in the overlay, refreshed every frame
#[derive(Clone, Copy, Debug, Default)]
pub struct OverlayStats {
    pub fps: f64,
    pub particles: usize,
    /// Particles moved by the last applied mask
    pub last_moved: usize,
    pub camera_frames: u64,
    pub camera_resolution: (u32, u32),
    pub worker: Option<WorkerStats>,
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Loading => "loading model",
        WorkerStatus::Running => "running",
        WorkerStatus::Failed => "model unavailable",
        WorkerStatus::Stopped => "stopped",
    }
}

/// Text lines of the overlay
pub fn summary_lines(stats: &OverlayStats) -> Vec<String> {
    let mut lines = vec![
        format!("FPS: {:.1}", stats.fps),
        format!("Particles: {}", stats.particles),
        format!(
            "Camera: {}x{}, {} frames",
            stats.camera_resolution.0, stats.camera_resolution.1, stats.camera_frames
        ),
    ];
    match stats.worker {
        Some(worker) => {
            lines.push(format!("Segmentation: {}", status_label(worker.status)));
            lines.push(format!(
                "Masks: {} ({} failed), last {:.1} ms",
                worker.segmented,
                worker.failures,
                worker.last_inference.as_secs_f64() * 1000.0
            ));
            lines.push(format!("Moved last mask: {}", stats.last_moved));
        }
        None => lines.push("Segmentation: off".to_string()),
    }
    lines
}

/// Gate between winit events and the egui input buffer
///
/// egui queues every forwarded event until the next frame takes them, so
/// events are only forwarded while the overlay is drawn. Showing the overlay
/// starts from an empty queue.
#[derive(Debug, Default)]
pub struct OverlayInput {
    visible: bool,
    /// Events forwarded since the last frame took them
    pending: usize,
}

impl OverlayInput {
    pub fn new(visible: bool) -> Self {
        Self { visible, pending: 0 }
    }

    /// Whether an incoming event should reach egui
    pub fn accept(&mut self) -> bool {
        if self.visible {
            self.pending += 1;
        }
        self.visible
    }

    /// The frame took the queued events
    pub fn drain(&mut self) {
        self.pending = 0;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.pending = 0;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn pending(&self) -> usize {
        self.pending
    }
}

pub struct Overlay {
    window: Arc<Window>,
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    input: OverlayInput,
    stats: OverlayStats,
    mask_texture: Option<egui::TextureHandle>,
    mask_generation: u64,
}

impl Overlay {
    pub fn new(window: Arc<Window>, device: &wgpu::Device, format: wgpu::TextureFormat, visible: bool) -> Self {
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(device, format, None, 1, false);

        Self {
            window,
            egui_ctx,
            egui_state,
            egui_renderer,
            input: OverlayInput::new(visible),
            stats: OverlayStats::default(),
            mask_texture: None,
            mask_generation: 0,
        }
    }

    /// Forward a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        if !self.input.accept() {
            return false;
        }
        self.egui_state.on_window_event(&self.window, event).consumed
    }

    pub fn toggle(&mut self) {
        let visible = !self.input.is_visible();
        if visible {
            // Drop whatever was queued after the last drawn frame
            let _ = self.egui_state.take_egui_input(&self.window);
        }
        self.input.set_visible(visible);
        log::info!("Overlay {}", if visible { "shown" } else { "hidden" });
    }

    pub fn is_visible(&self) -> bool {
        self.input.is_visible()
    }

    /// Refresh the counters and, when it changed, the mask preview
    pub fn update(&mut self, stats: OverlayStats, mask_view: &MaskView) {
        self.stats = stats;
        if !self.is_visible() || mask_view.is_empty() || mask_view.generation() == self.mask_generation {
            return;
        }

        let image = mask_view.image();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(
            [image.width() as usize, image.height() as usize],
            image.as_raw(),
        );
        match &mut self.mask_texture {
            Some(texture) => texture.set(color_image, egui::TextureOptions::NEAREST),
            None => {
                self.mask_texture = Some(self.egui_ctx.load_texture(
                    "mask-preview",
                    color_image,
                    egui::TextureOptions::NEAREST,
                ));
            }
        }
        self.mask_generation = mask_view.generation();
    }
}

impl OverlayPass for Overlay {
    fn record(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        size: (u32, u32),
    ) {
        if !self.is_visible() {
            return;
        }

        let raw_input = self.egui_state.take_egui_input(&self.window);
        self.input.drain();
        let lines = summary_lines(&self.stats);
        let mask_texture = self.mask_texture.clone();

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::Window::new("Person Glow")
                .default_pos([12.0, 12.0])
                .resizable(false)
                .show(ctx, |ui| {
                    for line in &lines {
                        ui.label(line);
                    }
                    if let Some(texture) = &mask_texture {
                        ui.separator();
                        ui.label("Mask");
                        ui.add(
                            egui::Image::new(egui::load::SizedTexture::from_handle(texture))
                                .max_width(MASK_PREVIEW_WIDTH),
                        );
                    }
                });
        });

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(device, queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [size.0, size.1],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer
            .update_buffers(device, queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer
                .render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hidden_overlay_queues_nothing() {
        let mut input = OverlayInput::new(false);
        for _ in 0..10_000 {
            assert!(!input.accept());
        }
        assert_eq!(input.pending(), 0);
    }

    #[test]
    fn test_visible_overlay_queue_drains_each_frame() {
        let mut input = OverlayInput::new(true);
        for _ in 0..3 {
            assert!(input.accept());
        }
        assert_eq!(input.pending(), 3);
        input.drain();
        assert_eq!(input.pending(), 0);
    }

    #[test]
    fn test_showing_overlay_starts_empty() {
        let mut input = OverlayInput::new(true);
        input.accept();
        input.set_visible(false);
        for _ in 0..100 {
            input.accept();
        }
        input.set_visible(true);
        assert_eq!(input.pending(), 0);
        assert!(input.accept());
        assert_eq!(input.pending(), 1);
    }

    #[test]
    fn test_summary_without_worker() {
        let lines = summary_lines(&OverlayStats {
            fps: 59.94,
            particles: 170_000,
            camera_resolution: (1280, 720),
            camera_frames: 42,
            ..Default::default()
        });
        assert_eq!(lines[0], "FPS: 59.9");
        assert_eq!(lines[1], "Particles: 170000");
        assert_eq!(lines[2], "Camera: 1280x720, 42 frames");
        assert_eq!(lines.last().map(String::as_str), Some("Segmentation: off"));
    }

    #[test]
    fn test_summary_with_worker() {
        let lines = summary_lines(&OverlayStats {
            last_moved: 170_000,
            worker: Some(WorkerStats {
                status: WorkerStatus::Failed,
                segmented: 10,
                failures: 2,
                last_inference: Duration::from_micros(12_500),
            }),
            ..Default::default()
        });
        assert!(lines.contains(&"Segmentation: model unavailable".to_string()));
        assert!(lines.contains(&"Masks: 10 (2 failed), last 12.5 ms".to_string()));
        assert!(lines.contains(&"Moved last mask: 170000".to_string()));
    }
}
