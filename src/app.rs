//! Application state
//!
//! Ties the camera, the segmentation worker and the render graph together.
//! Startup runs in a fixed order: the camera is opened first, and only when
//! that succeeds is the GPU context and scene built.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::CameraCapture;
use crate::config::GlowConfig;
use crate::effects::MaskView;
use crate::error::Result;
use crate::ml::{locate_model, OrtSegmenter, Segmenter};
use crate::pipeline::{apply_mask, bootstrap, FrameReport, SegmentationWorker, WorkerSettings};
use crate::render::{GpuContext, OverlayPass, RenderGraph};
use crate::ui::{Overlay, OverlayStats};

/// Where `save_mask_snapshot` writes
pub const SNAPSHOT_FILE: &str = "mask-snapshot.png";

/// Main application state
pub struct App {
    camera: CameraCapture,
    worker: Option<SegmentationWorker>,
    graph: RenderGraph,
    mask_view: MaskView,
    overlay: Overlay,
    rng: StdRng,
    last_report: Option<FrameReport>,

    // Frame timing
    frame_count: u64,
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Open the camera, then build the scene and start segmentation
    pub fn new(window: Arc<Window>, config: &GlowConfig) -> Result<Self> {
        let mut rng = match config.particles.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let timeout = Duration::from_millis(config.camera.open_timeout_ms);
        let (camera, graph) = bootstrap(
            || CameraCapture::open(config.camera.index, timeout),
            |camera| {
                let (width, height) = camera.resolution();
                log::info!("Camera ready at {}x{}, building scene", width, height);
                let gpu = pollster::block_on(GpuContext::new(window.clone()))?;
                Ok(RenderGraph::new(gpu, config, &mut rng))
            },
        )?;

        let worker = Self::start_worker(&camera, config);

        let overlay = Overlay::new(
            window,
            &graph.gpu().device,
            graph.gpu().format(),
            config.overlay.visible,
        );

        Ok(Self {
            camera,
            worker,
            graph,
            mask_view: MaskView::new(),
            overlay,
            rng,
            last_report: None,
            frame_count: 0,
            fps: 0.0,
            last_fps_update: Instant::now(),
            frames_since_update: 0,
        })
    }

    fn start_worker(camera: &CameraCapture, config: &GlowConfig) -> Option<SegmentationWorker> {
        let settings = WorkerSettings {
            segmentation: config.segmentation.segmentation_config(),
            mask_colors: config.segmentation.mask_colors,
            loop_delay: Duration::from_millis(config.segmentation.loop_delay_ms),
        };
        let model_path = config.segmentation.model_path.clone();

        let load = move || -> Result<Box<dyn Segmenter>> {
            let path = locate_model(model_path.as_deref())?;
            Ok(Box::new(OrtSegmenter::load(&path)?))
        };

        match SegmentationWorker::spawn(camera.feed(), load, settings) {
            Ok(worker) => Some(worker),
            Err(e) => {
                log::error!("Failed to start segmentation: {}", e);
                None
            }
        }
    }

    /// Handle a window event, returning true if the overlay consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        self.overlay.handle_window_event(event)
    }

    /// Resize the surface and everything sized to it
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.graph.resize(new_size.width, new_size.height);
    }

    pub fn toggle_overlay(&mut self) {
        self.overlay.toggle();
    }

    /// Write the current mask view as PNG
    pub fn save_mask_snapshot(&self) {
        self.save_mask_snapshot_to(Path::new(SNAPSHOT_FILE));
    }

    fn save_mask_snapshot_to(&self, path: &Path) {
        if self.mask_view.is_empty() {
            log::warn!("No mask yet, snapshot skipped");
            return;
        }
        if let Err(e) = self.mask_view.save_png(path) {
            log::warn!("Failed to save mask snapshot: {}", e);
        }
    }

    /// Apply the pending mask, if the worker has one
    pub fn update(&mut self) {
        let Some(worker) = &self.worker else {
            return;
        };
        let Some(frame) = worker.try_recv() else {
            return;
        };

        let report = apply_mask(&frame, self.graph.cloud_mut(), &mut self.mask_view, &mut self.rng);
        log::debug!(
            "Frame {}: {} person pixels, {} particles moved, inference {:.1} ms",
            report.frame_number,
            report.person_pixels,
            report.moved,
            report.inference_time.as_secs_f64() * 1000.0
        );
        self.last_report = Some(report);
    }

    /// Render one frame
    pub fn render(&mut self) -> std::result::Result<(), wgpu::SurfaceError> {
        self.update_fps();

        let overlay: Option<&mut dyn OverlayPass> = if self.overlay.is_visible() {
            let stats = OverlayStats {
                fps: self.fps,
                particles: self.graph.cloud().len(),
                last_moved: self.last_report.map(|r| r.moved).unwrap_or(0),
                camera_frames: self.camera.frame_count(),
                camera_resolution: self.camera.resolution(),
                worker: self.worker.as_ref().map(|w| w.stats()),
            };
            self.overlay.update(stats, &self.mask_view);
            Some(&mut self.overlay)
        } else {
            None
        };

        self.graph.render(overlay)
    }

    /// Reconfigure the surface after `SurfaceError::Lost`
    pub fn recover_surface(&self) {
        self.graph.recover_surface();
    }

    /// Stop the worker and the camera
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.camera.stop();
        log::info!("Rendered {} frames", self.frame_count);
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
