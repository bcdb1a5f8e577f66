//! Rendering
//!
//! `RenderGraph` owns every GPU-side piece of the scene: the wgpu context,
//! the camera projection, the particle cloud with its buffers, and the
//! bloom composer. It is built once after the camera is acquired and lives
//! for the rest of the session.

pub mod bloom;
pub mod camera;
pub mod composer;
pub mod context;
pub mod points;

use rand::Rng;

use crate::config::GlowConfig;
use crate::effects::ParticleCloud;

pub use bloom::{level_sizes, BloomParams, BLOOM_LEVELS};
pub use camera::{PerspectiveCamera, Projection, Viewport};
pub use composer::Composer;
pub use context::GpuContext;
pub use points::PointsPipeline;

/// Extra drawing recorded after the scene, e.g. the diagnostics overlay
pub trait OverlayPass {
    fn record(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        size: (u32, u32),
    );
}

/// Sizes of everything that follows the window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSizes {
    pub surface: Viewport,
    /// HDR target the points are drawn into
    pub scene: Viewport,
    pub bloom_levels: [(u32, u32); BLOOM_LEVELS],
}

impl OutputSizes {
    pub fn for_viewport(viewport: Viewport) -> Self {
        Self {
            surface: viewport,
            scene: viewport,
            bloom_levels: level_sizes(viewport.width, viewport.height),
        }
    }
}

/// Apply a window resize to the projection and return the sizes the GPU
/// side must follow, or `None` for zero-sized requests
pub fn plan_resize(projection: &mut Projection, width: u32, height: u32) -> Option<OutputSizes> {
    if !projection.resize(width, height) {
        return None;
    }
    Some(OutputSizes::for_viewport(projection.viewport()))
}

/// Scene state shared by the update and render paths
pub struct RenderGraph {
    gpu: GpuContext,
    projection: Projection,
    sizes: OutputSizes,
    cloud: ParticleCloud,
    points: PointsPipeline,
    composer: Composer,
}

impl RenderGraph {
    /// Build the scene: projection, particle cloud, points and bloom
    pub fn new<R: Rng + ?Sized>(gpu: GpuContext, config: &GlowConfig, rng: &mut R) -> Self {
        let (width, height) = gpu.size();
        let viewport = Viewport::new(width, height);
        let projection = Projection::new(viewport, &config.view);
        let sizes = OutputSizes::for_viewport(viewport);

        let cloud = ParticleCloud::new(config.particles.count, rng);
        let composer = Composer::new(
            &gpu.device,
            gpu.format(),
            sizes.scene,
            BloomParams::from(&config.bloom),
        );
        let points = PointsPipeline::new(
            &gpu.device,
            &cloud,
            composer.scene_format(),
            config.particles.size,
            config.particles.opacity,
        );

        log::info!(
            "Scene ready: {} particles, {}x{} output",
            cloud.len(),
            viewport.width,
            viewport.height
        );

        Self {
            gpu,
            projection,
            sizes,
            cloud,
            points,
            composer,
        }
    }

    /// Follow a window resize: surface, projection and offscreen targets
    pub fn resize(&mut self, width: u32, height: u32) {
        let Some(sizes) = plan_resize(&mut self.projection, width, height) else {
            return;
        };
        self.gpu.resize(sizes.surface.width, sizes.surface.height);
        self.composer.resize(&self.gpu.device, sizes.scene);
        self.sizes = sizes;
        log::debug!("Resized to {}x{}", width, height);
    }

    pub fn cloud(&self) -> &ParticleCloud {
        &self.cloud
    }

    pub fn cloud_mut(&mut self) -> &mut ParticleCloud {
        &mut self.cloud
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Reconfigure the surface after it was lost
    pub fn recover_surface(&self) {
        self.gpu.reconfigure();
    }

    /// Upload pending particle moves, draw the scene with bloom, then the overlay
    pub fn render(&mut self, overlay: Option<&mut dyn OverlayPass>) -> Result<(), wgpu::SurfaceError> {
        let output = self.gpu.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.points.sync(&self.gpu.queue, &mut self.cloud);
        self.points.update_uniforms(
            &self.gpu.queue,
            self.projection.camera().view_projection_matrix(),
            self.sizes.surface.aspect(),
        );

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        self.composer.render(&mut encoder, &self.points, &view);

        if let Some(overlay) = overlay {
            overlay.record(
                &self.gpu.device,
                &self.gpu.queue,
                &mut encoder,
                &view,
                (self.sizes.surface.width, self.sizes.surface.height),
            );
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewSettings;

    #[test]
    fn test_resize_sizes_follow_window() {
        let mut projection = Projection::new(Viewport::new(1280, 720), &ViewSettings::default());

        let sizes = plan_resize(&mut projection, 800, 600).expect("non-zero resize");
        assert_eq!(sizes.surface, Viewport::new(800, 600));
        assert_eq!(sizes.scene, sizes.surface);
        assert_eq!(sizes.bloom_levels, [(400, 300), (200, 150), (100, 75)]);
        assert_eq!(projection.viewport(), sizes.surface);
        assert!((projection.camera().aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_resize_keeps_sizes() {
        let mut projection = Projection::new(Viewport::new(640, 480), &ViewSettings::default());
        let before = OutputSizes::for_viewport(projection.viewport());

        assert_eq!(plan_resize(&mut projection, 0, 480), None);
        assert_eq!(plan_resize(&mut projection, 640, 0), None);
        assert_eq!(OutputSizes::for_viewport(projection.viewport()), before);
    }

    #[test]
    fn test_tiny_window_keeps_bloom_levels_nonzero() {
        let mut projection = Projection::new(Viewport::new(640, 480), &ViewSettings::default());
        let sizes = plan_resize(&mut projection, 3, 1).expect("non-zero resize");
        assert_eq!(sizes.surface, Viewport::new(3, 1));
        assert_eq!(sizes.bloom_levels, [(1, 1), (1, 1), (1, 1)]);
    }
}
