//! Frame composer: scene pass into an HDR target, then bloom to the surface

use super::bloom::{BloomParams, BloomPass, HdrTarget, HDR_FORMAT};
use super::camera::Viewport;
use super::points::PointsPipeline;

pub struct Composer {
    scene: HdrTarget,
    bloom: BloomPass,
}

impl Composer {
    pub fn new(
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
        viewport: Viewport,
        params: BloomParams,
    ) -> Self {
        let scene = HdrTarget::new(device, viewport.width, viewport.height, "Scene Target");
        let bloom = BloomPass::new(
            device,
            &scene.view,
            viewport.width,
            viewport.height,
            output_format,
            params,
        );
        Self { scene, bloom }
    }

    /// Format the scene pass renders into
    pub fn scene_format(&self) -> wgpu::TextureFormat {
        HDR_FORMAT
    }

    pub fn resize(&mut self, device: &wgpu::Device, viewport: Viewport) {
        self.scene = HdrTarget::new(device, viewport.width, viewport.height, "Scene Target");
        self.bloom.resize(device, &self.scene.view, viewport.width, viewport.height);
    }

    /// Render points over black, then bloom the result into `output`
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, points: &PointsPipeline, output: &wgpu::TextureView) {
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.scene.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            points.draw(&mut pass);
        }

        self.bloom.render(encoder, output);
    }
}
