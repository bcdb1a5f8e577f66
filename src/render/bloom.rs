//! Multi-level bloom
//!
//! Bright pass: luminosity high-pass of the scene into a half-size target.
//! Blur: each level runs a horizontal then a vertical gaussian pass, each
//! level at half the size of the previous one.
//! Composite: scene + strength * weighted sum of levels, into the surface.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::config::BloomSettings;

/// Format of every offscreen target
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

pub const BLOOM_LEVELS: usize = 3;

/// Gaussian kernel radius (and sigma) per level
const KERNEL_RADII: [u32; BLOOM_LEVELS] = [3, 5, 7];

/// Level weights before the radius lerp
const BLOOM_FACTORS: [f32; BLOOM_LEVELS] = [1.0, 0.8, 0.6];

/// Width of the high-pass soft edge above the threshold
const SMOOTH_WIDTH: f32 = 0.01;

/// Bloom parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomParams {
    pub strength: f32,
    /// Spread of the glow: shifts weight towards the wider levels
    pub radius: f32,
    /// Luminance above which pixels contribute
    pub threshold: f32,
}

impl From<&BloomSettings> for BloomParams {
    fn from(settings: &BloomSettings) -> Self {
        Self {
            strength: settings.strength,
            radius: settings.radius,
            threshold: settings.threshold,
        }
    }
}

/// Per-level composite weights (fourth lane unused)
pub fn level_factors(radius: f32) -> [f32; 4] {
    let mut factors = [0.0; 4];
    for (out, f) in factors.iter_mut().zip(BLOOM_FACTORS) {
        // mix(f, 1.2 - f, radius)
        *out = f + (1.2 - 2.0 * f) * radius;
    }
    factors
}

/// Target size of each blur level for a given output size
pub fn level_sizes(width: u32, height: u32) -> [(u32, u32); BLOOM_LEVELS] {
    let mut sizes = [(1, 1); BLOOM_LEVELS];
    for (i, size) in sizes.iter_mut().enumerate() {
        *size = ((width >> (i + 1)).max(1), (height >> (i + 1)).max(1));
    }
    sizes
}

/// Must match `BloomUniforms` in bloom.wgsl
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BloomUniforms {
    pub texel_size: [f32; 2],
    pub direction: [f32; 2],
    pub threshold: f32,
    pub smooth_width: f32,
    pub sigma: f32,
    pub kernel_radius: f32,
}

impl BloomUniforms {
    fn bright(threshold: f32) -> Self {
        Self {
            texel_size: [0.0; 2],
            direction: [0.0; 2],
            threshold,
            smooth_width: SMOOTH_WIDTH,
            sigma: 1.0,
            kernel_radius: 0.0,
        }
    }

    fn blur(size: (u32, u32), direction: [f32; 2], radius: u32) -> Self {
        Self {
            texel_size: [1.0 / size.0 as f32, 1.0 / size.1 as f32],
            direction,
            threshold: 0.0,
            smooth_width: 0.0,
            sigma: radius as f32,
            kernel_radius: radius as f32,
        }
    }
}

/// Must match `CompositeUniforms` in bloom_composite.wgsl
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CompositeUniforms {
    pub factors: [f32; 4],
    pub strength: f32,
    pub _pad: [f32; 3],
}

impl CompositeUniforms {
    pub fn new(params: &BloomParams) -> Self {
        Self {
            factors: level_factors(params.radius),
            strength: params.strength,
            _pad: [0.0; 3],
        }
    }
}

/// Offscreen HDR color target
pub struct HdrTarget {
    _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl HdrTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
            width,
            height,
        }
    }
}

struct BlurLevel {
    horizontal: HdrTarget,
    vertical: HdrTarget,
    horizontal_bind: wgpu::BindGroup,
    vertical_bind: wgpu::BindGroup,
}

/// Everything that depends on the output size
struct BloomTargets {
    bright: HdrTarget,
    bright_bind: wgpu::BindGroup,
    levels: Vec<BlurLevel>,
    composite_bind: wgpu::BindGroup,
}

pub struct BloomPass {
    params: BloomParams,
    bright_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    pass_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    composite_uniforms: wgpu::Buffer,
    targets: BloomTargets,
}

impl BloomPass {
    /// Create the bloom chain reading `scene_view` and writing `output_format`
    pub fn new(
        device: &wgpu::Device,
        scene_view: &wgpu::TextureView,
        width: u32,
        height: u32,
        output_format: wgpu::TextureFormat,
        params: BloomParams,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/bloom.wgsl").into()),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/bloom_composite.wgsl").into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let uniform_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Pass Bind Group Layout"),
            entries: &[
                uniform_entry,
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Composite Bind Group Layout"),
            entries: &[
                uniform_entry,
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                texture_entry(5),
            ],
        });

        let fullscreen_pipeline = |label: &str,
                                   module: &wgpu::ShaderModule,
                                   layout: &wgpu::BindGroupLayout,
                                   entry_point: &str,
                                   format: wgpu::TextureFormat|
         -> wgpu::RenderPipeline {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(entry_point),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let bright_pipeline =
            fullscreen_pipeline("Bloom Bright Pipeline", &shader, &pass_layout, "fs_bright", HDR_FORMAT);
        let blur_pipeline =
            fullscreen_pipeline("Bloom Blur Pipeline", &shader, &pass_layout, "fs_blur", HDR_FORMAT);
        let composite_pipeline = fullscreen_pipeline(
            "Bloom Composite Pipeline",
            &composite_shader,
            &composite_layout,
            "fs_main",
            output_format,
        );

        let composite_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Composite Uniforms"),
            contents: bytemuck::bytes_of(&CompositeUniforms::new(&params)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let targets = Self::build_targets(
            device,
            &pass_layout,
            &composite_layout,
            &sampler,
            &composite_uniforms,
            &params,
            scene_view,
            width,
            height,
        );

        log::info!(
            "Bloom: strength {:.2}, radius {:.2}, threshold {:.2}, {} levels",
            params.strength,
            params.radius,
            params.threshold,
            BLOOM_LEVELS
        );

        Self {
            params,
            bright_pipeline,
            blur_pipeline,
            composite_pipeline,
            pass_layout,
            composite_layout,
            sampler,
            composite_uniforms,
            targets,
        }
    }

    /// Recreate size-dependent targets; `scene_view` is the new scene target
    pub fn resize(&mut self, device: &wgpu::Device, scene_view: &wgpu::TextureView, width: u32, height: u32) {
        self.targets = Self::build_targets(
            device,
            &self.pass_layout,
            &self.composite_layout,
            &self.sampler,
            &self.composite_uniforms,
            &self.params,
            scene_view,
            width,
            height,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn build_targets(
        device: &wgpu::Device,
        pass_layout: &wgpu::BindGroupLayout,
        composite_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        composite_uniforms: &wgpu::Buffer,
        params: &BloomParams,
        scene_view: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> BloomTargets {
        let pass_bind = |label: &str, uniforms: BloomUniforms, input: &wgpu::TextureView| {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            // The bind group keeps the buffer alive
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: pass_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(input),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        };

        let sizes = level_sizes(width, height);
        let bright = HdrTarget::new(device, sizes[0].0, sizes[0].1, "Bloom Bright");
        let bright_bind = pass_bind("Bloom Bright", BloomUniforms::bright(params.threshold), scene_view);

        let mut levels: Vec<BlurLevel> = Vec::with_capacity(BLOOM_LEVELS);
        for (i, &size) in sizes.iter().enumerate() {
            let horizontal = HdrTarget::new(device, size.0, size.1, "Bloom Blur H");
            let vertical = HdrTarget::new(device, size.0, size.1, "Bloom Blur V");
            let radius = KERNEL_RADII[i];

            let input = match levels.last() {
                Some(previous) => &previous.vertical.view,
                None => &bright.view,
            };
            let horizontal_bind = pass_bind("Bloom Blur H", BloomUniforms::blur(size, [1.0, 0.0], radius), input);
            let vertical_bind = pass_bind(
                "Bloom Blur V",
                BloomUniforms::blur(size, [0.0, 1.0], radius),
                &horizontal.view,
            );

            levels.push(BlurLevel {
                horizontal,
                vertical,
                horizontal_bind,
                vertical_bind,
            });
        }

        let composite_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Composite Bind Group"),
            layout: composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: composite_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&levels[0].vertical.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&levels[1].vertical.view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&levels[2].vertical.view),
                },
            ],
        });

        BloomTargets {
            bright,
            bright_bind,
            levels,
            composite_bind,
        }
    }

    /// Record bright pass, blur levels and the composite into `output`
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, output: &wgpu::TextureView) {
        let targets = &self.targets;

        fullscreen_pass(
            encoder,
            "Bloom Bright Pass",
            &targets.bright.view,
            &self.bright_pipeline,
            &targets.bright_bind,
        );

        for level in &targets.levels {
            fullscreen_pass(
                encoder,
                "Bloom Blur H Pass",
                &level.horizontal.view,
                &self.blur_pipeline,
                &level.horizontal_bind,
            );
            fullscreen_pass(
                encoder,
                "Bloom Blur V Pass",
                &level.vertical.view,
                &self.blur_pipeline,
                &level.vertical_bind,
            );
        }

        fullscreen_pass(
            encoder,
            "Bloom Composite Pass",
            output,
            &self.composite_pipeline,
            &targets.composite_bind,
        );
    }
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
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
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_shaders() {
        assert_eq!(std::mem::size_of::<BloomUniforms>(), 32);
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 32);
    }

    #[test]
    fn test_level_factors_at_zero_radius_are_base_weights() {
        assert_eq!(level_factors(0.0), [1.0, 0.8, 0.6, 0.0]);
    }

    #[test]
    fn test_level_factors_at_default_radius() {
        let f = level_factors(0.4);
        // 1.0 -> 0.68, 0.8 -> 0.64, 0.6 -> 0.6
        assert!((f[0] - 0.68).abs() < 1e-6);
        assert!((f[1] - 0.64).abs() < 1e-6);
        assert!((f[2] - 0.6).abs() < 1e-6);
        assert_eq!(f[3], 0.0);
    }

    #[test]
    fn test_full_radius_favours_wide_levels() {
        let f = level_factors(1.0);
        assert!(f[2] > f[0]);
    }

    #[test]
    fn test_level_sizes_halve() {
        assert_eq!(level_sizes(1280, 720), [(640, 360), (320, 180), (160, 90)]);
        assert_eq!(level_sizes(3, 2), [(1, 1), (1, 1), (1, 1)]);
    }

    #[test]
    fn test_params_from_settings() {
        let params = BloomParams::from(&BloomSettings::default());
        assert_eq!(
            params,
            BloomParams {
                strength: 0.8,
                radius: 0.4,
                threshold: 0.85
            }
        );
    }

    #[test]
    fn test_blur_uniforms_use_level_texel() {
        let u = BloomUniforms::blur((320, 180), [1.0, 0.0], 5);
        assert_eq!(u.texel_size, [1.0 / 320.0, 1.0 / 180.0]);
        assert_eq!(u.sigma, 5.0);
        assert_eq!(u.kernel_radius, 5.0);
    }
}
