//! Perspective camera and viewport tracking

use glam::{Mat4, Vec3};

use crate::config::ViewSettings;

/// Output size in physical pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Width / height
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Perspective camera looking at the origin
pub struct PerspectiveCamera {
    /// Vertical field of view in radians
    fov_y: f32,
    /// Aspect ratio (width/height) for projection
    aspect: f32,
    /// Near clipping plane
    near: f32,
    /// Far clipping plane
    far: f32,
    position: Vec3,
    target: Vec3,
    /// Cached projection, refreshed by `update_projection_matrix`
    projection: Mat4,
}

impl PerspectiveCamera {
    pub fn new(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            fov_y: fov_degrees.to_radians(),
            aspect,
            near,
            far,
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection_matrix();
        camera
    }

    /// Build from view settings
    pub fn from_settings(settings: &ViewSettings, aspect: f32) -> Self {
        let mut camera = Self::new(settings.fov_degrees, aspect, settings.near, settings.far);
        camera.set_position(Vec3::new(0.0, 0.0, settings.camera_z));
        camera
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Update aspect ratio; call `update_projection_matrix` afterwards
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Recompute the cached projection from fov, aspect and clip planes
    pub fn update_projection_matrix(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    /// Combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }
}

/// Viewport and camera kept in sync
pub struct Projection {
    viewport: Viewport,
    camera: PerspectiveCamera,
}

impl Projection {
    pub fn new(viewport: Viewport, settings: &ViewSettings) -> Self {
        Self {
            camera: PerspectiveCamera::from_settings(settings, viewport.aspect()),
            viewport,
        }
    }

    /// Apply a new output size. Zero-sized requests (minimized windows) are
    /// ignored and return `false`.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.viewport = Viewport::new(width, height);
        self.camera.set_aspect(self.viewport.aspect());
        self.camera.update_projection_matrix();
        true
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }
}
