//! Effects module
//!
//! CPU side of the glow effect: the particle cloud driven by the person
//! mask, and the grayscale mask view used for diagnostics.

pub mod mask_view;
pub mod particle_cloud;

pub use mask_view::MaskView;
pub use particle_cloud::ParticleCloud;
