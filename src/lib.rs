//! Person Glow - webcam person segmentation rendered as glowing particles
//!
//! Captures the webcam, segments the person in each frame with an ONNX
//! model, and moves a cloud of additive point sprites onto the person's
//! silhouette, finished with a bloom pass.

pub mod app;
pub mod camera;
pub mod config;
pub mod effects;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod render;
pub mod ui;

pub use app::App;
pub use config::GlowConfig;
pub use error::{GlowError, Result};
