//! Error types shared across the application

use thiserror::Error;

/// Errors raised while setting up or running the glow pipeline
#[derive(Debug, Error)]
pub enum GlowError {
    #[error("Camera access failed: {0}")]
    CameraAccess(String),

    #[error("Segmentation model unavailable: {0}")]
    Model(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Graphics initialization failed: {0}")]
    Graphics(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, GlowError>;
