//! Mask diagnostics view
//!
//! Draws the person mask as a grayscale image into an offscreen surface.
//! Nothing in the particle pipeline reads this back; it only feeds the
//! diagnostics overlay and PNG snapshots.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::error::Result;
use crate::ml::PersonMask;

/// Grayscale image of the mask alpha (RGB = alpha, A = 255)
pub fn grayscale_from_alpha(mask: &PersonMask) -> RgbaImage {
    let mut image = RgbaImage::new(mask.width, mask.height);
    write_grayscale(&mut image, mask);
    image
}

fn write_grayscale(image: &mut RgbaImage, mask: &PersonMask) {
    for (pixel, src) in image.pixels_mut().zip(mask.data.chunks_exact(4)) {
        let alpha = src[3];
        *pixel = Rgba([alpha, alpha, alpha, 255]);
    }
}

/// Offscreen surface holding the latest mask image
pub struct MaskView {
    image: RgbaImage,
    /// Bumped on every draw so consumers can skip unchanged images
    generation: u64,
}

impl MaskView {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            generation: 0,
        }
    }

    /// Draw a mask, resizing the surface to match it
    pub fn draw(&mut self, mask: &PersonMask) {
        if self.image.dimensions() != (mask.width, mask.height) {
            self.image = RgbaImage::new(mask.width, mask.height);
        }
        write_grayscale(&mut self.image, mask);
        self.generation += 1;
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.generation == 0
    }

    /// Write the current image as PNG
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        log::info!("Saved mask snapshot to {}", path.display());
        Ok(())
    }
}

impl Default for MaskView {
    fn default() -> Self {
        Self::new()
    }
}
