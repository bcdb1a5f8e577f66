//! ML inference module
//!
//! Person segmentation using ONNX Runtime. The model is the MediaPipe selfie
//! segmentation network from the PINTO Model Zoo: a 256x256 NHWC float input
//! and a 256x256 person-probability output.
//!
//! Inference itself stays behind the `Segmenter` trait; everything after the
//! raw probabilities (resampling, flipping, thresholding, mask colouring) is
//! plain Rust in this module.

use std::path::{Path, PathBuf};

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::camera::CameraFrame;
use crate::error::{GlowError, Result};

/// Model file looked up in the models directory
pub const MODEL_FILE: &str = "selfie_segmentation.onnx";

/// Model input/output edge length
const SEG_WIDTH: u32 = 256;
const SEG_HEIGHT: u32 = 256;

/// Working resolution the frame is reduced to before inference
///
/// Lower tiers discard detail before the model sees the frame. The mask is
/// always produced at the frame's own size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalResolution {
    Low,
    Medium,
    #[default]
    High,
    Full,
}

impl InternalResolution {
    /// Scale factor applied to the frame dimensions
    pub fn scale(self) -> f32 {
        match self {
            InternalResolution::Low => 0.25,
            InternalResolution::Medium => 0.5,
            InternalResolution::High => 0.75,
            InternalResolution::Full => 1.0,
        }
    }

    /// Working size for a frame of the given size (never zero)
    pub fn input_size(self, frame_width: u32, frame_height: u32) -> (u32, u32) {
        let scale = self.scale();
        let w = ((frame_width as f32 * scale).round() as u32).max(1);
        let h = ((frame_height as f32 * scale).round() as u32).max(1);
        (w, h)
    }
}

/// Per-call segmentation parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentationConfig {
    /// Mirror the mask horizontally
    pub flip_horizontal: bool,
    pub internal_resolution: InternalResolution,
    /// Probability above which a pixel counts as person
    pub threshold: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            flip_horizontal: false,
            internal_resolution: InternalResolution::High,
            threshold: 0.7,
        }
    }
}

/// Binary person segmentation (1 = person, 0 = background)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segmentation {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Segmentation {
    /// Build a segmentation from a raw probability map
    ///
    /// The map is resampled (nearest neighbour) to `frame_width x frame_height`,
    /// optionally mirrored, and thresholded.
    pub fn from_probabilities(
        probabilities: &[f32],
        map_width: u32,
        map_height: u32,
        frame_width: u32,
        frame_height: u32,
        config: &SegmentationConfig,
    ) -> Self {
        let (width, height) = (frame_width, frame_height);
        let mut data = vec![0u8; (width * height) as usize];

        if map_width == 0 || map_height == 0 || width == 0 || height == 0 {
            return Self { data, width, height };
        }

        for y in 0..height {
            let src_y = (y as u64 * map_height as u64 / height as u64) as u32;
            for x in 0..width {
                let sample_x = if config.flip_horizontal { width - 1 - x } else { x };
                let src_x = (sample_x as u64 * map_width as u64 / width as u64) as u32;
                let idx = (src_y * map_width + src_x) as usize;
                let p = probabilities.get(idx).copied().unwrap_or(0.0);
                if p > config.threshold {
                    data[(y * width + x) as usize] = 1;
                }
            }
        }

        Self { data, width, height }
    }

    /// Number of person pixels
    pub fn person_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

/// Colours used when turning a segmentation into a mask image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskColors {
    /// RGBA for person pixels
    pub foreground: [u8; 4],
    /// RGBA for background pixels
    pub background: [u8; 4],
}

impl Default for MaskColors {
    fn default() -> Self {
        Self {
            foreground: [0, 0, 0, 255],
            background: [0, 0, 0, 0],
        }
    }
}

/// RGBA mask image of a segmentation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonMask {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PersonMask {
    /// Wrap raw RGBA data, checking its length
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(GlowError::Inference(format!(
                "mask buffer has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { data, width, height })
    }

    /// Mask with every pixel set to the same colour
    pub fn uniform(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { data, width, height }
    }

    /// Colour a segmentation
    pub fn from_segmentation(segmentation: &Segmentation, colors: &MaskColors) -> Self {
        let mut data = Vec::with_capacity(segmentation.data.len() * 4);
        for &flag in &segmentation.data {
            let rgba = if flag != 0 { colors.foreground } else { colors.background };
            data.extend_from_slice(&rgba);
        }
        Self {
            data,
            width: segmentation.width,
            height: segmentation.height,
        }
    }

    /// Alpha at (x, y); zero outside the mask
    #[inline]
    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let idx = ((y * self.width + x) * 4 + 3) as usize;
        self.data.get(idx).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Segmentation backend
pub trait Segmenter: Send {
    fn segment(&mut self, frame: &CameraFrame, config: &SegmentationConfig) -> Result<Segmentation>;
}

/// ONNX Runtime segmentation session
pub struct OrtSegmenter {
    session: ort::session::Session,
}

impl OrtSegmenter {
    /// Initialize ONNX Runtime and load the model
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(GlowError::Model(format!(
                "segmentation model not found: {}",
                model_path.display()
            )));
        }

        ort::init()
            .with_name("PersonGlow")
            .commit()
            .map_err(|e| GlowError::Model(format!("failed to initialize ORT: {}", e)))?;

        let session = ort::session::Session::builder()
            .map_err(|e| GlowError::Model(format!("failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| GlowError::Model(format!("failed to set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| GlowError::Model(format!("failed to load segmentation model: {}", e)))?;

        log::info!("Loaded segmentation model from {}", model_path.display());
        Ok(Self { session })
    }

    /// Run the network and return its raw 256x256 probability map
    fn run_model(&mut self, frame: &CameraFrame, tier: InternalResolution) -> Result<Vec<f32>> {
        let input = preprocess_frame_nhwc(frame, SEG_WIDTH, SEG_HEIGHT, tier);

        let input_array =
            Array4::from_shape_vec((1, SEG_HEIGHT as usize, SEG_WIDTH as usize, 3), input)
                .map_err(|e| GlowError::Inference(format!("failed to create input array: {}", e)))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| GlowError::Inference(format!("failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| GlowError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| GlowError::Inference("no output from segmentation model".into()))?;

        let (_shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| GlowError::Inference(format!("failed to extract output: {}", e)))?;

        Ok(data.iter().map(|&v| v.clamp(0.0, 1.0)).collect())
    }
}

impl Segmenter for OrtSegmenter {
    fn segment(&mut self, frame: &CameraFrame, config: &SegmentationConfig) -> Result<Segmentation> {
        let probabilities = self.run_model(frame, config.internal_resolution)?;
        Ok(Segmentation::from_probabilities(
            &probabilities,
            SEG_WIDTH,
            SEG_HEIGHT,
            frame.width,
            frame.height,
            config,
        ))
    }
}

/// Resize a frame and convert it to NHWC RGB floats in [0, 1]
///
/// The frame is first reduced to the tier's working size, then stretched to
/// `target_width x target_height` (both nearest neighbour).
pub fn preprocess_frame_nhwc(
    frame: &CameraFrame,
    target_width: u32,
    target_height: u32,
    tier: InternalResolution,
) -> Vec<f32> {
    let mut output = vec![0.0f32; (target_width * target_height * 3) as usize];
    if frame.width == 0 || frame.height == 0 {
        return output;
    }

    let (grid_width, grid_height) = tier.input_size(frame.width, frame.height);

    for y in 0..target_height {
        let grid_y = (y as u64 * grid_height as u64 / target_height as u64) as u32;
        let src_y = ((grid_y as u64 * frame.height as u64 / grid_height as u64) as u32).min(frame.height - 1);
        for x in 0..target_width {
            let grid_x = (x as u64 * grid_width as u64 / target_width as u64) as u32;
            let src_x = ((grid_x as u64 * frame.width as u64 / grid_width as u64) as u32).min(frame.width - 1);
            let [r, g, b, _] = frame.pixel(src_x, src_y);

            let out_idx = ((y * target_width + x) * 3) as usize;
            output[out_idx] = r as f32 / 255.0;
            output[out_idx + 1] = g as f32 / 255.0;
            output[out_idx + 2] = b as f32 / 255.0;
        }
    }

    output
}

/// Resolve the model file
///
/// An explicit path wins. Otherwise `models/` is searched next to the
/// executable, two and three levels above it (cargo target dirs), and in
/// the working directory.
pub fn locate_model(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let mut candidates = Vec::new();
    if let Ok(exe_path) = std::env::current_exe() {
        for dir in exe_path.ancestors().skip(1).take(3) {
            candidates.push(dir.join("models"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
    }

    candidates
        .into_iter()
        .map(|dir| dir.join(MODEL_FILE))
        .find(|path| path.exists())
        .ok_or_else(|| {
            GlowError::Model(format!(
                "{} not found. Create a 'models' directory with the ONNX model.",
                MODEL_FILE
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f32, flip: bool, tier: InternalResolution) -> SegmentationConfig {
        SegmentationConfig {
            flip_horizontal: flip,
            internal_resolution: tier,
            threshold,
        }
    }

    #[test]
    fn test_input_size_per_tier() {
        assert_eq!(InternalResolution::Full.input_size(640, 480), (640, 480));
        assert_eq!(InternalResolution::High.input_size(640, 480), (480, 360));
        assert_eq!(InternalResolution::Medium.input_size(640, 480), (320, 240));
        assert_eq!(InternalResolution::Low.input_size(640, 480), (160, 120));
        assert_eq!(InternalResolution::Low.input_size(1, 1), (1, 1));
    }

    #[test]
    fn test_mask_keeps_frame_size_for_every_tier() {
        let probs = vec![1.0; 256 * 256];
        for tier in [
            InternalResolution::Low,
            InternalResolution::Medium,
            InternalResolution::High,
            InternalResolution::Full,
        ] {
            let seg = Segmentation::from_probabilities(&probs, 256, 256, 640, 480, &config(0.7, false, tier));
            assert_eq!((seg.width, seg.height), (640, 480));
            assert_eq!(seg.person_pixels(), 640 * 480);
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let probs = [0.7, 0.71, 0.2, 1.0];
        let seg = Segmentation::from_probabilities(
            &probs,
            4,
            1,
            4,
            1,
            &config(0.7, false, InternalResolution::Full),
        );
        assert_eq!(seg.data, vec![0, 1, 0, 1]);
        assert_eq!(seg.person_pixels(), 2);
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let probs = [1.0, 0.0, 0.0, 0.0];
        let seg = Segmentation::from_probabilities(
            &probs,
            4,
            1,
            4,
            1,
            &config(0.5, true, InternalResolution::Full),
        );
        assert_eq!(seg.data, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_resamples_to_frame_tier() {
        // 2x2 map: left column person, right column background
        let probs = [0.9, 0.1, 0.9, 0.1];
        let seg = Segmentation::from_probabilities(
            &probs,
            2,
            2,
            8,
            4,
            &config(0.5, false, InternalResolution::Full),
        );
        assert_eq!((seg.width, seg.height), (8, 4));
        for y in 0..4 {
            for x in 0..8 {
                let expected = if x < 4 { 1 } else { 0 };
                assert_eq!(seg.data[(y * 8 + x) as usize], expected);
            }
        }
    }

    #[test]
    fn test_mask_colours_follow_segmentation() {
        let seg = Segmentation {
            data: vec![1, 0],
            width: 2,
            height: 1,
        };
        let mask = PersonMask::from_segmentation(&seg, &MaskColors::default());
        assert_eq!(mask.data, vec![0, 0, 0, 255, 0, 0, 0, 0]);
        assert_eq!(mask.alpha_at(0, 0), 255);
        assert_eq!(mask.alpha_at(1, 0), 0);

        let inverted = MaskColors {
            foreground: [0, 0, 0, 0],
            background: [0, 0, 0, 255],
        };
        let mask = PersonMask::from_segmentation(&seg, &inverted);
        assert_eq!(mask.alpha_at(0, 0), 0);
        assert_eq!(mask.alpha_at(1, 0), 255);
    }

    #[test]
    fn test_alpha_outside_mask_is_zero() {
        let mask = PersonMask::uniform(3, 2, [1, 2, 3, 200]);
        assert_eq!(mask.data.len(), 24);
        assert_eq!(mask.alpha_at(2, 1), 200);
        assert_eq!(mask.alpha_at(3, 0), 0);
        assert_eq!(mask.alpha_at(0, 2), 0);
    }

    #[test]
    fn test_person_mask_rejects_bad_length() {
        assert!(PersonMask::new(vec![0; 15], 2, 2).is_err());
        assert!(PersonMask::new(vec![0; 16], 2, 2).is_ok());
    }

    #[test]
    fn test_preprocess_normalizes_rgb() {
        let frame = CameraFrame::new(vec![255, 0, 51, 255], 1, 1, 1);
        let input = preprocess_frame_nhwc(&frame, 2, 2, InternalResolution::Full);
        assert_eq!(input.len(), 12);
        for px in input.chunks(3) {
            assert_eq!(px[0], 1.0);
            assert_eq!(px[1], 0.0);
            assert!((px[2] - 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_preprocess_reduces_to_tier_first() {
        // One row, red channel 0, 85, 170, 255
        let mut data = Vec::new();
        for r in [0u8, 85, 170, 255] {
            data.extend_from_slice(&[r, 0, 0, 255]);
        }
        let frame = CameraFrame::new(data, 4, 1, 1);

        let red = |input: Vec<f32>| -> Vec<u8> { input.chunks(3).map(|px| (px[0] * 255.0).round() as u8).collect() };

        assert_eq!(red(preprocess_frame_nhwc(&frame, 4, 1, InternalResolution::Full)), vec![0, 85, 170, 255]);
        // Medium keeps every other column
        assert_eq!(red(preprocess_frame_nhwc(&frame, 4, 1, InternalResolution::Medium)), vec![0, 0, 170, 170]);
    }

    #[test]
    fn test_locate_model_prefers_explicit_path() {
        let path = Path::new("/tmp/custom.onnx");
        assert_eq!(locate_model(Some(path)).unwrap(), path.to_path_buf());
    }
}
