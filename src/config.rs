//! Application configuration
//!
//! Settings are read from a JSON file. Every field has a default matching the
//! stock look of the effect, so an absent file or a partial file is fine.
//! The file is located through `PERSON_GLOW_CONFIG`, falling back to
//! `person-glow.json` in the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GlowError, Result};
use crate::ml::{InternalResolution, MaskColors, SegmentationConfig};

/// Environment variable holding an explicit config path
pub const CONFIG_ENV: &str = "PERSON_GLOW_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "person-glow.json";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlowConfig {
    pub window: WindowSettings,
    pub camera: CameraSettings,
    pub particles: ParticleSettings,
    pub bloom: BloomSettings,
    pub segmentation: SegmentationSettings,
    pub view: ViewSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Redraw pacing target
    pub target_fps: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Person Glow".to_string(),
            width: 1280,
            height: 720,
            target_fps: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Device index (0 is the system default camera)
    pub index: u32,
    /// How long to wait for the device to open, in milliseconds
    pub open_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            open_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSettings {
    pub count: usize,
    /// Sprite size in world units
    pub size: f32,
    pub opacity: f32,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            count: 170_000,
            size: 0.05,
            opacity: 0.8,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub strength: f32,
    pub radius: f32,
    /// Luminance above which pixels start to glow
    pub threshold: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            strength: 0.8,
            radius: 0.4,
            threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    pub flip_horizontal: bool,
    pub internal_resolution: InternalResolution,
    pub threshold: f32,
    /// Explicit model file; searched in `models/` when absent
    pub model_path: Option<PathBuf>,
    /// Pause between polls of the camera feed
    pub loop_delay_ms: u64,
    pub mask_colors: MaskColors,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            flip_horizontal: false,
            internal_resolution: InternalResolution::High,
            threshold: 0.7,
            model_path: None,
            loop_delay_ms: 1,
            mask_colors: MaskColors::default(),
        }
    }
}

impl SegmentationSettings {
    /// Per-call segmentation parameters
    pub fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig {
            flip_horizontal: self.flip_horizontal,
            internal_resolution: self.internal_resolution,
            threshold: self.threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Distance of the camera from the origin along +Z
    pub camera_z: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            fov_degrees: 50.0,
            near: 0.1,
            far: 1000.0,
            camera_z: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Show the diagnostics panel at startup
    pub visible: bool,
}

impl GlowConfig {
    /// Load the config from `PERSON_GLOW_CONFIG` or the working directory
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    log::info!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                path
            }
        };

        Self::load_from_path(&path)
    }

    /// Load and validate a config file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GlowError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GlowError::Config(format!("failed to parse JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer or the sampler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.particles.count == 0 {
            return Err(GlowError::Config("particles.count must be positive".into()));
        }
        if !(self.particles.size > 0.0) {
            return Err(GlowError::Config("particles.size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.particles.opacity) {
            return Err(GlowError::Config("particles.opacity must be within [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.segmentation.threshold) {
            return Err(GlowError::Config(
                "segmentation.threshold must be within [0, 1]".into(),
            ));
        }
        if self.bloom.strength < 0.0 || self.bloom.radius < 0.0 || self.bloom.threshold < 0.0 {
            return Err(GlowError::Config("bloom parameters must not be negative".into()));
        }
        if !(self.view.near > 0.0 && self.view.far > self.view.near) {
            return Err(GlowError::Config("view clip planes must satisfy 0 < near < far".into()));
        }
        if !(self.view.fov_degrees > 0.0 && self.view.fov_degrees < 180.0) {
            return Err(GlowError::Config("view.fov_degrees must be within (0, 180)".into()));
        }
        if self.window.target_fps == 0 {
            return Err(GlowError::Config("window.target_fps must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_stock_effect() {
        let config = GlowConfig::default();
        assert_eq!(config.particles.count, 170_000);
        assert_eq!(config.particles.size, 0.05);
        assert_eq!(config.particles.opacity, 0.8);
        assert_eq!(config.bloom.strength, 0.8);
        assert_eq!(config.bloom.radius, 0.4);
        assert_eq!(config.bloom.threshold, 0.85);
        assert_eq!(config.segmentation.threshold, 0.7);
        assert_eq!(config.segmentation.internal_resolution, InternalResolution::High);
        assert!(!config.segmentation.flip_horizontal);
        assert_eq!(config.view.fov_degrees, 50.0);
        assert_eq!(config.view.camera_z, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = GlowConfig::from_json(
            r#"{ "particles": { "count": 5000, "seed": 7 }, "bloom": { "strength": 1.5 } }"#,
        )
        .unwrap();

        assert_eq!(config.particles.count, 5000);
        assert_eq!(config.particles.seed, Some(7));
        assert_eq!(config.particles.size, 0.05);
        assert_eq!(config.bloom.strength, 1.5);
        assert_eq!(config.bloom.radius, 0.4);
        assert_eq!(config.window, WindowSettings::default());
    }

    #[test]
    fn test_internal_resolution_parses_lowercase() {
        let config =
            GlowConfig::from_json(r#"{ "segmentation": { "internal_resolution": "medium" } }"#)
                .unwrap();
        assert_eq!(config.segmentation.internal_resolution, InternalResolution::Medium);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(GlowConfig::from_json(r#"{ "particles": { "count": 0 } }"#).is_err());
        assert!(GlowConfig::from_json(r#"{ "segmentation": { "threshold": 1.5 } }"#).is_err());
        assert!(GlowConfig::from_json(r#"{ "view": { "near": 10.0, "far": 1.0 } }"#).is_err());
        assert!(GlowConfig::from_json(r#"{ "window": { "target_fps": 0 } }"#).is_err());
        assert!(GlowConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "camera": {{ "index": 2 }}, "overlay": {{ "visible": true }} }}"#)
            .unwrap();

        let config = GlowConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.camera.index, 2);
        assert!(config.overlay.visible);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = GlowConfig::load_from_path(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(GlowError::Config(_))));
    }

    #[test]
    fn test_segmentation_config_from_settings() {
        let settings = SegmentationSettings {
            flip_horizontal: true,
            threshold: 0.4,
            ..Default::default()
        };
        let seg = settings.segmentation_config();
        assert!(seg.flip_horizontal);
        assert_eq!(seg.threshold, 0.4);
        assert_eq!(seg.internal_resolution, InternalResolution::High);
    }
}
