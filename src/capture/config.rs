//! Capture session configuration.
//!
//! The host supplies geometry, frame rate, capture mode and the raw camera
//! tuning string. The still-mode minimum delay defaults to one frame period
//! at the configured frame rate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::firmware::DEFAULT_CAMERA;

/// Highest frame rate the camera modes support.
const MAX_FRAMERATE: u32 = 90;

/// How frames are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureModeKind {
    /// Continuous streaming from the video port.
    #[default]
    Video,
    /// Rate-limited one-shot captures from the still port.
    Still,
}

/// Capture mode with the parameters each variant needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Video {
        width: u32,
        height: u32,
        framerate: u32,
    },
    Still {
        width: u32,
        height: u32,
    },
}

impl CaptureMode {
    /// Target frame size in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            Self::Video { width, height, .. } | Self::Still { width, height } => (width, height),
        }
    }

    pub fn is_still(&self) -> bool {
        matches!(self, Self::Still { .. })
    }
}

/// Configuration for one capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Firmware component name of the camera.
    pub camera_name: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub framerate: u32,
    pub mode: CaptureModeKind,
    /// Whitespace-separated `-key value` camera tuning directives.
    pub control_params: Option<String>,
    /// Minimum time between still captures, overriding `1000 / framerate` ms.
    pub min_capture_interval_ms: Option<u64>,
    /// Delay after the first still trigger so exposure can settle.
    pub still_settle_ms: u64,
    /// File that receives the raw bytes of every delivered frame.
    pub raw_capture_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_name: DEFAULT_CAMERA.to_owned(),
            width: 640,
            height: 480,
            framerate: 15,
            mode: CaptureModeKind::Video,
            control_params: None,
            min_capture_interval_ms: None,
            still_settle_ms: 2500,
            raw_capture_path: None,
        }
    }
}

impl CaptureConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_name.trim().is_empty() {
            return Err(ConfigError::MissingCameraName);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::OddDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.framerate == 0 || self.framerate > MAX_FRAMERATE {
            return Err(ConfigError::InvalidFrameRate);
        }
        Ok(())
    }

    /// The capture mode variant for this configuration.
    pub fn capture_mode(&self) -> CaptureMode {
        match self.mode {
            CaptureModeKind::Video => CaptureMode::Video {
                width: self.width,
                height: self.height,
                framerate: self.framerate,
            },
            CaptureModeKind::Still => CaptureMode::Still {
                width: self.width,
                height: self.height,
            },
        }
    }

    /// Minimum delay between still triggers.
    pub fn min_capture_interval(&self) -> Duration {
        match self.min_capture_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => Duration::from_millis(1000 / u64::from(self.framerate.max(1))),
        }
    }

    pub fn still_settle(&self) -> Duration {
        Duration::from_millis(self.still_settle_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("camera name must not be empty")]
    MissingCameraName,
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("frame dimensions {width}x{height} must be even for planar 4:2:0")]
    OddDimensions { width: u32, height: u32 },
    #[error("invalid frame rate (must be 1-90 fps)")]
    InvalidFrameRate,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration for the capture binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run until interrupted (true) or fetch a fixed number of frames (false).
    pub continuous: bool,
    /// Number of frames to fetch if not continuous.
    pub frame_count: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            frame_count: 30,
            metrics_port: 0,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = CaptureConfig::default();
        config.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));
    }

    #[test]
    fn test_odd_dimensions_invalid() {
        let config = CaptureConfig::with_dimensions(641, 480);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OddDimensions { width: 641, .. })
        ));
    }

    #[test]
    fn test_min_interval_defaults_to_frame_period() {
        let mut config = CaptureConfig::default();
        config.framerate = 4;
        assert_eq!(config.min_capture_interval(), Duration::from_millis(250));

        config.min_capture_interval_ms = Some(2000);
        assert_eq!(config.min_capture_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_capture_mode_variant() {
        let mut config = CaptureConfig::with_dimensions(320, 240);
        assert_eq!(
            config.capture_mode(),
            CaptureMode::Video {
                width: 320,
                height: 240,
                framerate: 15
            }
        );

        config.mode = CaptureModeKind::Still;
        assert!(config.capture_mode().is_still());
        assert_eq!(config.capture_mode().dimensions(), (320, 240));
    }

    #[test]
    fn test_file_config_from_toml() {
        let config = FileConfig::from_toml(
            r#"
            [capture]
            width = 1296
            height = 972
            framerate = 2
            mode = "still"
            control_params = "-ss 20000 -ISO 400"
            min_capture_interval_ms = 1500

            [output]
            frame_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.width, 1296);
        assert_eq!(config.capture.mode, CaptureModeKind::Still);
        assert_eq!(config.capture.camera_name, DEFAULT_CAMERA);
        assert_eq!(config.capture.min_capture_interval(), Duration::from_millis(1500));
        assert_eq!(config.output.frame_count, 5);
        assert!(!config.output.continuous);
    }

    #[test]
    fn test_file_config_rejects_invalid_capture() {
        let result = FileConfig::from_toml("[capture]\nframerate = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidFrameRate)));
    }
}
