//! Media handles: the base clip and still-image assets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The base clip an export starts from.
///
/// Immutable once probed; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    /// Path to the media file.
    pub path: PathBuf,

    /// Duration in seconds.
    pub duration_secs: f64,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Whether the probe reported an audio stream.
    #[serde(default)]
    pub has_audio: bool,

    /// Native frame rate, when known.
    #[serde(default)]
    pub fps: Option<f64>,
}

impl MediaSource {
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            duration_secs,
            width,
            height,
            has_audio: false,
            fps: None,
        }
    }

    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }

    /// Check the handle describes something renderable.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(ModelError::InvalidSource {
                message: format!("duration must be positive, got {}", self.duration_secs),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::InvalidSource {
                message: format!("dimensions must be non-zero, got {}x{}", self.width, self.height),
            });
        }
        Ok(())
    }

    /// Output dimensions rounded down to even values, as required by
    /// 4:2:0 chroma subsampling.
    pub fn even_dimensions(&self) -> (u32, u32) {
        ((self.width / 2 * 2).max(2), (self.height / 2 * 2).max(2))
    }
}

/// Handle to a still image used by a watermark or trailer slide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageAsset {
    pub path: PathBuf,
}

impl ImageAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Errors raised by model validation and manifest I/O.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid media source: {message}")]
    InvalidSource { message: String },

    #[error("Invalid color {value:?}: expected #rgb or #rrggbb")]
    InvalidColor { value: String },

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_duration() {
        let source = MediaSource::new("clip.mp4", 0.0, 1920, 1080);
        assert!(source.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let source = MediaSource::new("clip.mp4", 10.0, 0, 1080);
        let err = source.validate().unwrap_err();
        assert!(err.to_string().contains("0x1080"));
    }

    #[test]
    fn test_even_dimensions() {
        let source = MediaSource::new("clip.mp4", 10.0, 1281, 719);
        assert_eq!(source.even_dimensions(), (1280, 718));
    }

    #[test]
    fn test_image_asset_serializes_as_path() {
        let asset = ImageAsset::new("/tmp/logo.png");
        assert_eq!(serde_json::to_string(&asset).unwrap(), "\"/tmp/logo.png\"");
    }
}
