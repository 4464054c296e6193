//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Export engine defaults.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Preferred backend: `filter-graph` or `frame-capture`.
    pub backend: String,

    /// Quality preset: `low`, `balanced`, or `high`.
    pub quality: String,

    /// Output container: `mp4` or `webm`.
    pub container: String,

    /// Fixed frame rate for rendered output and trailer slides.
    pub target_fps: u32,

    /// ffmpeg executable (name on PATH or absolute path).
    pub ffmpeg_bin: String,

    /// ffprobe executable (name on PATH or absolute path).
    pub ffprobe_bin: String,

    /// Font used for caption rasterization in the frame-capture backend and
    /// passed as `fontfile` to the filter graph when set.
    pub font_path: Option<PathBuf>,

    /// Caption distance from container edges, in pixels.
    pub caption_margin_px: u32,

    /// Watermark distance from container edges, in pixels.
    pub watermark_margin_px: u32,

    /// Frames the encoder sink may buffer before the render loop waits.
    pub sink_queue_frames: usize,

    /// Parent directory for per-session scratch space (defaults to the
    /// system temp dir).
    pub work_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "overlaycut=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            backend: "filter-graph".to_string(),
            quality: "balanced".to_string(),
            container: "mp4".to_string(),
            target_fps: 30,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            font_path: None,
            caption_margin_px: 24,
            watermark_margin_px: 16,
            sink_queue_frames: 8,
            work_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("overlaycut").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{ "export": { "target_fps": 24 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.export.target_fps, 24);
        assert_eq!(config.export.backend, "filter-graph");
        assert_eq!(config.export.sink_queue_frames, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = AppConfig::default();
        config.export.font_path = Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.export.font_path, config.export.font_path);
    }
}
