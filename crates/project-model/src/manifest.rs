//! Export manifest: the JSON document describing one export.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::media::{MediaSource, ModelError};
use crate::overlay::{Overlay, Position};
use crate::quality::{BackendKind, Container, QualityPreset};

/// Everything needed to run an export, as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Manifest format version.
    #[serde(default = "default_version")]
    pub version: String,

    /// The base clip.
    pub source: MediaSource,

    /// Overlays in caller order. Trailer slides play in this order.
    #[serde(default)]
    pub overlays: Vec<Overlay>,

    #[serde(default)]
    pub quality: QualityPreset,

    /// Backend override; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Container override; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl ExportManifest {
    pub fn new(source: MediaSource) -> Self {
        Self {
            version: default_version(),
            source,
            overlays: vec![],
            quality: QualityPreset::default(),
            backend: None,
            container: None,
        }
    }

    /// Read a manifest. Relative media and asset paths are resolved against
    /// the manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ModelError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut manifest: ExportManifest =
            serde_json::from_str(&json).map_err(|e| ModelError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ModelError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ModelError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ModelError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.source.path);
        for overlay in &mut self.overlays {
            match overlay {
                Overlay::Watermark(w) => join(&mut w.image.path),
                Overlay::TrailerSlide(s) => join(&mut s.image.path),
                Overlay::Caption(_) => {}
            }
        }
    }

    /// Report problems that would make the export differ from what the
    /// manifest describes. Nothing here is rejected: the engine clamps
    /// intervals and skips or fails on assets depending on backend.
    pub fn validate(&self, source: &MediaSource) -> Vec<String> {
        let mut issues = vec![];
        let duration = source.duration_secs;

        if let Err(e) = source.validate() {
            issues.push(e.to_string());
        }
        if !source.path.exists() {
            issues.push(format!("Source missing: {}", source.path.display()));
        }

        let check_position = |label: &str, position: &Position, issues: &mut Vec<String>| {
            if let Position::Custom { x, y } = position {
                let in_range = |v: f64| (0.0..=100.0).contains(&v);
                if !in_range(*x) || !in_range(*y) {
                    issues.push(format!(
                        "{label}: custom position ({x}, {y}) outside 0-100%"
                    ));
                }
            }
        };

        for (i, overlay) in self.overlays.iter().enumerate() {
            match overlay {
                Overlay::Caption(c) => {
                    let label = format!("Caption #{i} {:?}", c.text);
                    if c.text.trim().is_empty() {
                        issues.push(format!("{label}: empty text"));
                    }
                    if c.start_secs < 0.0 || c.start_secs + c.duration_secs > duration {
                        issues.push(format!(
                            "{label}: interval [{}, {}) outside source (0-{duration}s)",
                            c.start_secs,
                            c.start_secs + c.duration_secs
                        ));
                    }
                    if c.visible_interval(duration).is_none() {
                        issues.push(format!("{label}: never visible"));
                    }
                    check_position(&label, &c.style.position, &mut issues);
                }
                Overlay::Watermark(w) => {
                    let label = format!("Watermark #{i}");
                    if w.start_secs > w.end_secs {
                        issues.push(format!(
                            "{label}: start {} is after end {}",
                            w.start_secs, w.end_secs
                        ));
                    } else if w.start_secs < 0.0 || w.end_secs > duration {
                        issues.push(format!(
                            "{label}: interval [{}, {}] outside source (0-{duration}s)",
                            w.start_secs, w.end_secs
                        ));
                    }
                    if !w.image.path.exists() {
                        issues.push(format!("{label}: image missing: {}", w.image.path.display()));
                    }
                    check_position(&label, &w.position, &mut issues);
                }
                Overlay::TrailerSlide(s) => {
                    let label = format!("Trailer slide #{i}");
                    if s.duration_secs <= 0.0 {
                        issues.push(format!("{label}: non-positive duration {}", s.duration_secs));
                    }
                    if !s.image.path.exists() {
                        issues.push(format!("{label}: image missing: {}", s.image.path.display()));
                    }
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ImageAsset;
    use crate::overlay::{Caption, TrailerSlide, Watermark};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overlaycut_manifest_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_and_load_resolves_relative_paths() {
        let dir = temp_dir("roundtrip");
        let mut manifest = ExportManifest::new(MediaSource::new("clip.mp4", 10.0, 1280, 720));
        manifest.overlays.push(Overlay::Watermark(Watermark::new(
            ImageAsset::new("logo.png"),
            0.0,
            10.0,
        )));
        manifest.quality = QualityPreset::High;
        let path = dir.join("export.json");
        manifest.save(&path).unwrap();

        let loaded = ExportManifest::load(&path).unwrap();
        assert_eq!(loaded.source.path, dir.join("clip.mp4"));
        assert_eq!(loaded.quality, QualityPreset::High);
        match &loaded.overlays[0] {
            Overlay::Watermark(w) => assert_eq!(w.image.path, dir.join("logo.png")),
            other => panic!("unexpected overlay {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = temp_dir("parse_error");
        let path = dir.join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ExportManifest::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validate_reports_without_rejecting() {
        let dir = temp_dir("validate");
        let clip = dir.join("clip.mp4");
        std::fs::write(&clip, b"stub").unwrap();
        let source = MediaSource::new(&clip, 10.0, 1280, 720);

        let mut manifest = ExportManifest::new(source.clone());
        manifest.overlays = vec![
            Overlay::Caption(Caption::new("Hi", 2.0, 3.0)),
            Overlay::Caption(Caption::new("Late", 9.0, 5.0)),
            Overlay::Watermark(
                Watermark::new(ImageAsset::new(dir.join("nope.png")), 0.0, 10.0)
                    .with_position(Position::custom(120.0, 50.0)),
            ),
            Overlay::TrailerSlide(TrailerSlide::new(ImageAsset::new(dir.join("end.png")), 0.0)),
        ];

        let issues = manifest.validate(&source);
        assert!(issues.iter().any(|i| i.contains("Caption #1")));
        assert!(!issues.iter().any(|i| i.contains("Caption #0")));
        assert!(issues.iter().any(|i| i.contains("image missing")));
        assert!(issues.iter().any(|i| i.contains("outside 0-100%")));
        assert!(issues.iter().any(|i| i.contains("non-positive duration")));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
