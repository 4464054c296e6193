//! Quality presets, output containers, and backend-specific encoder profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User-facing quality selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Balanced,
    High,
}

/// Rendering strategy used to produce the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Declarative filter graph handed to an external transcoder.
    #[default]
    FilterGraph,
    /// Per-frame compositing fed straight into an encoder.
    FrameCapture,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Webm,
}

impl Container {
    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    pub fn video_codec(self) -> &'static str {
        match self {
            Container::Mp4 => "libx264",
            Container::Webm => "libvpx-vp9",
        }
    }

    pub fn audio_codec(self) -> &'static str {
        match self {
            Container::Mp4 => "aac",
            Container::Webm => "libopus",
        }
    }
}

/// Encoder parameters for one backend, derived from a preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum QualityProfile {
    FilterGraph {
        crf: u8,
        preset: String,
        max_bitrate_kbps: Option<u32>,
    },
    FrameCapture {
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    },
}

impl QualityProfile {
    pub fn for_backend(preset: QualityPreset, backend: BackendKind) -> Self {
        match backend {
            BackendKind::FilterGraph => {
                let (crf, x264_preset, max_bitrate_kbps) = match preset {
                    QualityPreset::Low => (30, "veryfast", Some(1500)),
                    QualityPreset::Balanced => (23, "medium", Some(5000)),
                    QualityPreset::High => (18, "slow", None),
                };
                QualityProfile::FilterGraph {
                    crf,
                    preset: x264_preset.to_string(),
                    max_bitrate_kbps,
                }
            }
            BackendKind::FrameCapture => {
                let (video_bitrate_kbps, audio_bitrate_kbps) = match preset {
                    QualityPreset::Low => (1500, 96),
                    QualityPreset::Balanced => (5000, 128),
                    QualityPreset::High => (10000, 192),
                };
                QualityProfile::FrameCapture {
                    video_bitrate_kbps,
                    audio_bitrate_kbps,
                }
            }
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            QualityProfile::FilterGraph { .. } => BackendKind::FilterGraph,
            QualityProfile::FrameCapture { .. } => BackendKind::FrameCapture,
        }
    }

    /// Audio bitrate for the output track.
    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            QualityProfile::FilterGraph { .. } => 128,
            QualityProfile::FrameCapture {
                audio_bitrate_kbps, ..
            } => *audio_bitrate_kbps,
        }
    }
}

macro_rules! impl_kebab_str {
    ($ty:ty, $($variant:path => $name:literal),+ $(,)?) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(format!(
                        "unknown {} {:?}; expected one of: {}",
                        stringify!($ty),
                        other,
                        [$($name),+].join(", ")
                    )),
                }
            }
        }
    };
}

impl_kebab_str!(QualityPreset,
    QualityPreset::Low => "low",
    QualityPreset::Balanced => "balanced",
    QualityPreset::High => "high",
);

impl_kebab_str!(BackendKind,
    BackendKind::FilterGraph => "filter-graph",
    BackendKind::FrameCapture => "frame-capture",
);

impl_kebab_str!(Container,
    Container::Mp4 => "mp4",
    Container::Webm => "webm",
);
