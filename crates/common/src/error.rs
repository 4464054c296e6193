//! Error types shared across Overlaycut crates.

use std::path::PathBuf;

/// Top-level error type for Overlaycut operations.
#[derive(Debug, thiserror::Error)]
pub enum OverlaycutError {
    #[error("Unsupported capability: {message}")]
    UnsupportedCapability { message: String },

    #[error("Source load failed: {message}")]
    SourceLoad { message: String },

    #[error("Overlay asset {asset} failed to load: {message}")]
    OverlayAssetLoad { asset: PathBuf, message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Encoding engine error: {message}")]
    EncodingEngine { message: String },

    #[error("Finalization error: {message}")]
    Finalization { message: String },

    #[error("Export cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid export state: {message}")]
    InvalidState { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using OverlaycutError.
pub type OverlaycutResult<T> = Result<T, OverlaycutError>;

/// Coarse classification of an error, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedCapability,
    SourceLoad,
    OverlayAssetLoad,
    AudioCapture,
    EncodingEngine,
    Finalization,
    Cancelled,
    Config,
    InvalidState,
    Io,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedCapability => "unsupported_capability",
            ErrorKind::SourceLoad => "source_load",
            ErrorKind::OverlayAssetLoad => "overlay_asset_load",
            ErrorKind::AudioCapture => "audio_capture",
            ErrorKind::EncodingEngine => "encoding_engine",
            ErrorKind::Finalization => "finalization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Io => "io",
            ErrorKind::Other => "other",
        }
    }
}

impl OverlaycutError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            message: msg.into(),
        }
    }

    pub fn source_load(msg: impl Into<String>) -> Self {
        Self::SourceLoad {
            message: msg.into(),
        }
    }

    pub fn asset_load(asset: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::OverlayAssetLoad {
            asset: asset.into(),
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::AudioCapture {
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingEngine {
            message: msg.into(),
        }
    }

    pub fn finalization(msg: impl Into<String>) -> Self {
        Self::Finalization {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedCapability { .. } => ErrorKind::UnsupportedCapability,
            Self::SourceLoad { .. } | Self::FileNotFound { .. } => ErrorKind::SourceLoad,
            Self::OverlayAssetLoad { .. } => ErrorKind::OverlayAssetLoad,
            Self::AudioCapture { .. } => ErrorKind::AudioCapture,
            Self::EncodingEngine { .. } => ErrorKind::EncodingEngine,
            Self::Finalization { .. } => ErrorKind::Finalization,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this error aborts an export session on its own.
    ///
    /// Audio capture failures always degrade to video-only output. Overlay
    /// asset failures are reported as fatal here; the frame-capture backend
    /// downgrades them to warnings before they reach the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::AudioCapture)
    }
}
