//! Export orchestration.
//!
//! [`Exporter`] owns one backend and runs exports through it one at a time.
//! Each export gets a fresh [`ExportSession`]; the orchestrator drives the
//! phase sequence, the backend reports progress inside each phase, and the
//! session's workspace is removed whether the export succeeds or not.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use overlaycut_common::config::ExportDefaults;
use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::{
    BackendKind, CompositeTimeline, Container, MediaSource, Overlay, OverlaySet,
    PlacementResolver, QualityPreset, QualityProfile,
};

use crate::ffmpeg::{self, FfmpegTools};
use crate::frame_capture::FrameCaptureBackend;
use crate::graph_backend::FilterGraphBackend;
use crate::progress::{ExportPhase, ProgressCallback};
use crate::session::{ExportSession, ExportWarning};

/// The encoded result of an export.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub async fn write_to(&self, path: &Path) -> OverlaycutResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &self.bytes).await?;
        Ok(())
    }
}

/// What a successful export returns.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub artifact: Artifact,
    /// Non-fatal problems hit along the way.
    pub warnings: Vec<ExportWarning>,
}

/// Everything a backend needs to render one export. Owned so a prepared
/// render can outlive the call that built it.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: MediaSource,
    pub overlays: OverlaySet,
    pub timeline: CompositeTimeline,
    pub profile: QualityProfile,
    pub container: Container,
    /// Output frame size (source size rounded down to even).
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub resolver: PlacementResolver,
    pub font_file: Option<PathBuf>,
}

impl RenderJob {
    /// File name for the finished artifact inside the session workspace.
    pub fn output_name(&self) -> String {
        format!("export.{}", self.container.extension())
    }

    pub fn total_frames(&self) -> u64 {
        self.timeline.frame_count(self.fps)
    }
}

/// Trait for render backends.
///
/// `prepare` runs during the Processing phase and returns a render that
/// owns whatever it loaded. The orchestrator then calls `render` during
/// Rendering and `finalize` during Finalizing.
#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Backend name.
    fn name(&self) -> &str;

    async fn prepare(
        &self,
        job: RenderJob,
        session: &mut ExportSession,
    ) -> OverlaycutResult<Box<dyn PreparedRender>>;
}

/// A render with its inputs resolved.
#[async_trait::async_trait]
pub trait PreparedRender: Send {
    async fn render(&mut self, session: &mut ExportSession) -> OverlaycutResult<()>;

    /// Produce the artifact file and return its path.
    async fn finalize(self: Box<Self>, session: &mut ExportSession) -> OverlaycutResult<PathBuf>;
}

/// Engine settings that do not vary per export.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub container: Container,
    pub target_fps: u32,
    pub resolver: PlacementResolver,
    pub font_file: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub sink_queue_frames: usize,
    pub tools: FfmpegTools,
}

impl Default for ExportSettings {
    fn default() -> Self {
        let config = ExportDefaults::default();
        Self {
            container: Container::default(),
            target_fps: config.target_fps,
            resolver: PlacementResolver::new(config.caption_margin_px, config.watermark_margin_px),
            font_file: None,
            work_dir: None,
            sink_queue_frames: config.sink_queue_frames,
            tools: FfmpegTools::from_config(&config),
        }
    }
}

impl ExportSettings {
    pub fn from_config(config: &ExportDefaults) -> OverlaycutResult<Self> {
        let container = config
            .container
            .parse::<Container>()
            .map_err(OverlaycutError::config)?;
        if config.target_fps == 0 {
            return Err(OverlaycutError::config("target_fps must be at least 1"));
        }
        Ok(Self {
            container,
            target_fps: config.target_fps,
            resolver: PlacementResolver::new(config.caption_margin_px, config.watermark_margin_px),
            font_file: config.font_path.clone(),
            work_dir: config.work_dir.clone(),
            sink_queue_frames: config.sink_queue_frames.max(1),
            tools: FfmpegTools::from_config(config),
        })
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }
}

const GRAPH_FILTERS: [&str; 7] = [
    "drawtext",
    "drawbox",
    "overlay",
    "colorchannelmixer",
    "scale",
    "pad",
    "concat",
];

/// What the runtime environment can do, probed once up front.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub ffmpeg: bool,
    pub ffprobe: bool,
    pub filters: BTreeSet<String>,
    pub encoders: BTreeSet<String>,
}

impl Capabilities {
    pub async fn probe(tools: &FfmpegTools) -> Self {
        let mut caps = Capabilities {
            ffmpeg: tools.ffmpeg_available(),
            ffprobe: tools.ffprobe_available(),
            ..Default::default()
        };
        if caps.ffmpeg {
            match ffmpeg::list_filters(tools).await {
                Ok(filters) => caps.filters = filters.into_iter().collect(),
                Err(e) => tracing::warn!(error = %e, "Failed to list ffmpeg filters"),
            }
            match ffmpeg::list_encoders(tools).await {
                Ok(encoders) => caps.encoders = encoders.into_iter().collect(),
                Err(e) => tracing::warn!(error = %e, "Failed to list ffmpeg encoders"),
            }
        }
        tracing::debug!(
            ffmpeg = caps.ffmpeg,
            ffprobe = caps.ffprobe,
            filters = caps.filters.len(),
            encoders = caps.encoders.len(),
            "Capabilities probed"
        );
        caps
    }

    /// `Err(reason)` when `backend` cannot produce `container` here.
    pub fn check(&self, backend: BackendKind, container: Container) -> Result<(), String> {
        if !self.ffmpeg {
            return Err("ffmpeg not found".to_string());
        }
        for encoder in [container.video_codec(), container.audio_codec()] {
            if !self.encoders.contains(encoder) {
                return Err(format!("encoder {encoder} unavailable"));
            }
        }
        if backend == BackendKind::FilterGraph {
            if let Some(missing) = GRAPH_FILTERS.iter().find(|f| !self.filters.contains(**f)) {
                return Err(format!("filter {missing} unavailable"));
            }
        }
        Ok(())
    }

    pub fn supports(&self, backend: BackendKind, container: Container) -> bool {
        self.check(backend, container).is_ok()
    }

    /// The preferred backend if usable, else the other one.
    pub fn select(
        &self,
        preference: BackendKind,
        container: Container,
    ) -> OverlaycutResult<BackendKind> {
        let fallback = match preference {
            BackendKind::FilterGraph => BackendKind::FrameCapture,
            BackendKind::FrameCapture => BackendKind::FilterGraph,
        };
        match self.check(preference, container) {
            Ok(()) => Ok(preference),
            Err(reason) => {
                if self.supports(fallback, container) {
                    tracing::warn!(
                        preferred = preference.as_str(),
                        selected = fallback.as_str(),
                        reason,
                        "Preferred backend unavailable"
                    );
                    Ok(fallback)
                } else {
                    Err(OverlaycutError::unsupported(format!(
                        "no render backend can produce {container}: {reason}"
                    )))
                }
            }
        }
    }
}

/// Runs exports through one backend, one at a time.
pub struct Exporter {
    backend: Arc<dyn RenderBackend>,
    settings: ExportSettings,
    lock: tokio::sync::Mutex<()>,
}

impl Exporter {
    pub fn new(backend: Arc<dyn RenderBackend>, settings: ExportSettings) -> Self {
        Self {
            backend,
            settings,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the ffmpeg-backed exporter for the best backend `caps` allow.
    pub fn from_capabilities(
        caps: &Capabilities,
        preference: BackendKind,
        settings: ExportSettings,
    ) -> OverlaycutResult<Self> {
        let kind = caps.select(preference, settings.container)?;
        let backend: Arc<dyn RenderBackend> = match kind {
            BackendKind::FilterGraph => Arc::new(FilterGraphBackend::ffmpeg(settings.tools.clone())),
            BackendKind::FrameCapture => Arc::new(FrameCaptureBackend::ffmpeg(
                settings.tools.clone(),
                settings.sink_queue_frames,
            )),
        };
        Ok(Self::new(backend, settings))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// A fresh session. Grab its observer or cancel handle before passing
    /// it to [`Exporter::run`].
    pub fn session(&self, on_progress: Option<ProgressCallback>) -> OverlaycutResult<ExportSession> {
        ExportSession::new(self.settings.work_dir.as_deref(), on_progress)
    }

    /// Export `source` with `overlays` in a new session, using the encoder
    /// parameters `quality` maps to on this exporter's backend.
    pub async fn export(
        &self,
        source: &MediaSource,
        overlays: &[Overlay],
        quality: QualityPreset,
        on_progress: Option<ProgressCallback>,
    ) -> OverlaycutResult<ExportOutput> {
        let profile = QualityProfile::for_backend(quality, self.backend.kind());
        self.export_with_profile(source, overlays, profile, on_progress)
            .await
    }

    /// Export with caller-chosen encoder parameters. `profile` must target
    /// this exporter's backend.
    pub async fn export_with_profile(
        &self,
        source: &MediaSource,
        overlays: &[Overlay],
        profile: QualityProfile,
        on_progress: Option<ProgressCallback>,
    ) -> OverlaycutResult<ExportOutput> {
        let session = self.session(on_progress)?;
        self.run_with_profile(session, source, overlays, profile)
            .await
    }

    /// Export within a caller-created session.
    ///
    /// A cancelled export fails with [`OverlaycutError::Cancelled`]; partial
    /// output is discarded with the workspace.
    pub async fn run(
        &self,
        session: ExportSession,
        source: &MediaSource,
        overlays: &[Overlay],
        quality: QualityPreset,
    ) -> OverlaycutResult<ExportOutput> {
        let profile = QualityProfile::for_backend(quality, self.backend.kind());
        self.run_with_profile(session, source, overlays, profile)
            .await
    }

    pub async fn run_with_profile(
        &self,
        mut session: ExportSession,
        source: &MediaSource,
        overlays: &[Overlay],
        profile: QualityProfile,
    ) -> OverlaycutResult<ExportOutput> {
        let _guard = self.lock.lock().await;
        let span = tracing::info_span!(
            "export",
            source = %source.path.display(),
            backend = self.backend.name(),
        );
        let started = std::time::Instant::now();
        async {
            tracing::info!(
                profile = ?profile,
                container = self.settings.container.as_str(),
                overlays = overlays.len(),
                "Starting export"
            );

            let result = self.drive(&mut session, source, overlays, profile).await;
            match result {
                Ok(artifact) => {
                    let warnings = session.take_warnings();
                    session.cleanup();
                    tracing::info!(
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        bytes = artifact.len(),
                        warnings = warnings.len(),
                        "Export finished"
                    );
                    Ok(ExportOutput { artifact, warnings })
                }
                Err(err) => {
                    session.fail();
                    session.cleanup();
                    if matches!(err, OverlaycutError::Cancelled) {
                        tracing::info!("Export cancelled");
                    } else {
                        tracing::error!(kind = err.kind().as_str(), error = %err, "Export failed");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut ExportSession,
        source: &MediaSource,
        overlays: &[Overlay],
        profile: QualityProfile,
    ) -> OverlaycutResult<Artifact> {
        session.enter(
            ExportPhase::Loading,
            format!("Loading {}", source.path.display()),
        )?;
        if profile.backend() != self.backend.kind() {
            return Err(OverlaycutError::config(format!(
                "{} quality profile cannot drive the {} backend",
                profile.backend(),
                self.backend.kind()
            )));
        }
        source
            .validate()
            .map_err(|e| OverlaycutError::source_load(e.to_string()))?;
        if !source.path.exists() {
            return Err(OverlaycutError::FileNotFound {
                path: source.path.clone(),
            });
        }

        let overlays = OverlaySet::from_overlays(overlays);
        let timeline = CompositeTimeline::new(source.duration_secs, overlays.slide_durations());
        let (width, height) = source.even_dimensions();
        let job = RenderJob {
            source: source.clone(),
            profile,
            container: self.settings.container,
            width,
            height,
            fps: self.settings.target_fps,
            resolver: self.settings.resolver,
            font_file: self.settings.font_file.clone(),
            overlays,
            timeline,
        };
        tracing::debug!(
            width,
            height,
            fps = job.fps,
            total_secs = job.timeline.total_duration(),
            total_frames = job.total_frames(),
            "Render job built"
        );
        session.advance(1.0, "Source loaded");
        session.check_cancelled()?;

        session.enter(ExportPhase::Processing, "Preparing overlays")?;
        let container = job.container;
        let mut prepared = self.backend.prepare(job, session).await?;
        session.check_cancelled()?;

        session.enter(ExportPhase::Rendering, "Rendering")?;
        prepared.render(session).await?;
        session.check_cancelled()?;

        session.enter(ExportPhase::Finalizing, "Finalizing")?;
        let output_path = prepared.finalize(session).await?;
        let bytes = tokio::fs::read(&output_path).await.map_err(|e| {
            OverlaycutError::finalization(format!(
                "failed to read {}: {e}",
                output_path.display()
            ))
        })?;
        if bytes.is_empty() {
            return Err(OverlaycutError::finalization("encoder produced an empty file"));
        }
        session.check_cancelled()?;

        session.enter(ExportPhase::Complete, "Export complete")?;
        Ok(Artifact {
            bytes,
            mime_type: container.mime_type().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(filters: &[&str], encoders: &[&str]) -> Capabilities {
        Capabilities {
            ffmpeg: true,
            ffprobe: true,
            filters: filters.iter().map(|s| s.to_string()).collect(),
            encoders: encoders.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ExportDefaults::default();
        config.container = "webm".to_string();
        config.caption_margin_px = 40;
        let settings = ExportSettings::from_config(&config).unwrap();
        assert_eq!(settings.container, Container::Webm);
        assert_eq!(settings.resolver.caption_margin_px, 40);

        config.container = "avi".to_string();
        assert!(matches!(
            ExportSettings::from_config(&config),
            Err(OverlaycutError::Config { .. })
        ));
    }

    #[test]
    fn test_select_prefers_requested_backend() {
        let caps = caps(&GRAPH_FILTERS, &["libx264", "aac"]);
        assert_eq!(
            caps.select(BackendKind::FrameCapture, Container::Mp4).unwrap(),
            BackendKind::FrameCapture
        );
        assert_eq!(
            caps.select(BackendKind::FilterGraph, Container::Mp4).unwrap(),
            BackendKind::FilterGraph
        );
    }

    #[test]
    fn test_select_falls_back_without_drawtext() {
        let caps = caps(&["overlay", "scale"], &["libx264", "aac"]);
        assert_eq!(
            caps.select(BackendKind::FilterGraph, Container::Mp4).unwrap(),
            BackendKind::FrameCapture
        );
    }

    #[test]
    fn test_select_fails_without_encoder() {
        let caps = caps(&GRAPH_FILTERS, &["libx264", "aac"]);
        let err = caps.select(BackendKind::FilterGraph, Container::Webm).unwrap_err();
        assert!(matches!(err, OverlaycutError::UnsupportedCapability { .. }));
    }

    #[test]
    fn test_select_fails_without_ffmpeg() {
        let caps = Capabilities::default();
        assert!(caps.select(BackendKind::FrameCapture, Container::Mp4).is_err());
    }

    #[test]
    fn test_artifact_debug_hides_bytes() {
        let artifact = Artifact {
            bytes: vec![0; 1024],
            mime_type: "video/mp4".to_string(),
        };
        assert_eq!(
            format!("{artifact:?}"),
            "Artifact { bytes: 1024, mime_type: \"video/mp4\" }"
        );
    }
}
