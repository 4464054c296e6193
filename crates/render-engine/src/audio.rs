//! Audio acquisition for the frame-capture backend.
//!
//! Before rendering starts, the backend tries to get the source's audio onto
//! disk so the encoder can mux it next to the rendered frames. Strategies
//! are tried in order and the first that produces a non-empty file wins. If
//! none do, the export carries on video-only with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::MediaSource;

use crate::ffmpeg::{self, FfmpegError, FfmpegTools};
use crate::filter_graph::AUDIO_SAMPLE_RATE;
use crate::session::CancelHandle;

/// One way of pulling the source's audio into a file.
#[async_trait::async_trait]
pub trait AudioStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Write the audio to a file inside `workspace` and return its path.
    async fn acquire(
        &self,
        source: &MediaSource,
        workspace: &Path,
        cancel: &CancelHandle,
    ) -> OverlaycutResult<PathBuf>;
}

/// Audio ready to be muxed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredAudio {
    pub path: PathBuf,
    /// Name of the strategy that produced it.
    pub strategy: String,
}

/// Result of running the chain.
#[derive(Debug)]
pub enum AudioOutcome {
    Track(AcquiredAudio),
    /// Every strategy failed; the error is an `AudioCapture` warning.
    VideoOnly(OverlaycutError),
}

impl AudioOutcome {
    pub fn track(&self) -> Option<&AcquiredAudio> {
        match self {
            AudioOutcome::Track(track) => Some(track),
            AudioOutcome::VideoOnly(_) => None,
        }
    }
}

fn map_ffmpeg(err: FfmpegError) -> OverlaycutError {
    match err {
        FfmpegError::Cancelled => OverlaycutError::Cancelled,
        other => OverlaycutError::audio(other.to_string()),
    }
}

async fn run_quiet(
    tools: &FfmpegTools,
    args: &[String],
    duration_secs: f64,
    cancel: &CancelHandle,
) -> OverlaycutResult<()> {
    ffmpeg::run_with_progress(tools, args, duration_secs, cancel, &mut |_: f64| {})
        .await
        .map_err(map_ffmpeg)
}

/// Stream-copies the source's first audio track into a Matroska file.
#[derive(Debug, Clone)]
pub struct DirectTrackCapture {
    tools: FfmpegTools,
}

impl DirectTrackCapture {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }
}

#[async_trait::async_trait]
impl AudioStrategy for DirectTrackCapture {
    fn name(&self) -> &str {
        "direct-track"
    }

    async fn acquire(
        &self,
        source: &MediaSource,
        workspace: &Path,
        cancel: &CancelHandle,
    ) -> OverlaycutResult<PathBuf> {
        if !source.has_audio {
            return Err(OverlaycutError::audio("source has no audio stream"));
        }
        let output = workspace.join("audio-track.mka");
        let args = vec![
            "-i".to_string(),
            source.path.display().to_string(),
            "-vn".to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ];
        run_quiet(&self.tools, &args, source.duration_secs, cancel).await?;
        Ok(output)
    }
}

/// Decodes the audio signal through a resampling graph to PCM WAV. Works
/// for codecs that cannot be stream-copied.
#[derive(Debug, Clone)]
pub struct DecodedSignalTap {
    tools: FfmpegTools,
}

impl DecodedSignalTap {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }
}

#[async_trait::async_trait]
impl AudioStrategy for DecodedSignalTap {
    fn name(&self) -> &str {
        "decoded-tap"
    }

    async fn acquire(
        &self,
        source: &MediaSource,
        workspace: &Path,
        cancel: &CancelHandle,
    ) -> OverlaycutResult<PathBuf> {
        let output = workspace.join("audio-tap.wav");
        let args = vec![
            "-i".to_string(),
            source.path.display().to_string(),
            "-vn".to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-af".to_string(),
            format!(
                "aresample={AUDIO_SAMPLE_RATE},aformat=sample_fmts=s16:channel_layouts=stereo"
            ),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            output.display().to_string(),
        ];
        run_quiet(&self.tools, &args, source.duration_secs, cancel).await?;
        Ok(output)
    }
}

/// Ordered fallback over [`AudioStrategy`] implementations.
#[derive(Clone)]
pub struct AudioChain {
    strategies: Vec<Arc<dyn AudioStrategy>>,
}

impl std::fmt::Debug for AudioChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

impl AudioChain {
    pub fn new(strategies: Vec<Arc<dyn AudioStrategy>>) -> Self {
        Self { strategies }
    }

    /// Direct track copy, then decoded tap.
    pub fn ffmpeg(tools: FfmpegTools) -> Self {
        Self::new(vec![
            Arc::new(DirectTrackCapture::new(tools.clone())),
            Arc::new(DecodedSignalTap::new(tools)),
        ])
    }

    /// Try each strategy once. Only cancellation is returned as an error.
    pub async fn acquire(
        &self,
        source: &MediaSource,
        workspace: &Path,
        cancel: &CancelHandle,
    ) -> OverlaycutResult<AudioOutcome> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            cancel.check()?;
            let attempt = match strategy.acquire(source, workspace, cancel).await {
                Ok(path) => non_empty(path).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(path) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        path = %path.display(),
                        "Audio acquired"
                    );
                    return Ok(AudioOutcome::Track(AcquiredAudio {
                        path,
                        strategy: strategy.name().to_string(),
                    }));
                }
                Err(OverlaycutError::Cancelled) => return Err(OverlaycutError::Cancelled),
                Err(e) => {
                    tracing::debug!(strategy = strategy.name(), error = %e, "Audio strategy failed");
                    failures.push(format!("{}: {e}", strategy.name()));
                }
            }
        }

        let message = if failures.is_empty() {
            "no audio strategies configured".to_string()
        } else {
            failures.join("; ")
        };
        Ok(AudioOutcome::VideoOnly(OverlaycutError::audio(message)))
    }
}

async fn non_empty(path: PathBuf) -> OverlaycutResult<PathBuf> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.len() > 0 => Ok(path),
        Ok(_) => Err(OverlaycutError::audio(format!("{} is empty", path.display()))),
        Err(e) => Err(OverlaycutError::audio(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        name: &'static str,
        bytes: Option<&'static [u8]>,
    }

    #[async_trait::async_trait]
    impl AudioStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn acquire(
            &self,
            _source: &MediaSource,
            workspace: &Path,
            _cancel: &CancelHandle,
        ) -> OverlaycutResult<PathBuf> {
            let Some(bytes) = self.bytes else {
                return Err(OverlaycutError::audio("scripted failure"));
            };
            let path = workspace.join(format!("{}.wav", self.name));
            tokio::fs::write(&path, bytes).await?;
            Ok(path)
        }
    }

    fn source() -> MediaSource {
        MediaSource::new("/media/in.mp4", 4.0, 640, 360).with_audio(true)
    }

    #[tokio::test]
    async fn test_falls_back_to_second_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AudioChain::new(vec![
            Arc::new(Scripted { name: "first", bytes: None }),
            Arc::new(Scripted { name: "second", bytes: Some(b"RIFF") }),
        ]);
        let outcome = chain
            .acquire(&source(), dir.path(), &CancelHandle::new())
            .await
            .unwrap();
        let track = outcome.track().unwrap();
        assert_eq!(track.strategy, "second");
        assert!(track.path.exists());
    }

    #[tokio::test]
    async fn test_empty_output_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AudioChain::new(vec![Arc::new(Scripted { name: "hollow", bytes: Some(b"") })]);
        let outcome = chain
            .acquire(&source(), dir.path(), &CancelHandle::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AudioOutcome::VideoOnly(OverlaycutError::AudioCapture { .. })
        ));
    }

    #[tokio::test]
    async fn test_all_failures_degrade_to_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AudioChain::new(vec![
            Arc::new(Scripted { name: "a", bytes: None }),
            Arc::new(Scripted { name: "b", bytes: None }),
        ]);
        let outcome = chain
            .acquire(&source(), dir.path(), &CancelHandle::new())
            .await
            .unwrap();
        match outcome {
            AudioOutcome::VideoOnly(err) => {
                assert!(!err.is_fatal());
                let message = err.to_string();
                assert!(message.contains("a: ") && message.contains("b: "));
            }
            AudioOutcome::Track(_) => panic!("expected video-only"),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_chain() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let chain = AudioChain::new(vec![Arc::new(Scripted { name: "a", bytes: Some(b"x") })]);
        let err = chain.acquire(&source(), dir.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, OverlaycutError::Cancelled));
    }

    #[tokio::test]
    async fn test_direct_capture_requires_audio_stream() {
        let dir = tempfile::tempdir().unwrap();
        let silent = MediaSource::new("/media/in.mp4", 4.0, 640, 360);
        let err = DirectTrackCapture::new(FfmpegTools::default())
            .acquire(&silent, dir.path(), &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OverlaycutError::AudioCapture { .. }));
    }
}
