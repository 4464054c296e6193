//! Declarative backend.
//!
//! The whole base clip renders in one transcoder pass through a compiled
//! filter graph. Each trailer slide then renders to its own clip and the
//! parts are concatenated. Stages run strictly in sequence and any failure
//! aborts the export.

use std::path::PathBuf;
use std::sync::Arc;

use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::BackendKind;

use crate::export::{PreparedRender, RenderBackend, RenderJob};
use crate::ffmpeg::{self, FfmpegError, FfmpegTools};
use crate::filter_graph::{
    audio_format_args, concat_args, concat_manifest, CompiledGraph, FilterGraphBuilder, GraphSpec,
    SlideClip,
};
use crate::session::{CancelHandle, ExportSession};

/// Runs one transcoder invocation.
#[async_trait::async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Run with `args`, reporting the fraction of `expected_duration_secs`
    /// encoded so far. `label` names the stage in logs.
    async fn run(
        &self,
        label: &str,
        args: &[String],
        expected_duration_secs: f64,
        cancel: &CancelHandle,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<(), FfmpegError>;
}

/// [`TranscodeEngine`] backed by the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    tools: FfmpegTools,
}

impl FfmpegEngine {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }
}

#[async_trait::async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn run(
        &self,
        label: &str,
        args: &[String],
        expected_duration_secs: f64,
        cancel: &CancelHandle,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<(), FfmpegError> {
        tracing::debug!(stage = label, expected_duration_secs, "Starting transcode stage");
        ffmpeg::run_with_progress(&self.tools, args, expected_duration_secs, cancel, on_progress)
            .await
    }
}

/// Filter-graph render backend.
pub struct FilterGraphBackend {
    engine: Arc<dyn TranscodeEngine>,
}

impl FilterGraphBackend {
    pub fn new(engine: Arc<dyn TranscodeEngine>) -> Self {
        Self { engine }
    }

    pub fn ffmpeg(tools: FfmpegTools) -> Self {
        Self::new(Arc::new(FfmpegEngine::new(tools)))
    }
}

#[async_trait::async_trait]
impl RenderBackend for FilterGraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FilterGraph
    }

    fn name(&self) -> &str {
        "filter-graph"
    }

    async fn prepare(
        &self,
        job: RenderJob,
        session: &mut ExportSession,
    ) -> OverlaycutResult<Box<dyn PreparedRender>> {
        // The transcoder reads assets itself, so a missing one can only be
        // caught here.
        let assets = job
            .overlays
            .watermarks
            .iter()
            .map(|w| w.image.path())
            .chain(job.overlays.slides.iter().map(|s| s.image.path()))
            .chain(job.font_file.as_deref());
        for path in assets {
            if !path.is_file() {
                return Err(OverlaycutError::asset_load(path, "file not found"));
            }
        }
        session.advance(0.5, "Overlay assets found");

        let builder = FilterGraphBuilder::new(GraphSpec {
            width: job.width,
            height: job.height,
            fps: job.fps,
            duration_secs: job.source.duration_secs,
            resolver: job.resolver,
            font_file: job.font_file.clone(),
        });
        let graph = builder.build(&job.overlays)?;
        tracing::info!(
            captions = graph.caption_ops,
            watermarks = graph.watermark_ops,
            slides = job.overlays.slides.len(),
            "Filter graph compiled"
        );
        session.advance(1.0, "Filter graph compiled");

        Ok(Box::new(GraphRender {
            engine: self.engine.clone(),
            job,
            graph,
            parts: Vec::new(),
        }))
    }
}

struct GraphRender {
    engine: Arc<dyn TranscodeEngine>,
    job: RenderJob,
    graph: CompiledGraph,
    parts: Vec<PathBuf>,
}

impl GraphRender {
    fn main_args(&self, codec: &[String], output: &std::path::Path) -> Vec<String> {
        let job = &self.job;
        let mut args = vec!["-i".to_string(), job.source.path.display().to_string()];
        for image in &self.graph.image_inputs {
            args.extend(["-i".to_string(), image.display().to_string()]);
        }
        args.extend([
            "-filter_complex".to_string(),
            self.graph.filter.clone(),
            "-map".to_string(),
            "[vout]".to_string(),
        ]);
        if job.source.has_audio {
            args.extend(["-map".to_string(), "0:a:0".to_string()]);
        }
        args.extend([
            "-t".to_string(),
            format!("{:.3}", job.source.duration_secs),
            "-r".to_string(),
            job.fps.to_string(),
        ]);
        args.extend(codec.iter().cloned());
        if job.source.has_audio {
            args.extend(audio_format_args());
        }
        args.push(output.display().to_string());
        args
    }
}

#[async_trait::async_trait]
impl PreparedRender for GraphRender {
    async fn render(&mut self, session: &mut ExportSession) -> OverlaycutResult<()> {
        let job = &self.job;
        let cancel = session.cancel_handle();
        let codec = ffmpeg::codec_args(job.container, &job.profile, job.source.has_audio);
        let total = job.timeline.total_duration().max(f64::EPSILON);
        let ext = job.container.extension();

        let main_path = if job.overlays.slides.is_empty() {
            session.scratch_path(&job.output_name())
        } else {
            session.scratch_path(&format!("main.{ext}"))
        };
        let args = self.main_args(&codec, &main_path);
        let main_secs = job.source.duration_secs;
        self.engine
            .run("main", &args, main_secs, &cancel, &mut |f: f64| {
                session.advance(f * main_secs / total, "Rendering overlays");
            })
            .await
            .map_err(FfmpegError::into_encoding)?;
        self.parts.push(main_path);

        let mut done_secs = main_secs;
        for (i, slide) in job.overlays.slides.iter().enumerate() {
            cancel.check()?;
            let slide_secs = job.timeline.slide_duration(i).unwrap_or(0.0);
            if slide_secs <= 0.0 {
                tracing::debug!(slide = i, "Zero-length slide skipped");
                continue;
            }
            let output = session.scratch_path(&format!("slide-{i}.{ext}"));
            let clip = SlideClip {
                image: slide.image.path(),
                duration_secs: slide_secs,
                width: job.width,
                height: job.height,
                fps: job.fps,
                with_audio: job.source.has_audio,
            };
            let args = clip.args(&codec, &output);
            let offset = done_secs;
            let message = format!("Rendering slide {}/{}", i + 1, job.overlays.slides.len());
            self.engine
                .run(&format!("slide-{i}"), &args, slide_secs, &cancel, &mut |f: f64| {
                    session.advance((offset + f * slide_secs) / total, message.as_str());
                })
                .await
                .map_err(FfmpegError::into_encoding)?;
            self.parts.push(output);
            done_secs += slide_secs;
        }

        session.advance(1.0, "Render complete");
        Ok(())
    }

    async fn finalize(self: Box<Self>, session: &mut ExportSession) -> OverlaycutResult<PathBuf> {
        let GraphRender {
            engine, job, parts, ..
        } = *self;
        if parts.len() <= 1 {
            session.advance(1.0, "Single part; nothing to join");
            return parts
                .into_iter()
                .next()
                .ok_or_else(|| OverlaycutError::finalization("no rendered parts"));
        }

        let manifest = session.scratch_path("concat.txt");
        tokio::fs::write(&manifest, concat_manifest(&parts))
            .await
            .map_err(|e| OverlaycutError::finalization(format!("failed to write concat list: {e}")))?;

        let output = session.scratch_path(&job.output_name());
        let codec = ffmpeg::codec_args(job.container, &job.profile, job.source.has_audio);
        let args = concat_args(&manifest, &codec, &output);
        let cancel = session.cancel_handle();
        let total = job.timeline.total_duration();
        tracing::info!(parts = parts.len(), "Joining rendered parts");
        engine
            .run("concat", &args, total, &cancel, &mut |f: f64| {
                session.advance(f, "Joining parts");
            })
            .await
            .map_err(FfmpegError::into_finalization)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ExportPhase;
    use overlaycut_project_model::{
        Caption, CompositeTimeline, Container, ImageAsset, MediaSource, Overlay, OverlaySet,
        PlacementResolver, QualityPreset, QualityProfile, TrailerSlide, Watermark,
    };
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail_stage: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl TranscodeEngine for RecordingEngine {
        async fn run(
            &self,
            label: &str,
            args: &[String],
            _expected_duration_secs: f64,
            _cancel: &CancelHandle,
            on_progress: &mut (dyn FnMut(f64) + Send),
        ) -> Result<(), FfmpegError> {
            self.calls
                .lock()
                .unwrap()
                .push((label.to_string(), args.to_vec()));
            if self.fail_stage == Some(label) {
                return Err(FfmpegError::Exited {
                    program: "ffmpeg".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "boom".to_string(),
                });
            }
            on_progress(1.0);
            tokio::fs::write(args.last().unwrap(), b"media").await?;
            Ok(())
        }
    }

    fn job(dir: &Path, overlays: Vec<Overlay>) -> RenderJob {
        let source = MediaSource::new(dir.join("in.mp4"), 10.0, 1280, 720).with_audio(true);
        let overlays = OverlaySet::from_overlays(&overlays);
        RenderJob {
            timeline: CompositeTimeline::new(source.duration_secs, overlays.slide_durations()),
            source,
            overlays,
            profile: QualityProfile::for_backend(QualityPreset::Balanced, BackendKind::FilterGraph),
            container: Container::Mp4,
            width: 1280,
            height: 720,
            fps: 30,
            resolver: PlacementResolver::default(),
            font_file: None,
        }
    }

    fn session_in_processing() -> ExportSession {
        let mut session = ExportSession::new(None, None).unwrap();
        session.enter(ExportPhase::Loading, "").unwrap();
        session.enter(ExportPhase::Processing, "").unwrap();
        session
    }

    #[tokio::test]
    async fn test_missing_watermark_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilterGraphBackend::new(Arc::new(RecordingEngine::default()));
        let wm = Watermark::new(ImageAsset::new(dir.path().join("missing.png")), 0.0, 5.0);
        let mut session = session_in_processing();

        let err = match backend
            .prepare(job(dir.path(), vec![Overlay::Watermark(wm)]), &mut session)
            .await
        {
            Ok(_) => panic!("prepare should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, OverlaycutError::OverlayAssetLoad { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_slides_render_then_concat() {
        let dir = tempfile::tempdir().unwrap();
        let slide_path = dir.path().join("end.png");
        std::fs::write(&slide_path, b"png").unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let backend = FilterGraphBackend::new(engine.clone());
        let overlays = vec![
            Overlay::Caption(Caption::new("Hi", 2.0, 3.0)),
            Overlay::TrailerSlide(TrailerSlide::new(ImageAsset::new(&slide_path), 3.0)),
            Overlay::TrailerSlide(TrailerSlide::new(ImageAsset::new(&slide_path), 4.0)),
        ];
        let mut session = session_in_processing();

        let mut prepared = backend.prepare(job(dir.path(), overlays), &mut session).await.unwrap();
        session.enter(ExportPhase::Rendering, "").unwrap();
        prepared.render(&mut session).await.unwrap();
        session.enter(ExportPhase::Finalizing, "").unwrap();
        let output = prepared.finalize(&mut session).await.unwrap();

        assert!(output.ends_with("export.mp4"));
        assert!(output.exists());
        let calls = engine.calls.lock().unwrap();
        let labels: Vec<_> = calls.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["main", "slide-0", "slide-1", "concat"]);

        let main = calls[0].1.join(" ");
        assert!(main.contains("-filter_complex"));
        assert!(main.contains("-map [vout] -map 0:a:0"));
        assert!(main.contains("-ar 48000 -ac 2"));
        let manifest = std::fs::read_to_string(session.scratch_path("concat.txt")).unwrap();
        assert_eq!(manifest.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_single_part_skips_concat() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let backend = FilterGraphBackend::new(engine.clone());
        let mut session = session_in_processing();

        let mut prepared = backend.prepare(job(dir.path(), vec![]), &mut session).await.unwrap();
        session.enter(ExportPhase::Rendering, "").unwrap();
        prepared.render(&mut session).await.unwrap();
        session.enter(ExportPhase::Finalizing, "").unwrap();
        let output = prepared.finalize(&mut session).await.unwrap();

        assert!(output.ends_with("export.mp4"));
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_maps_to_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine {
            fail_stage: Some("main"),
            ..Default::default()
        });
        let backend = FilterGraphBackend::new(engine);
        let mut session = session_in_processing();

        let mut prepared = backend.prepare(job(dir.path(), vec![]), &mut session).await.unwrap();
        session.enter(ExportPhase::Rendering, "").unwrap();
        let err = prepared.render(&mut session).await.unwrap_err();
        assert!(matches!(err, OverlaycutError::EncodingEngine { .. }));
    }
}
