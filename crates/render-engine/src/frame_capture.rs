//! Frame-capture backend.
//!
//! Decodes the base clip to raw RGBA, composites overlays onto every frame,
//! then holds each trailer slide for its duration. Frames go to an encoder
//! through a bounded queue, so a slow encoder pauses the render loop instead
//! of piling frames up in memory.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use image::RgbaImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use overlaycut_common::clock::{frame_to_secs, FrameClock, FreeRunClock};
use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::{frames_for, BackendKind, Container, MediaSource, QualityProfile};

use crate::audio::{AcquiredAudio, AudioChain, AudioOutcome};
use crate::compositor::{FrameCompositor, SLIDE_BACKGROUND};
use crate::export::{PreparedRender, RenderBackend, RenderJob};
use crate::ffmpeg::{self, FfmpegTools};
use crate::session::ExportSession;

/// Frames the encoder queue holds by default.
pub const DEFAULT_QUEUE_FRAMES: usize = 8;

/// Decoded frames of the base clip, already at output size and rate.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// The next frame, or `None` once the clip ends.
    async fn next_frame(&mut self) -> OverlaycutResult<Option<RgbaImage>>;
}

/// Consumes rendered frames and produces the output file.
#[async_trait::async_trait]
pub trait EncoderSink: Send {
    /// Queue a frame. Waits while the queue is full.
    async fn push(&mut self, frame: RgbaImage) -> OverlaycutResult<()>;

    /// Flush and close the output.
    async fn finish(self: Box<Self>) -> OverlaycutResult<()>;
}

/// Everything an encoder sink needs to know up front.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub container: Container,
    pub profile: QualityProfile,
    /// Audio file muxed next to the video, if one was acquired.
    pub audio: Option<PathBuf>,
    pub queue_frames: usize,
}

/// Opens sources and sinks. The seam tests replace.
#[async_trait::async_trait]
pub trait FramePipeline: Send + Sync {
    async fn open_source(
        &self,
        source: &MediaSource,
        width: u32,
        height: u32,
        fps: u32,
    ) -> OverlaycutResult<Box<dyn FrameSource>>;

    async fn open_sink(&self, config: SinkConfig) -> OverlaycutResult<Box<dyn EncoderSink>>;
}

/// [`FramePipeline`] built on ffmpeg processes.
#[derive(Debug, Clone)]
pub struct FfmpegPipeline {
    tools: FfmpegTools,
}

impl FfmpegPipeline {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }
}

#[async_trait::async_trait]
impl FramePipeline for FfmpegPipeline {
    async fn open_source(
        &self,
        source: &MediaSource,
        width: u32,
        height: u32,
        fps: u32,
    ) -> OverlaycutResult<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegFrameSource::spawn(
            &self.tools,
            source,
            width,
            height,
            fps,
        )?))
    }

    async fn open_sink(&self, config: SinkConfig) -> OverlaycutResult<Box<dyn EncoderSink>> {
        Ok(Box::new(FfmpegEncoderSink::spawn(&self.tools, config)?))
    }
}

/// Reads raw RGBA frames from an ffmpeg decoder's stdout.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frames_read: u64,
    done: bool,
}

impl FfmpegFrameSource {
    pub fn spawn(
        tools: &FfmpegTools,
        source: &MediaSource,
        width: u32,
        height: u32,
        fps: u32,
    ) -> OverlaycutResult<Self> {
        let mut child = Command::new(&tools.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostats", "-i"])
            .arg(&source.path)
            .args([
                "-map".to_string(),
                "0:v:0".to_string(),
                "-t".to_string(),
                format!("{:.3}", source.duration_secs),
                "-vf".to_string(),
                format!("scale={width}:{height}:flags=bicubic,setsar=1,fps={fps}"),
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgba".to_string(),
                "pipe:1".to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OverlaycutError::source_load(format!(
                    "failed to start {}: {e}",
                    tools.ffmpeg.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OverlaycutError::source_load("decoder stdout not captured"))?;
        let stderr = ffmpeg::drain_stderr(&mut child);
        tracing::debug!(pid = child.id(), width, height, fps, "Decoder started");

        Ok(Self {
            child,
            stdout,
            stderr,
            width,
            height,
            frames_read: 0,
            done: false,
        })
    }

    async fn close(&mut self) -> OverlaycutResult<()> {
        self.done = true;
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() && self.frames_read == 0 {
            return Err(OverlaycutError::source_load(format!(
                "decoder exited with {status}: {}",
                stderr.trim()
            )));
        }
        tracing::debug!(frames = self.frames_read, "Decoder finished");
        Ok(())
    }
}

#[async_trait::async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> OverlaycutResult<Option<RgbaImage>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 4];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {
                self.frames_read += 1;
                RgbaImage::from_raw(self.width, self.height, buf)
                    .map(Some)
                    .ok_or_else(|| OverlaycutError::source_load("decoded frame has wrong size"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.close().await?;
                Ok(None)
            }
            Err(e) => Err(OverlaycutError::source_load(format!("decoder read failed: {e}"))),
        }
    }
}

/// Feeds raw RGBA frames into an ffmpeg encoder through a bounded queue.
pub struct FfmpegEncoderSink {
    tx: mpsc::Sender<Vec<u8>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    program: String,
    output: PathBuf,
}

impl FfmpegEncoderSink {
    pub fn args(config: &SinkConfig) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostats".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", config.width, config.height),
            "-r".to_string(),
            config.fps.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
        ];
        if let Some(audio) = &config.audio {
            args.extend(["-i".to_string(), audio.display().to_string()]);
        }
        args.extend(["-map".to_string(), "0:v".to_string()]);
        if config.audio.is_some() {
            args.extend(["-map".to_string(), "1:a:0".to_string()]);
        }
        args.extend(ffmpeg::codec_args(
            config.container,
            &config.profile,
            config.audio.is_some(),
        ));
        args.push(config.output.display().to_string());
        args
    }

    pub fn spawn(tools: &FfmpegTools, config: SinkConfig) -> OverlaycutResult<Self> {
        let program = tools.ffmpeg.display().to_string();
        let args = Self::args(&config);
        tracing::debug!(args = ?args, "Starting encoder");
        let mut child = Command::new(&tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OverlaycutError::encoding(format!("failed to start {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OverlaycutError::encoding("encoder stdin not captured"))?;
        let stderr = ffmpeg::drain_stderr(&mut child);

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(config.queue_frames.max(1));
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                stdin.write_all(&frame).await?;
            }
            stdin.shutdown().await
        });
        tracing::info!(pid = child.id(), output = %config.output.display(), "Encoder started");

        Ok(Self {
            tx,
            writer: Some(writer),
            child,
            stderr,
            program,
            output: config.output,
        })
    }
}

impl FfmpegEncoderSink {
    /// Wait for the writer, the process and its stderr, and describe why the
    /// encoder stopped. `None` when it exited cleanly with every frame written.
    async fn reap(&mut self) -> Option<ffmpeg::FfmpegError> {
        let written = match self.writer.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(std::io::Error::other(format!("frame writer panicked: {e}"))),
            },
            None => Ok(()),
        };
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(ffmpeg::FfmpegError::Io(e)),
        };
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Some(ffmpeg::FfmpegError::Exited {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: ffmpeg::stderr_tail(&stderr, STDERR_TAIL_LINES),
            });
        }
        written.err().map(ffmpeg::FfmpegError::Io)
    }
}

/// Lines of encoder stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 8;

#[async_trait::async_trait]
impl EncoderSink for FfmpegEncoderSink {
    async fn push(&mut self, frame: RgbaImage) -> OverlaycutResult<()> {
        if self.tx.send(frame.into_raw()).await.is_ok() {
            return Ok(());
        }
        // The writer only drops its receiver after a failed write, so the
        // encoder is gone; find out why.
        let err = self.reap().await.unwrap_or_else(|| {
            ffmpeg::FfmpegError::Io(std::io::Error::other("encoder stopped accepting frames"))
        });
        tracing::error!(error = %err, "Encoder failed mid-stream");
        Err(err.into_encoding())
    }

    async fn finish(mut self: Box<Self>) -> OverlaycutResult<()> {
        // Closing the queue lets the writer flush and shut stdin.
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.tx, closed));

        if let Some(err) = self.reap().await {
            return Err(err.into_encoding());
        }
        tracing::info!(output = %self.output.display(), "Encoder finished");
        Ok(())
    }
}

/// Per-frame compositing backend.
pub struct FrameCaptureBackend {
    pipeline: Arc<dyn FramePipeline>,
    audio: AudioChain,
    clock: Arc<dyn FrameClock>,
    queue_frames: usize,
}

impl FrameCaptureBackend {
    /// Free-running by default; see [`FrameCaptureBackend::with_clock`].
    pub fn new(pipeline: Arc<dyn FramePipeline>, audio: AudioChain) -> Self {
        Self {
            pipeline,
            audio,
            clock: Arc::new(FreeRunClock::new()),
            queue_frames: DEFAULT_QUEUE_FRAMES,
        }
    }

    pub fn ffmpeg(tools: FfmpegTools, queue_frames: usize) -> Self {
        Self::new(
            Arc::new(FfmpegPipeline::new(tools.clone())),
            AudioChain::ffmpeg(tools),
        )
        .with_queue_frames(queue_frames)
    }

    /// Pace rendering with `clock` (e.g. a realtime clock for preview parity).
    pub fn with_clock(mut self, clock: Arc<dyn FrameClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_queue_frames(mut self, queue_frames: usize) -> Self {
        self.queue_frames = queue_frames.max(1);
        self
    }
}

#[async_trait::async_trait]
impl RenderBackend for FrameCaptureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FrameCapture
    }

    fn name(&self) -> &str {
        "frame-capture"
    }

    async fn prepare(
        &self,
        job: RenderJob,
        session: &mut ExportSession,
    ) -> OverlaycutResult<Box<dyn PreparedRender>> {
        let (compositor, warnings) = FrameCompositor::build(&job);
        for warning in warnings {
            session.warn(warning);
        }
        session.advance(0.5, "Overlay assets loaded");
        session.check_cancelled()?;

        let audio = if job.source.has_audio {
            let cancel = session.cancel_handle();
            match self
                .audio
                .acquire(&job.source, session.workspace(), &cancel)
                .await?
            {
                AudioOutcome::Track(track) => Some(track),
                AudioOutcome::VideoOnly(err) => {
                    session.warn(err);
                    None
                }
            }
        } else {
            tracing::debug!("Source has no audio; exporting video only");
            None
        };
        session.advance(1.0, "Audio ready");

        Ok(Box::new(CaptureRender {
            pipeline: self.pipeline.clone(),
            clock: self.clock.clone(),
            queue_frames: self.queue_frames,
            job,
            compositor,
            audio,
            sink: None,
        }))
    }
}

struct CaptureRender {
    pipeline: Arc<dyn FramePipeline>,
    clock: Arc<dyn FrameClock>,
    queue_frames: usize,
    job: RenderJob,
    compositor: FrameCompositor,
    audio: Option<AcquiredAudio>,
    sink: Option<(Box<dyn EncoderSink>, PathBuf)>,
}

fn report_frame(session: &mut ExportSession, rendered: u64, total: u64, fps: u32) {
    if rendered % fps.max(1) as u64 == 0 || rendered >= total {
        session.advance(
            rendered as f64 / total as f64,
            format!("Rendered frame {rendered}/{total}"),
        );
    }
}

#[async_trait::async_trait]
impl PreparedRender for CaptureRender {
    async fn render(&mut self, session: &mut ExportSession) -> OverlaycutResult<()> {
        let job = &self.job;
        let (width, height, fps) = (job.width, job.height, job.fps);
        let cancel = session.cancel_handle();
        let output = session.scratch_path(&job.output_name());
        let mut sink = self
            .pipeline
            .open_sink(SinkConfig {
                output: output.clone(),
                width,
                height,
                fps,
                container: job.container,
                profile: job.profile.clone(),
                audio: self.audio.as_ref().map(|a| a.path.clone()),
                queue_frames: self.queue_frames,
            })
            .await?;

        let total = job.total_frames().max(1);
        let base_frames = frames_for(job.source.duration_secs, fps);
        let mut rendered = 0u64;

        let mut source = self
            .pipeline
            .open_source(&job.source, width, height, fps)
            .await?;
        while rendered < base_frames {
            cancel.check()?;
            let t = frame_to_secs(rendered, fps);
            self.clock.wait_until(t).await;
            let Some(mut frame) = source.next_frame().await? else {
                tracing::warn!(
                    rendered,
                    expected = base_frames,
                    "Source ended before its reported duration"
                );
                break;
            };
            self.compositor.compose(&mut frame, t);
            sink.push(frame).await?;
            rendered += 1;
            report_frame(session, rendered, total, fps);
        }
        drop(source);

        let total = total.min(rendered + job.timeline.slide_ticks(fps).remaining()).max(1);
        for tick in job.timeline.slide_ticks(fps).starting_at_frame(rendered) {
            cancel.check()?;
            self.clock.wait_until(frame_to_secs(tick.frame, fps)).await;
            let frame = match self.compositor.slide_frame(tick.index) {
                Some(frame) => frame.clone(),
                None => RgbaImage::from_pixel(width, height, SLIDE_BACKGROUND),
            };
            sink.push(frame).await?;
            rendered += 1;
            report_frame(session, rendered, total, fps);
        }

        tracing::info!(frames = rendered, "Render loop finished");
        session.advance(1.0, format!("Rendered {rendered} frames"));
        self.sink = Some((sink, output));
        Ok(())
    }

    async fn finalize(self: Box<Self>, session: &mut ExportSession) -> OverlaycutResult<PathBuf> {
        let (sink, output) = self
            .sink
            .ok_or_else(|| OverlaycutError::invalid_state("finalize called before render"))?;
        session.advance(0.1, "Flushing encoder");
        sink.finish().await.map_err(|e| match e {
            OverlaycutError::Cancelled => OverlaycutError::Cancelled,
            other => OverlaycutError::finalization(other.to_string()),
        })?;
        session.advance(1.0, "Encoder closed");
        Ok(output)
    }
}
