//! ffmpeg/ffprobe process plumbing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use overlaycut_common::config::ExportDefaults;
use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::{Container, MediaSource, QualityProfile};

use crate::session::CancelHandle;

/// Executables used for transcoding and probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    pub fn from_config(config: &ExportDefaults) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.ffmpeg_bin),
            ffprobe: PathBuf::from(&config.ffprobe_bin),
        }
    }

    pub fn ffmpeg_available(&self) -> bool {
        command_exists(&self.ffmpeg)
    }

    pub fn ffprobe_available(&self) -> bool {
        command_exists(&self.ffprobe)
    }
}

/// Errors from driving an ffmpeg process. Callers decide which export
/// stage a failure belongs to.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("I/O error talking to ffmpeg: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unreadable ffprobe output: {0}")]
    Probe(String),

    #[error("cancelled")]
    Cancelled,
}

impl FfmpegError {
    pub fn into_encoding(self) -> OverlaycutError {
        match self {
            FfmpegError::Cancelled => OverlaycutError::Cancelled,
            other => OverlaycutError::encoding(other.to_string()),
        }
    }

    pub fn into_finalization(self) -> OverlaycutError {
        match self {
            FfmpegError::Cancelled => OverlaycutError::Cancelled,
            other => OverlaycutError::finalization(other.to_string()),
        }
    }
}

/// Check whether `binary` resolves to something runnable.
pub fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {} >/dev/null 2>&1", binary.display()))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Accumulates `-progress pipe:1` key/value output.
#[derive(Debug, Default)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Fraction of `expected_duration_secs` encoded so far.
    pub fn fraction(&self, expected_duration_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if expected_duration_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    }
}

/// Run ffmpeg to completion, reporting encoded fraction as it goes.
///
/// `args` are everything after the global progress flags. Cancellation is
/// checked on every progress line; a cancelled run kills the child.
pub async fn run_with_progress(
    tools: &FfmpegTools,
    args: &[String],
    expected_duration_secs: f64,
    cancel: &CancelHandle,
    on_progress: &mut (dyn FnMut(f64) + Send),
) -> Result<(), FfmpegError> {
    tracing::debug!(args = ?args, "Running ffmpeg");
    let mut cmd = Command::new(&tools.ffmpeg);
    cmd.args([
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ])
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let started = std::time::Instant::now();
    let mut child = cmd.spawn().map_err(|source| FfmpegError::Spawn {
        program: tools.ffmpeg.display().to_string(),
        source,
    })?;
    tracing::info!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
    let stderr_task = drain_stderr(&mut child);

    let mut lines = BufReader::new(stdout).lines();
    let mut state = ProgressState::default();
    while let Some(line) = lines.next_line().await? {
        if cancel.is_cancelled() {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(FfmpegError::Cancelled);
        }
        if let Some((key, value)) = line.trim().split_once('=') {
            state.update(key, value);
            if key == "progress" {
                on_progress(state.fraction(expected_duration_secs));
            }
        }
    }

    let status = child.wait().await?;
    let stderr_output = match stderr_task {
        Some(task) => task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
        None => String::new(),
    };

    if !status.success() {
        return Err(FfmpegError::Exited {
            program: tools.ffmpeg.display().to_string(),
            status: status.to_string(),
            stderr: stderr_output.trim().to_string(),
        });
    }

    tracing::info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        out_time_secs = state.out_time_secs,
        "ffmpeg finished"
    );
    Ok(())
}

/// Drain stderr concurrently so ffmpeg never blocks on a full pipe.
pub(crate) fn drain_stderr(
    child: &mut tokio::process::Child,
) -> Option<tokio::task::JoinHandle<String>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output).await {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    }))
}

/// The last `max_lines` non-blank lines of ffmpeg's stderr, which is where
/// it puts the reason it gave up.
pub fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(max_lines)..].join("\n")
}

/// Run a short command and capture stdout.
async fn capture_stdout(
    program: &Path,
    args: &[&str],
    input: Option<&Path>,
) -> Result<String, FfmpegError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(input) = input {
        cmd.arg(input);
    }
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| FfmpegError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(FfmpegError::Exited {
            program: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Probe a media file into a [`MediaSource`].
pub async fn probe_media(tools: &FfmpegTools, path: &Path) -> OverlaycutResult<MediaSource> {
    if !path.exists() {
        return Err(OverlaycutError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let json = capture_stdout(
        &tools.ffprobe,
        &[
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ],
        Some(path),
    )
    .await
    .map_err(|e| OverlaycutError::source_load(format!("{}: {e}", path.display())))?;

    let source = parse_probe_output(&json, path)
        .map_err(|e| OverlaycutError::source_load(format!("{}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        duration_secs = source.duration_secs,
        width = source.width,
        height = source.height,
        has_audio = source.has_audio,
        "Probed source"
    );
    Ok(source)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &str, path: &Path) -> Result<MediaSource, FfmpegError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| FfmpegError::Probe(e.to_string()))?;

    let streams = value
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some("video"))
        .ok_or_else(|| FfmpegError::Probe("no video stream".to_string()))?;
    let has_audio = streams
        .iter()
        .any(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some("audio"));

    let as_f64 = |v: Option<&serde_json::Value>| {
        v.and_then(|d| d.as_str())
            .and_then(|s| s.parse::<f64>().ok())
    };
    let duration_secs = as_f64(value.get("format").and_then(|f| f.get("duration")))
        .or_else(|| as_f64(video.get("duration")))
        .ok_or_else(|| FfmpegError::Probe("no duration".to_string()))?;

    let width = video.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(FfmpegError::Probe("video stream has no dimensions".to_string()));
    }

    let fps = video
        .get("avg_frame_rate")
        .or_else(|| video.get("r_frame_rate"))
        .and_then(|f| f.as_str())
        .and_then(parse_frame_rate);

    let mut source = MediaSource::new(path, duration_secs, width, height).with_audio(has_audio);
    source.fps = fps;
    Ok(source)
}

/// Parse `30000/1001` or `25` style rates.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Names of filters compiled into ffmpeg.
pub async fn list_filters(tools: &FfmpegTools) -> Result<HashSet<String>, FfmpegError> {
    let out = capture_stdout(&tools.ffmpeg, &["-hide_banner", "-filters"], None).await?;
    Ok(parse_filter_list(&out))
}

/// Names of encoders compiled into ffmpeg.
pub async fn list_encoders(tools: &FfmpegTools) -> Result<HashSet<String>, FfmpegError> {
    let out = capture_stdout(&tools.ffmpeg, &["-hide_banner", "-encoders"], None).await?;
    Ok(parse_encoder_list(&out))
}

fn parse_filter_list(out: &str) -> HashSet<String> {
    out.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let _flags = tokens.next()?;
            let name = tokens.next()?;
            let io = tokens.next()?;
            io.contains("->").then(|| name.to_string())
        })
        .collect()
}

fn parse_encoder_list(out: &str) -> HashSet<String> {
    out.lines()
        .skip_while(|line| line.trim() != "------")
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
        .collect()
}

/// Encoder arguments for a container and quality profile.
pub fn codec_args(container: Container, profile: &QualityProfile, with_audio: bool) -> Vec<String> {
    let mut args: Vec<String> = vec!["-c:v".to_string(), container.video_codec().to_string()];

    match (profile, container) {
        (
            QualityProfile::FilterGraph {
                crf,
                preset,
                max_bitrate_kbps,
            },
            Container::Mp4,
        ) => {
            args.extend(["-preset".to_string(), preset.clone(), "-crf".to_string(), crf.to_string()]);
            if let Some(max) = max_bitrate_kbps {
                args.extend([
                    "-maxrate".to_string(),
                    format!("{max}k"),
                    "-bufsize".to_string(),
                    format!("{}k", max * 2),
                ]);
            }
        }
        (
            QualityProfile::FilterGraph {
                crf,
                max_bitrate_kbps,
                ..
            },
            Container::Webm,
        ) => {
            args.extend(["-crf".to_string(), crf.to_string()]);
            let cap = max_bitrate_kbps.map(|m| format!("{m}k")).unwrap_or_else(|| "0".to_string());
            args.extend(["-b:v".to_string(), cap, "-deadline".to_string(), "good".to_string()]);
        }
        (
            QualityProfile::FrameCapture {
                video_bitrate_kbps, ..
            },
            Container::Mp4,
        ) => {
            args.extend([
                "-preset".to_string(),
                "fast".to_string(),
                "-b:v".to_string(),
                format!("{video_bitrate_kbps}k"),
            ]);
        }
        (
            QualityProfile::FrameCapture {
                video_bitrate_kbps, ..
            },
            Container::Webm,
        ) => {
            args.extend([
                "-b:v".to_string(),
                format!("{video_bitrate_kbps}k"),
                "-deadline".to_string(),
                "realtime".to_string(),
                "-cpu-used".to_string(),
                "4".to_string(),
            ]);
        }
    }

    args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);

    if with_audio {
        args.extend([
            "-c:a".to_string(),
            container.audio_codec().to_string(),
            "-b:a".to_string(),
            format!("{}k", profile.audio_bitrate_kbps()),
        ]);
    } else {
        args.push("-an".to_string());
    }

    if container == Container::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlaycut_project_model::{BackendKind, QualityPreset};

    #[test]
    fn test_progress_state_parses_microseconds() {
        let mut state = ProgressState::default();
        state.update("out_time_ms", "2500000");
        assert!((state.out_time_secs - 2.5).abs() < 1e-9);
        assert!((state.fraction(10.0) - 0.25).abs() < 1e-9);
        state.update("progress", "end");
        assert_eq!(state.fraction(10.0), 1.0);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = "banner\n\nInput #0\n  Stream #0:0\nUnknown encoder 'libx264'\n\n";
        assert_eq!(stderr_tail(stderr, 2), "  Stream #0:0\nUnknown encoder 'libx264'");
        assert_eq!(stderr_tail("", 4), "");
        assert_eq!(stderr_tail("only\n", 4), "only");
    }

    #[test]
    fn test_progress_fraction_without_duration() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "1000000");
        assert_eq!(state.fraction(0.0), 0.0);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "30000/1001"},
                {"codec_type": "audio", "sample_rate": "48000"}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let source = parse_probe_output(json, Path::new("/media/clip.mp4")).unwrap();
        assert_eq!((source.width, source.height), (1920, 1080));
        assert!(source.has_audio);
        assert!((source.duration_secs - 12.48).abs() < 1e-9);
        assert!((source.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_output_requires_video() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(parse_probe_output(json, Path::new("a.wav")).is_err());
    }

    #[test]
    fn test_parse_filter_list() {
        let out = "Filters:\n  T.. = Timeline support\n TSC drawtext          V->V       Draw text on top of video frames.\n ... concat            N->N       Concatenate audio and video streams.\n";
        let filters = parse_filter_list(out);
        assert!(filters.contains("drawtext"));
        assert!(filters.contains("concat"));
        assert!(!filters.contains("="));
    }

    #[test]
    fn test_parse_encoder_list() {
        let out = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264\n A....D aac                  AAC\n";
        let encoders = parse_encoder_list(out);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("aac"));
        assert_eq!(encoders.len(), 2);
    }

    #[test]
    fn test_codec_args_filter_graph_mp4() {
        let profile = QualityProfile::for_backend(QualityPreset::Balanced, BackendKind::FilterGraph);
        let args = codec_args(Container::Mp4, &profile, true);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-maxrate 5000k -bufsize 10000k"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.ends_with("-movflags +faststart"));
    }

    #[test]
    fn test_codec_args_frame_capture_webm_without_audio() {
        let profile = QualityProfile::for_backend(QualityPreset::Low, BackendKind::FrameCapture);
        let args = codec_args(Container::Webm, &profile, false);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-b:v 1500k"));
        assert!(joined.contains("-an"));
        assert!(!joined.contains("movflags"));
    }

    #[test]
    fn test_command_exists_for_missing_absolute_path() {
        assert!(!command_exists(Path::new("/definitely/not/here/ffmpeg")));
    }
}
