//! Overlaycut Render Engine
//!
//! Turns a base clip plus captions, watermarks and trailer slides into one
//! encoded artifact, through either of two backends.
//!
//! # Pipeline Architecture
//!
//! ```text
//!                        ┌─ filter-graph ───────────────────────────────┐
//! source.mp4 ──┐         │  drawtext/overlay graph ─► main clip ─┐      │
//!              ├─ job ───┤  slide ─► still clip ─────────────────┼─ concat
//! overlays ────┘         │                                       ▼      │
//!                        └───────────────────────────────── export.mp4 ─┘
//!                        ┌─ frame-capture ──────────────────────────────┐
//!                        │  decode RGBA ─► compose ─► bounded queue ─►  │
//!                        │  slide frames ──────────►     encoder (+audio)│
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! [`Exporter`] drives either backend through the same phases and returns
//! the artifact bytes with any non-fatal warnings.

pub mod audio;
pub mod compositor;
pub mod export;
pub mod ffmpeg;
pub mod filter_graph;
pub mod frame_capture;
pub mod graph_backend;
pub mod layout;
pub mod progress;
pub mod session;

pub use audio::{AudioChain, AudioOutcome, AudioStrategy};
pub use export::*;
pub use frame_capture::{EncoderSink, FrameCaptureBackend, FramePipeline, FrameSource, SinkConfig};
pub use graph_backend::{FfmpegEngine, FilterGraphBackend, TranscodeEngine};
pub use progress::{ExportObserver, ExportPhase, ExportProgress, ExportState, ProgressCallback};
pub use session::{CancelHandle, ExportSession, ExportWarning};
