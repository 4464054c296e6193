//! Filter-graph compilation.
//!
//! Overlays compile into one linear chain over the base video:
//!
//! ```text
//! [0:v] base ─► [base] ─► caption 0 ─► [v0] ─► … ─► watermark k ─► [vout]
//!                                                        ▲
//!                                   [k:v] scale,format,alpha
//! ```
//!
//! Captions are composed first and watermarks on top. Trailer slides cannot
//! be expressed as gated overlays, so each becomes its own still-image clip
//! and the results are concatenated in a second stage.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::{
    display_scale_for, BackgroundStyle, Caption, HorizontalAnchor, OverlayKind, OverlaySet,
    Placement, PlacementResolver, Rgb, TextAlign, VerticalAnchor, Watermark,
};

use crate::layout::{
    caption_font_px, caption_padding, full_width_band, line_count, SHADOW_OFFSET_PX,
    SHADOW_OPACITY, WATERMARK_OPACITY,
};

/// Characters with meaning inside a filter graph or drawtext value.
pub const RESERVED_CHARS: [char; 8] = ['\\', '\'', ':', '[', ']', ',', ';', '%'];

/// Backslash-prefix every reserved character.
pub fn escape_filter_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        if RESERVED_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape_filter_text`].
pub fn unescape_filter_text(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Escape a value for use as a filter option inside a graph.
///
/// ffmpeg unescapes once while splitting the graph and again while splitting
/// filter options, so the value is escaped for both passes.
pub fn escape_filter_value(raw: &str) -> String {
    escape_filter_text(&escape_filter_text(raw))
}

/// Fail if `value` contains a reserved character without a preceding
/// backslash, or ends in a dangling backslash.
pub fn ensure_escaped(value: &str) -> OverlaycutResult<()> {
    let mut chars = value.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if chars.next().is_none() {
                return Err(OverlaycutError::encoding(format!(
                    "dangling escape at byte {i} in filter value {value:?}"
                )));
            }
            continue;
        }
        if RESERVED_CHARS.contains(&c) {
            return Err(OverlaycutError::encoding(format!(
                "unescaped {c:?} at byte {i} in filter value {value:?}"
            )));
        }
    }
    Ok(())
}

/// A compiled main-render graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    /// The `-filter_complex` string; its output label is `[vout]`.
    pub filter: String,
    /// Extra image inputs, in input order starting at index 1.
    pub image_inputs: Vec<PathBuf>,
    /// Caption operations emitted.
    pub caption_ops: usize,
    /// Watermark operations emitted.
    pub watermark_ops: usize,
}

/// Output geometry and timing shared by every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Base clip duration; overlay intervals are clamped to it.
    pub duration_secs: f64,
    pub resolver: PlacementResolver,
    /// Font file for drawtext. Falls back to the caption's font family.
    pub font_file: Option<PathBuf>,
}

/// Compiles overlays into a filter graph.
#[derive(Debug, Clone)]
pub struct FilterGraphBuilder {
    spec: GraphSpec,
}

impl FilterGraphBuilder {
    pub fn new(spec: GraphSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &GraphSpec {
        &self.spec
    }

    pub fn build(&self, overlays: &OverlaySet) -> OverlaycutResult<CompiledGraph> {
        let spec = &self.spec;
        let mut stages: Vec<String> = Vec::new();
        let mut sidechains: Vec<String> = Vec::new();
        let mut image_inputs = Vec::new();
        let mut caption_ops = 0;
        let mut watermark_ops = 0;

        for caption in &overlays.captions {
            let Some((start, end)) = caption.visible_interval(spec.duration_secs) else {
                tracing::debug!(text = %caption.text, "Caption never visible; skipped");
                continue;
            };
            let enable = format!("enable='gte(t,{start:.3})*lt(t,{end:.3})'");
            stages.extend(self.caption_ops(caption, &enable)?);
            caption_ops += 1;
        }

        for watermark in &overlays.watermarks {
            let Some((start, end)) = watermark.visible_interval(spec.duration_secs) else {
                continue;
            };
            let input_index = image_inputs.len() + 1;
            let label = format!("wm{watermark_ops}");
            sidechains.push(format!(
                "[{input_index}:v]{}[{label}]",
                watermark_prep(watermark)
            ));
            let enable = format!("enable='between(t,{start:.3},{end:.3})'");
            stages.push(format!(
                "[{label}]overlay={}:{enable}",
                self.watermark_position(watermark)
            ));
            image_inputs.push(watermark.image.path.clone());
            watermark_ops += 1;
        }

        let mut filter = format!(
            "[0:v]scale={w}:{h}:flags=lanczos,setsar=1,fps={fps},format=yuv420p[base]",
            w = spec.width,
            h = spec.height,
            fps = spec.fps
        );
        for chain in &sidechains {
            let _ = write!(filter, ";{chain}");
        }

        if stages.is_empty() {
            filter.push_str(";[base]null[vout]");
        } else {
            let last = stages.len() - 1;
            let mut current = "base".to_string();
            for (i, op) in stages.iter().enumerate() {
                let next = if i == last {
                    "vout".to_string()
                } else {
                    format!("v{i}")
                };
                // Watermark overlays carry their second input label already.
                let _ = write!(filter, ";[{current}]{op}[{next}]");
                current = next;
            }
        }

        tracing::debug!(
            captions = caption_ops,
            watermarks = watermark_ops,
            filter_len = filter.len(),
            "Filter graph built"
        );

        Ok(CompiledGraph {
            filter,
            image_inputs,
            caption_ops,
            watermark_ops,
        })
    }

    fn caption_ops(&self, caption: &Caption, enable: &str) -> OverlaycutResult<Vec<String>> {
        let spec = &self.spec;
        let style = &caption.style;
        let font_px = caption_font_px(style, spec.height);
        let padding = caption_padding(font_px);
        let lines = line_count(&caption.text);
        let full_width = style.is_full_width();
        let placement = spec.resolver.resolve(
            style.position,
            spec.width,
            spec.height,
            OverlayKind::Caption { full_width },
            Some(display_scale_for(spec.height)),
        );

        let text = escape_filter_value(&caption.text);
        ensure_escaped(&text)?;

        let mut drawtext = format!(
            "drawtext=text={text}:expansion=none:fontsize={font_px}:fontcolor={}",
            style.text_color.to_filter_color(1.0)
        );
        match &spec.font_file {
            Some(path) => {
                let path = escape_filter_value(&path.display().to_string());
                ensure_escaped(&path)?;
                let _ = write!(drawtext, ":fontfile={path}");
            }
            None => {
                let family = escape_filter_value(&style.font_family);
                ensure_escaped(&family)?;
                let _ = write!(drawtext, ":font={family}");
            }
        }
        if lines > 1 {
            let align = match style.text_align {
                TextAlign::Left => "L",
                TextAlign::Center => "C",
                TextAlign::Right => "R",
            };
            let _ = write!(drawtext, ":text_align={align}");
        }

        let mut ops = Vec::with_capacity(2);
        if full_width {
            let (top, band_h) = full_width_band(&placement, font_px, lines);
            ops.push(format!(
                "drawbox=x=0:y={top}:w=iw:h={band_h}:color={}:t=fill:{enable}",
                style.background_color.to_filter_color(style.background_opacity)
            ));
            let x = match style.text_align {
                TextAlign::Left => format!("{padding}"),
                TextAlign::Center => "(w-text_w)/2".to_string(),
                TextAlign::Right => format!("w-text_w-{padding}"),
            };
            let _ = write!(drawtext, ":x={x}:y={top}+({band_h}-text_h)/2");
        } else {
            let (x, y) = text_position_exprs(&placement, padding);
            let _ = write!(drawtext, ":x={x}:y={y}");
            match style.background {
                BackgroundStyle::None => {
                    let _ = write!(
                        drawtext,
                        ":shadowcolor={}:shadowx={SHADOW_OFFSET_PX}:shadowy={SHADOW_OFFSET_PX}",
                        Rgb::BLACK.to_filter_color(SHADOW_OPACITY)
                    );
                }
                _ => {
                    let _ = write!(
                        drawtext,
                        ":box=1:boxcolor={}:boxborderw={padding}",
                        style.background_color.to_filter_color(style.background_opacity)
                    );
                }
            }
        }
        let _ = write!(drawtext, ":{enable}");
        ops.push(drawtext);
        Ok(ops)
    }

    fn watermark_position(&self, watermark: &Watermark) -> String {
        let spec = &self.spec;
        let placement = spec.resolver.resolve(
            watermark.position,
            spec.width,
            spec.height,
            OverlayKind::Watermark,
            Some(display_scale_for(spec.height)),
        );
        let x = match placement.anchor.horizontal {
            HorizontalAnchor::Left | HorizontalAnchor::Span => fmt_px(placement.x),
            HorizontalAnchor::Center => format!("{}-w/2", fmt_px(placement.x)),
            HorizontalAnchor::Right => format!("{}-w", fmt_px(placement.x)),
        };
        let y = match placement.anchor.vertical {
            VerticalAnchor::Top => fmt_px(placement.y),
            VerticalAnchor::Middle => format!("{}-h/2", fmt_px(placement.y)),
            VerticalAnchor::Bottom => format!("{}-h", fmt_px(placement.y)),
        };
        format!("x={x}:y={y}")
    }
}

/// Scale (never above original size), force alpha, apply fixed opacity.
fn watermark_prep(watermark: &Watermark) -> String {
    let f = watermark.effective_scale();
    format!("scale=iw*{f:.4}:ih*{f:.4},format=rgba,colorchannelmixer=aa={WATERMARK_OPACITY}")
}

/// drawtext `x`/`y` expressions placing the text box's anchor point at the
/// placement. With a background box the padding is kept inside the margin.
fn text_position_exprs(placement: &Placement, padding: f64) -> (String, String) {
    let px = fmt_px(placement.x);
    let py = fmt_px(placement.y);
    let x = match placement.anchor.horizontal {
        HorizontalAnchor::Left | HorizontalAnchor::Span => format!("{px}+{padding}"),
        HorizontalAnchor::Center => format!("{px}-text_w/2"),
        HorizontalAnchor::Right => format!("{px}-text_w-{padding}"),
    };
    let y = match placement.anchor.vertical {
        VerticalAnchor::Top => format!("{py}+{padding}"),
        VerticalAnchor::Middle => format!("{py}-text_h/2"),
        VerticalAnchor::Bottom => format!("{py}-text_h-{padding}"),
    };
    (x, y)
}

fn fmt_px(v: f64) -> String {
    format!("{}", v.round() as i64)
}

/// Arguments rendering one trailer slide into a fixed-length clip matching
/// the main render's geometry and audio layout.
#[derive(Debug, Clone)]
pub struct SlideClip<'a> {
    pub image: &'a Path,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub with_audio: bool,
}

impl SlideClip<'_> {
    pub fn args(&self, codec_args: &[String], output: &Path) -> Vec<String> {
        let duration = format!("{:.3}", self.duration_secs);
        let mut args: Vec<String> = vec![
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            self.fps.to_string(),
            "-t".to_string(),
            duration.clone(),
            "-i".to_string(),
            self.image.display().to_string(),
        ];
        if self.with_audio {
            args.extend([
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                duration.clone(),
                "-i".to_string(),
                format!("anullsrc=r={AUDIO_SAMPLE_RATE}:cl=stereo"),
            ]);
        }
        let (w, h) = (self.width, self.height);
        args.extend([
            "-vf".to_string(),
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={},format=yuv420p",
                self.fps
            ),
        ]);
        if self.with_audio {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
            ]);
        }
        args.extend(["-t".to_string(), duration]);
        args.extend(codec_args.iter().cloned());
        if self.with_audio {
            args.extend(audio_format_args());
        }
        args.push(output.display().to_string());
        args
    }
}

/// Sample rate every stage's audio is normalized to so clips concatenate.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

pub fn audio_format_args() -> [String; 4] {
    [
        "-ar".to_string(),
        AUDIO_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "2".to_string(),
    ]
}

/// Body of a concat-demuxer list file.
pub fn concat_manifest(parts: &[PathBuf]) -> String {
    let mut out = String::from("ffconcat version 1.0\n");
    for part in parts {
        let quoted = part.display().to_string().replace('\'', r"'\''");
        let _ = writeln!(out, "file '{quoted}'");
    }
    out
}

/// Arguments concatenating the parts listed in `manifest` into `output`.
pub fn concat_args(manifest: &Path, codec_args: &[String], output: &Path) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.display().to_string(),
    ];
    args.extend(codec_args.iter().cloned());
    args.push(output.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlaycut_project_model::{CaptionStyle, ImageAsset, Overlay, Position, TrailerSlide};

    fn spec() -> GraphSpec {
        GraphSpec {
            width: 1920,
            height: 1080,
            fps: 30,
            duration_secs: 10.0,
            resolver: PlacementResolver::default(),
            font_file: None,
        }
    }

    fn set(overlays: Vec<Overlay>) -> OverlaySet {
        OverlaySet::from_overlays(&overlays)
    }

    #[test]
    fn test_escape_examples() {
        assert_eq!(escape_filter_text("a:b"), r"a\:b");
        assert_eq!(escape_filter_text("it's [x], y; 50%"), r"it\'s \[x\]\, y\; 50\%");
        assert_eq!(escape_filter_text(r"c:\dir"), r"c\:\\dir");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        let raw = r"He said: 'hi', [ok]; \o/ 100%";
        assert_eq!(unescape_filter_text(&escape_filter_text(raw)), raw);
        assert_eq!(
            unescape_filter_text(&unescape_filter_text(&escape_filter_value(raw))),
            raw
        );
    }

    #[test]
    fn test_ensure_escaped() {
        assert!(ensure_escaped(&escape_filter_text("a:b,c")).is_ok());
        assert!(ensure_escaped(&escape_filter_value("a:b,c")).is_ok());
        let err = ensure_escaped("a:b").unwrap_err();
        assert!(matches!(err, OverlaycutError::EncodingEngine { .. }));
        assert!(ensure_escaped(r"trailing\").is_err());
    }

    #[test]
    fn test_empty_overlays_pass_through() {
        let graph = FilterGraphBuilder::new(spec()).build(&OverlaySet::default()).unwrap();
        assert!(graph.filter.ends_with(";[base]null[vout]"));
        assert!(graph.image_inputs.is_empty());
    }

    #[test]
    fn test_caption_gated_by_half_open_interval() {
        let graph = FilterGraphBuilder::new(spec())
            .build(&set(vec![Overlay::Caption(Caption::new("Hi", 2.0, 3.0))]))
            .unwrap();
        assert_eq!(graph.caption_ops, 1);
        assert!(graph.filter.contains("[base]drawtext=text=Hi:"));
        assert!(graph.filter.contains("enable='gte(t,2.000)*lt(t,5.000)'[vout]"));
        assert!(graph.filter.contains(":box=1:"));
    }

    #[test]
    fn test_caption_text_is_escaped() {
        let graph = FilterGraphBuilder::new(spec())
            .build(&set(vec![Overlay::Caption(Caption::new("a:b", 0.0, 1.0))]))
            .unwrap();
        assert!(graph.filter.contains(r"text=a\\\:b:"));
    }

    #[test]
    fn test_no_background_uses_shadow() {
        let caption = Caption::new("Hi", 0.0, 1.0)
            .with_style(CaptionStyle::default().with_background(BackgroundStyle::None));
        let graph = FilterGraphBuilder::new(spec())
            .build(&set(vec![Overlay::Caption(caption)]))
            .unwrap();
        assert!(graph.filter.contains("shadowx=2"));
        assert!(!graph.filter.contains("box=1"));
    }

    #[test]
    fn test_full_width_caption_emits_band() {
        let caption = Caption::new("Wide", 1.0, 2.0)
            .with_style(CaptionStyle::default().with_background(BackgroundStyle::FullWidth));
        let graph = FilterGraphBuilder::new(spec())
            .build(&set(vec![Overlay::Caption(caption)]))
            .unwrap();
        assert!(graph.filter.contains("[base]drawbox=x=0:"));
        assert!(graph.filter.contains(":w=iw:"));
        assert!(graph.filter.contains("[v0]drawtext="));
    }

    #[test]
    fn test_watermark_chain_and_ordering() {
        let wm = Watermark::new(ImageAsset::new("/assets/logo.png"), 0.0, 10.0)
            .with_scale(1.5)
            .with_position(Position::BottomRight);
        let graph = FilterGraphBuilder::new(spec())
            .build(&set(vec![
                Overlay::Watermark(wm),
                Overlay::Caption(Caption::new("Hi", 2.0, 3.0)),
            ]))
            .unwrap();

        assert_eq!(graph.image_inputs, vec![PathBuf::from("/assets/logo.png")]);
        assert!(graph
            .filter
            .contains("[1:v]scale=iw*1.0000:ih*1.0000,format=rgba,colorchannelmixer=aa=0.9[wm0]"));
        assert!(graph
            .filter
            .contains("[v0][wm0]overlay=x=1904-w:y=1064-h:enable='between(t,0.000,10.000)'[vout]"));

        let caption_at = graph.filter.find("drawtext").unwrap();
        let overlay_at = graph.filter.find("overlay=").unwrap();
        assert!(caption_at < overlay_at);
    }

    #[test]
    fn test_multiple_watermarks_relabel() {
        let overlays = (0..3)
            .map(|i| {
                Overlay::Watermark(Watermark::new(
                    ImageAsset::new(format!("/w{i}.png")),
                    0.0,
                    5.0,
                ))
            })
            .collect();
        let graph = FilterGraphBuilder::new(spec()).build(&set(overlays)).unwrap();
        assert!(graph.filter.contains("[base][wm0]overlay="));
        assert!(graph.filter.contains("[v0][wm1]overlay="));
        assert!(graph.filter.contains("[v1][wm2]overlay="));
        assert!(graph.filter.ends_with("[vout]"));
        assert_eq!(graph.image_inputs.len(), 3);
    }

    #[test]
    fn test_slide_clip_args() {
        let slide = TrailerSlide::new(ImageAsset::new("/end.png"), 3.0);
        let clip = SlideClip {
            image: slide.image.path(),
            duration_secs: slide.duration_secs,
            width: 1280,
            height: 720,
            fps: 30,
            with_audio: true,
        };
        let args = clip.args(&["-c:v".to_string(), "libx264".to_string()], Path::new("/w/s0.mp4"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-loop 1 -framerate 30 -t 3.000 -i /end.png"));
        assert!(joined.contains("anullsrc=r=48000:cl=stereo"));
        assert!(joined.contains("force_original_aspect_ratio=decrease,pad=1280:720"));
        assert!(joined.contains("setsar=1,fps=30"));
        assert!(joined.ends_with("/w/s0.mp4"));
    }

    #[test]
    fn test_concat_manifest_quotes_paths() {
        let manifest = concat_manifest(&[PathBuf::from("/w/main.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert!(manifest.contains("file '/w/main.mp4'\n"));
        assert!(manifest.contains(r"file '/w/it'\''s.mp4'"));
    }
}
