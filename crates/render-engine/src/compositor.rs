//! Frame compositor for the frame-capture backend.
//!
//! Draws captions and watermarks onto decoded RGBA frames, and builds the
//! letterboxed frames shown for trailer slides. Geometry comes from the same
//! resolver and metrics the filter graph uses, so both backends place
//! overlays identically. Assets that fail to load are dropped with a warning
//! instead of failing the export.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, Blend};
use imageproc::rect::Rect;
use rusttype::{point, Font, Scale};

use overlaycut_common::error::{OverlaycutError, OverlaycutResult};
use overlaycut_project_model::{
    display_scale_for, BackgroundStyle, Caption, ImageAsset, OverlayKind, Placement,
    PlacementResolver, Rgb, TextAlign, TrailerSlide, Watermark,
};

use crate::export::RenderJob;
use crate::layout::{
    caption_font_px, caption_padding, full_width_band, line_count, LINE_SPACING,
    SHADOW_OFFSET_PX, SHADOW_OPACITY, WATERMARK_OPACITY,
};

/// Fonts tried when no font file is configured.
pub const FALLBACK_FONT_PATHS: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Background behind letterboxed slides.
pub const SLIDE_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Rasterizes caption text with a loaded TrueType font.
pub struct TextRenderer {
    font: Font<'static>,
    path: PathBuf,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer").field("path", &self.path).finish()
    }
}

impl TextRenderer {
    pub fn load(path: &Path) -> OverlaycutResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| OverlaycutError::asset_load(path, e.to_string()))?;
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| OverlaycutError::asset_load(path, "not a usable TrueType font"))?;
        Ok(Self {
            font,
            path: path.to_path_buf(),
        })
    }

    /// Load `preferred`, or the first fallback font that exists.
    pub fn discover(preferred: Option<&Path>) -> OverlaycutResult<Self> {
        if let Some(path) = preferred {
            return Self::load(path);
        }
        FALLBACK_FONT_PATHS
            .iter()
            .map(Path::new)
            .filter(|p| p.is_file())
            .find_map(|p| Self::load(p).ok())
            .ok_or_else(|| OverlaycutError::asset_load("<system font>", "no usable font found"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn line_width(&self, line: &str, scale: Scale) -> f32 {
        self.font
            .layout(line, scale, point(0.0, 0.0))
            .last()
            .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }

    /// `(width, height)` of a text block at `px`.
    pub fn measure(&self, text: &str, px: f32) -> (f32, f32) {
        let scale = Scale::uniform(px);
        let width = text
            .lines()
            .map(|line| self.line_width(line, scale))
            .fold(0.0f32, f32::max);
        let height = px * LINE_SPACING as f32 * line_count(text) as f32;
        (width, height)
    }

    /// Draw `text` with its block's top-left at `(x, y)`. Lines are aligned
    /// within the block width.
    pub fn draw(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        px: f32,
        origin: (f32, f32),
        align: TextAlign,
        color: Rgba<u8>,
    ) {
        let scale = Scale::uniform(px);
        let (block_w, _) = self.measure(text, px);
        let line_h = px * LINE_SPACING as f32;
        let ascent = self.font.v_metrics(scale).ascent;
        // Center the glyph run vertically inside each line box.
        let leading = (line_h - px) / 2.0;

        for (i, line) in text.lines().enumerate() {
            let w = self.line_width(line, scale);
            let x = match align {
                TextAlign::Left => origin.0,
                TextAlign::Center => origin.0 + (block_w - w) / 2.0,
                TextAlign::Right => origin.0 + block_w - w,
            };
            let baseline = origin.1 + i as f32 * line_h + leading + ascent;
            for glyph in self.font.layout(line, scale, point(x, baseline)) {
                let Some(bb) = glyph.pixel_bounding_box() else {
                    continue;
                };
                glyph.draw(|gx, gy, coverage| {
                    let alpha = (color[3] as f32 * coverage).round() as u8;
                    if alpha == 0 {
                        return;
                    }
                    blend_pixel(
                        canvas,
                        bb.min.x as i64 + gx as i64,
                        bb.min.y as i64 + gy as i64,
                        Rgba([color[0], color[1], color[2], alpha]),
                    );
                });
            }
        }
    }
}

fn blend_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
}

/// Alpha-blend a filled rectangle, clipped to the canvas.
pub fn fill_rect(canvas: &mut RgbaImage, x: f64, y: f64, w: f64, h: f64, color: Rgba<u8>) {
    let x0 = x.round().max(0.0) as i64;
    let y0 = y.round().max(0.0) as i64;
    let x1 = ((x + w).round() as i64).min(canvas.width() as i64);
    let y1 = ((y + h).round() as i64).min(canvas.height() as i64);
    if x1 <= x0 || y1 <= y0 || color[3] == 0 {
        return;
    }
    let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
    let mut blend = Blend(std::mem::take(canvas));
    draw_filled_rect_mut(&mut blend, rect, color);
    *canvas = blend.0;
}

fn rgba(color: Rgb, alpha: f64) -> Rgba<u8> {
    Rgba(color.to_rgba(alpha))
}

/// A watermark decoded, scaled and faded, ready to stamp.
#[derive(Debug, Clone)]
struct StampedWatermark {
    overlay: Watermark,
    image: RgbaImage,
    origin: (i64, i64),
}

/// Per-frame overlay renderer for one export.
#[derive(Debug)]
pub struct FrameCompositor {
    width: u32,
    height: u32,
    source_duration: f64,
    resolver: PlacementResolver,
    font: Option<TextRenderer>,
    captions: Vec<Caption>,
    watermarks: Vec<StampedWatermark>,
    slides: Vec<RgbaImage>,
}

impl FrameCompositor {
    /// Load every asset `job` needs. Failures come back as warnings and the
    /// affected overlay is left out.
    pub fn build(job: &RenderJob) -> (Self, Vec<OverlaycutError>) {
        let mut warnings = Vec::new();
        let (width, height) = (job.width, job.height);

        let font = if job.overlays.captions.is_empty() {
            None
        } else {
            match TextRenderer::discover(job.font_file.as_deref()) {
                Ok(font) => {
                    tracing::debug!(font = %font.path().display(), "Caption font loaded");
                    Some(font)
                }
                Err(e) => {
                    warnings.push(e);
                    None
                }
            }
        };

        let mut watermarks = Vec::with_capacity(job.overlays.watermarks.len());
        for watermark in &job.overlays.watermarks {
            match stamp_watermark(watermark, width, height, &job.resolver) {
                Ok(stamped) => watermarks.push(stamped),
                Err(e) => warnings.push(e),
            }
        }

        let slides = job
            .overlays
            .slides
            .iter()
            .map(|slide| match letterbox_slide(slide, width, height) {
                Ok(frame) => frame,
                Err(e) => {
                    warnings.push(e);
                    RgbaImage::from_pixel(width, height, SLIDE_BACKGROUND)
                }
            })
            .collect();

        let compositor = Self {
            width,
            height,
            source_duration: job.source.duration_secs,
            resolver: job.resolver,
            font,
            captions: job.overlays.captions.clone(),
            watermarks,
            slides,
        };
        (compositor, warnings)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether captions can be drawn (a font loaded).
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn watermark_count(&self) -> usize {
        self.watermarks.len()
    }

    /// Draw overlays active at base-clip time `t` onto `frame`: captions
    /// first, then watermarks in list order.
    pub fn compose(&self, frame: &mut RgbaImage, t: f64) {
        if frame.dimensions() != (self.width, self.height) {
            *frame = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
        }
        if let Some(font) = &self.font {
            for caption in self
                .captions
                .iter()
                .filter(|c| c.is_active(t, self.source_duration))
            {
                self.draw_caption(frame, font, caption);
            }
        }
        for stamp in self
            .watermarks
            .iter()
            .filter(|w| w.overlay.is_active(t, self.source_duration))
        {
            imageops::overlay(frame, &stamp.image, stamp.origin.0, stamp.origin.1);
        }
    }

    /// Full output frame for trailer slide `index`.
    pub fn slide_frame(&self, index: usize) -> Option<&RgbaImage> {
        self.slides.get(index)
    }

    fn draw_caption(&self, frame: &mut RgbaImage, font: &TextRenderer, caption: &Caption) {
        let style = &caption.style;
        let font_px = caption_font_px(style, self.height);
        let padding = caption_padding(font_px);
        let full_width = style.is_full_width();
        let placement = self.resolver.resolve(
            style.position,
            self.width,
            self.height,
            OverlayKind::Caption { full_width },
            Some(display_scale_for(self.height)),
        );
        let (text_w, text_h) = font.measure(&caption.text, font_px as f32);
        let (text_w, text_h) = (text_w as f64, text_h as f64);
        let background = rgba(style.background_color, style.background_opacity);
        let text_color = rgba(style.text_color, 1.0);

        let origin = if full_width {
            let (top, band_h) = full_width_band(&placement, font_px, line_count(&caption.text));
            fill_rect(frame, 0.0, top, self.width as f64, band_h, background);
            let x = match style.text_align {
                TextAlign::Left => padding,
                TextAlign::Center => (self.width as f64 - text_w) / 2.0,
                TextAlign::Right => self.width as f64 - text_w - padding,
            };
            (x, top + (band_h - text_h) / 2.0)
        } else {
            let (box_x, box_y) = boxed_origin(&placement, text_w, text_h, padding);
            if style.background != BackgroundStyle::None {
                fill_rect(
                    frame,
                    box_x,
                    box_y,
                    text_w + padding * 2.0,
                    text_h + padding * 2.0,
                    background,
                );
            }
            (box_x + padding, box_y + padding)
        };

        let origin = (origin.0 as f32, origin.1 as f32);
        if style.background == BackgroundStyle::None {
            let offset = SHADOW_OFFSET_PX as f32;
            font.draw(
                frame,
                &caption.text,
                font_px as f32,
                (origin.0 + offset, origin.1 + offset),
                style.text_align,
                rgba(Rgb::BLACK, SHADOW_OPACITY),
            );
        }
        font.draw(frame, &caption.text, font_px as f32, origin, style.text_align, text_color);
    }
}

/// Top-left of a caption's padded box so its anchor lands on the placement.
fn boxed_origin(placement: &Placement, text_w: f64, text_h: f64, padding: f64) -> (f64, f64) {
    placement.top_left(text_w + padding * 2.0, text_h + padding * 2.0)
}

fn load_image(asset: &ImageAsset) -> OverlaycutResult<RgbaImage> {
    let path = asset.path();
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| OverlaycutError::asset_load(path, e.to_string()))
}

fn stamp_watermark(
    watermark: &Watermark,
    width: u32,
    height: u32,
    resolver: &PlacementResolver,
) -> OverlaycutResult<StampedWatermark> {
    let source = load_image(&watermark.image)?;
    let f = watermark.effective_scale();
    let w = ((source.width() as f64 * f).round() as u32).max(1);
    let h = ((source.height() as f64 * f).round() as u32).max(1);
    let mut image = if (w, h) == source.dimensions() {
        source
    } else {
        imageops::resize(&source, w, h, FilterType::Lanczos3)
    };
    for pixel in image.pixels_mut() {
        pixel[3] = (pixel[3] as f64 * WATERMARK_OPACITY).round() as u8;
    }

    let placement = resolver.resolve(
        watermark.position,
        width,
        height,
        OverlayKind::Watermark,
        Some(display_scale_for(height)),
    );
    let (x, y) = placement.top_left(w as f64, h as f64);
    Ok(StampedWatermark {
        overlay: watermark.clone(),
        image,
        origin: (x.round() as i64, y.round() as i64),
    })
}

/// Scale `slide` to fit the frame, centered on [`SLIDE_BACKGROUND`].
fn letterbox_slide(slide: &TrailerSlide, width: u32, height: u32) -> OverlaycutResult<RgbaImage> {
    let image = load_image(&slide.image)?;
    let mut frame = RgbaImage::from_pixel(width, height, SLIDE_BACKGROUND);
    let (iw, ih) = image.dimensions();
    let fit = (width as f64 / iw as f64).min(height as f64 / ih as f64);
    let w = ((iw as f64 * fit).round() as u32).clamp(1, width);
    let h = ((ih as f64 * fit).round() as u32).clamp(1, height);
    let scaled = if (w, h) == (iw, ih) {
        image
    } else {
        imageops::resize(&image, w, h, FilterType::Lanczos3)
    };
    let x = (width - w) / 2;
    let y = (height - h) / 2;
    imageops::overlay(&mut frame, &scaled, x as i64, y as i64);
    Ok(frame)
}
