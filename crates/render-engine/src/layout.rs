//! Caption and watermark metrics shared by both backends.

use overlaycut_project_model::{
    display_scale_for, scaled_font_size, CaptionStyle, Placement, VerticalAnchor,
};

/// Opacity applied to every watermark.
pub const WATERMARK_OPACITY: f64 = 0.9;

/// Drop shadow used when a caption has no background box.
pub const SHADOW_OFFSET_PX: i64 = 2;
pub const SHADOW_OPACITY: f64 = 0.6;

/// Line height as a multiple of font size.
pub const LINE_SPACING: f64 = 1.2;

/// Font size in output pixels for a caption rendered at `output_height`.
pub fn caption_font_px(style: &CaptionStyle, output_height: u32) -> f64 {
    scaled_font_size(style.font_size, Some(display_scale_for(output_height))).round()
}

/// Padding between caption text and its background box edge.
pub fn caption_padding(font_px: f64) -> f64 {
    (font_px * 0.3).round().max(2.0)
}

/// Number of lines a caption's text occupies.
pub fn line_count(text: &str) -> usize {
    text.lines().count().max(1)
}

/// Vertical extent `(top, height)` of a full-width caption band.
pub fn full_width_band(placement: &Placement, font_px: f64, lines: usize) -> (f64, f64) {
    let padding = caption_padding(font_px);
    let height = (font_px * LINE_SPACING * lines as f64 + padding * 2.0).round();
    let top = match placement.anchor.vertical {
        VerticalAnchor::Top => placement.y,
        VerticalAnchor::Middle => placement.y - height / 2.0,
        VerticalAnchor::Bottom => placement.y - height,
    };
    (top.round(), height)
}
