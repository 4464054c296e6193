//! Overlay types: captions, watermarks, and trailer slides.
//!
//! Overlays are supplied by the caller and never mutated by the engine.
//! Styles are fully resolved on construction/deserialization: every field
//! has a value and ranged fields are clamped once, here.

use serde::{Deserialize, Deserializer, Serialize};

use crate::media::{ImageAsset, ModelError};

/// Where an overlay sits inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    Top,
    TopRight,
    Center,
    BottomLeft,
    Bottom,
    BottomRight,
    /// Percentages of the container (0-100). Always wins over named zones.
    Custom { x: f64, y: f64 },
}

/// Vertical band a position falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalZone {
    Top,
    Middle,
    Bottom,
}

impl Position {
    pub fn custom(x: f64, y: f64) -> Self {
        Position::Custom { x, y }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Position::Custom { .. })
    }

    /// Vertical zone of a named position. Custom positions report `Middle`.
    pub fn vertical_zone(&self) -> VerticalZone {
        match self {
            Position::TopLeft | Position::Top | Position::TopRight => VerticalZone::Top,
            Position::Center | Position::Custom { .. } => VerticalZone::Middle,
            Position::BottomLeft | Position::Bottom | Position::BottomRight => {
                VerticalZone::Bottom
            }
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Bottom
    }
}

/// An sRGB color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rgb` or `#rrggbb` (the leading `#` is optional).
    pub fn parse_hex(value: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidColor {
            value: value.to_string(),
        };
        let hex = value.trim().trim_start_matches('#');
        let expanded = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
            6 => hex.to_string(),
            _ => return Err(invalid()),
        };
        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Color with alpha in the `0xRRGGBB@A` form filter graphs accept.
    pub fn to_filter_color(self, alpha: f64) -> String {
        format!(
            "0x{:02X}{:02X}{:02X}@{:.2}",
            self.r,
            self.g,
            self.b,
            alpha.clamp(0.0, 1.0)
        )
    }

    /// RGBA bytes with alpha in `[0, 1]`.
    pub fn to_rgba(self, alpha: f64) -> [u8; 4] {
        [
            self.r,
            self.g,
            self.b,
            (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
        ]
    }
}

impl TryFrom<String> for Rgb {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::parse_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_hex()
    }
}

/// Horizontal alignment of caption lines inside their box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Background treatment behind caption text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundStyle {
    /// No box; text gets a drop shadow for legibility.
    None,
    /// Box sized to the text metrics.
    #[default]
    Adaptive,
    /// Band spanning the full container width.
    FullWidth,
}

/// Fully resolved caption styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Font size in pixels at the reference output height.
    #[serde(deserialize_with = "de_font_size")]
    pub font_size: f64,

    pub font_family: String,

    pub text_align: TextAlign,

    pub text_color: Rgb,

    pub background: BackgroundStyle,

    pub background_color: Rgb,

    /// Opacity of the background box, `[0, 1]`.
    #[serde(deserialize_with = "de_unit_interval")]
    pub background_opacity: f64,

    pub position: Position,
}

pub const MIN_FONT_SIZE: f64 = 6.0;

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_size: 32.0,
            font_family: "sans-serif".to_string(),
            text_align: TextAlign::Center,
            text_color: Rgb::WHITE,
            background: BackgroundStyle::Adaptive,
            background_color: Rgb::BLACK,
            background_opacity: 0.6,
            position: Position::Bottom,
        }
    }
}

impl CaptionStyle {
    pub fn with_font_size(mut self, font_size: f64) -> Self {
        self.font_size = font_size.max(MIN_FONT_SIZE);
        self
    }

    pub fn with_background(mut self, background: BackgroundStyle) -> Self {
        self.background = background;
        self
    }

    pub fn with_background_opacity(mut self, opacity: f64) -> Self {
        self.background_opacity = clamp_unit(opacity);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn is_full_width(&self) -> bool {
        self.background == BackgroundStyle::FullWidth
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn de_unit_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    f64::deserialize(deserializer).map(clamp_unit)
}

fn de_font_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    f64::deserialize(deserializer).map(|size| {
        if size.is_finite() {
            size.max(MIN_FONT_SIZE)
        } else {
            MIN_FONT_SIZE
        }
    })
}

/// A text overlay with an active interval `[start, start + duration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub start_secs: f64,
    pub duration_secs: f64,
    #[serde(default)]
    pub style: CaptionStyle,
}

impl Caption {
    pub fn new(text: impl Into<String>, start_secs: f64, duration_secs: f64) -> Self {
        Self {
            text: text.into(),
            start_secs,
            duration_secs,
            style: CaptionStyle::default(),
        }
    }

    pub fn with_style(mut self, style: CaptionStyle) -> Self {
        self.style = style;
        self
    }

    /// Active interval clamped to the source, half-open. `None` when the
    /// caption would never be visible.
    pub fn visible_interval(&self, source_duration: f64) -> Option<(f64, f64)> {
        let start = self.start_secs.max(0.0);
        let end = (self.start_secs + self.duration_secs.max(0.0)).min(source_duration);
        (end > start).then_some((start, end))
    }

    pub fn is_active(&self, t: f64, source_duration: f64) -> bool {
        self.visible_interval(source_duration)
            .is_some_and(|(start, end)| t >= start && t < end)
    }
}

/// An image overlay active over the closed interval `[start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub image: ImageAsset,
    #[serde(default = "default_watermark_position")]
    pub position: Position,
    /// Size multiplier relative to the image's own size.
    #[serde(default = "default_watermark_scale")]
    pub scale: f64,
    pub start_secs: f64,
    pub end_secs: f64,
}

fn default_watermark_position() -> Position {
    Position::BottomRight
}

fn default_watermark_scale() -> f64 {
    1.0
}

/// Smallest scale a watermark is drawn at.
pub const MIN_WATERMARK_SCALE: f64 = 0.01;

impl Watermark {
    pub fn new(image: ImageAsset, start_secs: f64, end_secs: f64) -> Self {
        Self {
            image,
            position: default_watermark_position(),
            scale: default_watermark_scale(),
            start_secs,
            end_secs,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Scale actually applied: never above the image's original size.
    pub fn effective_scale(&self) -> f64 {
        if !self.scale.is_finite() {
            return 1.0;
        }
        self.scale.clamp(MIN_WATERMARK_SCALE, 1.0)
    }

    /// Active interval clamped to the source, closed at both ends.
    pub fn visible_interval(&self, source_duration: f64) -> Option<(f64, f64)> {
        let start = self.start_secs.max(0.0);
        let end = self.end_secs.min(source_duration);
        (end >= start).then_some((start, end))
    }

    pub fn is_active(&self, t: f64, source_duration: f64) -> bool {
        self.visible_interval(source_duration)
            .is_some_and(|(start, end)| t >= start && t <= end)
    }
}

/// A still image appended after the base clip for a fixed duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailerSlide {
    pub image: ImageAsset,
    pub duration_secs: f64,
}

impl TrailerSlide {
    pub fn new(image: ImageAsset, duration_secs: f64) -> Self {
        Self {
            image,
            duration_secs,
        }
    }
}

/// Any time-bound visual element of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Overlay {
    Caption(Caption),
    Watermark(Watermark),
    TrailerSlide(TrailerSlide),
}

/// Overlays split by kind, each list keeping caller order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlaySet {
    pub captions: Vec<Caption>,
    pub watermarks: Vec<Watermark>,
    pub slides: Vec<TrailerSlide>,
}

impl OverlaySet {
    pub fn from_overlays(overlays: &[Overlay]) -> Self {
        let mut set = Self::default();
        for overlay in overlays {
            match overlay {
                Overlay::Caption(c) => set.captions.push(c.clone()),
                Overlay::Watermark(w) => set.watermarks.push(w.clone()),
                Overlay::TrailerSlide(s) => set.slides.push(s.clone()),
            }
        }
        set
    }

    /// Slide durations in play order; negative durations count as zero.
    pub fn slide_durations(&self) -> Vec<f64> {
        self.slides
            .iter()
            .map(|s| s.duration_secs.max(0.0))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty() && self.watermarks.is_empty() && self.slides.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_colors() {
        assert_eq!(Rgb::parse_hex("#ff8000").unwrap(), Rgb::new(255, 128, 0));
        assert_eq!(Rgb::parse_hex("fff").unwrap(), Rgb::WHITE);
        assert!(Rgb::parse_hex("#12345").is_err());
        assert!(Rgb::parse_hex("#gggggg").is_err());
    }

    #[test]
    fn test_filter_color_format() {
        assert_eq!(Rgb::BLACK.to_filter_color(0.6), "0x000000@0.60");
        assert_eq!(Rgb::new(255, 0, 16).to_filter_color(2.0), "0xFF0010@1.00");
    }

    #[test]
    fn test_style_defaults_applied_on_deserialize() {
        let style: CaptionStyle =
            serde_json::from_str(r##"{ "background_opacity": 1.7, "text_color": "#f00" }"##)
                .unwrap();
        assert_eq!(style.background_opacity, 1.0);
        assert_eq!(style.text_color, Rgb::new(255, 0, 0));
        assert_eq!(style.font_size, 32.0);
        assert_eq!(style.position, Position::Bottom);
    }

    #[test]
    fn test_position_serde_shapes() {
        let named: Position = serde_json::from_str("\"top-left\"").unwrap();
        assert_eq!(named, Position::TopLeft);
        let custom: Position = serde_json::from_str(r#"{ "custom": { "x": 25.0, "y": 75.0 } }"#)
            .unwrap();
        assert_eq!(custom, Position::custom(25.0, 75.0));
    }

    #[test]
    fn test_caption_interval_clamps_to_source() {
        let caption = Caption::new("late", 8.0, 5.0);
        assert_eq!(caption.visible_interval(10.0), Some((8.0, 10.0)));
        assert!(caption.is_active(9.99, 10.0));
        assert!(!caption.is_active(10.0, 10.0));

        let before = Caption::new("early", -2.0, 3.0);
        assert_eq!(before.visible_interval(10.0), Some((0.0, 1.0)));

        let never = Caption::new("after", 12.0, 1.0);
        assert_eq!(never.visible_interval(10.0), None);
    }

    #[test]
    fn test_caption_interval_is_half_open() {
        let caption = Caption::new("Hi", 2.0, 3.0);
        assert!(!caption.is_active(1.999, 10.0));
        assert!(caption.is_active(2.0, 10.0));
        assert!(caption.is_active(4.999, 10.0));
        assert!(!caption.is_active(5.0, 10.0));
    }

    #[test]
    fn test_watermark_interval_is_closed() {
        let wm = Watermark::new(ImageAsset::new("logo.png"), 0.0, 10.0);
        assert!(wm.is_active(0.0, 10.0));
        assert!(wm.is_active(10.0, 10.0));
        assert!(!wm.is_active(10.01, 12.0));
    }

    #[test]
    fn test_watermark_scale_never_upscales() {
        let wm = Watermark::new(ImageAsset::new("logo.png"), 0.0, 1.0).with_scale(1.5);
        assert_eq!(wm.effective_scale(), 1.0);
        assert_eq!(wm.clone().with_scale(0.25).effective_scale(), 0.25);
        assert_eq!(wm.with_scale(0.0).effective_scale(), MIN_WATERMARK_SCALE);
    }

    #[test]
    fn test_overlay_set_keeps_order() {
        let overlays = vec![
            Overlay::TrailerSlide(TrailerSlide::new(ImageAsset::new("a.png"), 3.0)),
            Overlay::Caption(Caption::new("x", 0.0, 1.0)),
            Overlay::TrailerSlide(TrailerSlide::new(ImageAsset::new("b.png"), 4.0)),
        ];
        let set = OverlaySet::from_overlays(&overlays);
        assert_eq!(set.captions.len(), 1);
        assert_eq!(set.slide_durations(), vec![3.0, 4.0]);
        assert_eq!(set.slides[1].image.path, std::path::PathBuf::from("b.png"));
    }

    #[test]
    fn test_overlay_tagged_serde() {
        let json = r#"{ "type": "watermark", "image": "logo.png", "start_secs": 0, "end_secs": 4,
                        "position": { "custom": { "x": 10, "y": 90 } }, "scale": 0.5 }"#;
        let overlay: Overlay = serde_json::from_str(json).unwrap();
        match overlay {
            Overlay::Watermark(wm) => {
                assert_eq!(wm.position, Position::custom(10.0, 90.0));
                assert_eq!(wm.scale, 0.5);
            }
            other => panic!("expected watermark, got {other:?}"),
        }
    }
}
