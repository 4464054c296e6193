//! Overlay placement.
//!
//! Maps a [`Position`] and container size to the pixel point where an
//! element's anchor lands. Both backends go through [`PlacementResolver`], so
//! a caption or watermark sits in the same place whichever one renders it.

use serde::{Deserialize, Serialize};

use crate::overlay::{Position, VerticalZone};

/// Default caption distance from container edges.
pub const CAPTION_MARGIN_PX: u32 = 24;

/// Default watermark distance from container edges.
pub const WATERMARK_MARGIN_PX: u32 = 16;

/// Output height that display scale 1.0 corresponds to.
pub const REFERENCE_HEIGHT_PX: u32 = 1080;

const CAPTION_SCALE_RANGE: (f64, f64) = (0.7, 1.3);
const WATERMARK_SCALE_RANGE: (f64, f64) = (0.8, 1.2);

/// What is being placed. Captions and watermarks use different margins and
/// scale clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Caption { full_width: bool },
    Watermark,
}

impl OverlayKind {
    fn scale_range(self) -> (f64, f64) {
        match self {
            OverlayKind::Caption { .. } => CAPTION_SCALE_RANGE,
            OverlayKind::Watermark => WATERMARK_SCALE_RANGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAnchor {
    Left,
    Center,
    Right,
    /// The element spans the full container width starting at `x`.
    Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAnchor {
    Top,
    Middle,
    Bottom,
}

/// Which point of the element `(x, y)` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub horizontal: HorizontalAnchor,
    pub vertical: VerticalAnchor,
}

impl Anchor {
    pub const fn new(horizontal: HorizontalAnchor, vertical: VerticalAnchor) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    pub const CENTER: Anchor = Anchor::new(HorizontalAnchor::Center, VerticalAnchor::Middle);
}

/// A resolved pixel placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub anchor: Anchor,
}

impl Placement {
    /// Top-left draw origin for an element of the given size.
    pub fn top_left(&self, elem_w: f64, elem_h: f64) -> (f64, f64) {
        let x = match self.anchor.horizontal {
            HorizontalAnchor::Left | HorizontalAnchor::Span => self.x,
            HorizontalAnchor::Center => self.x - elem_w / 2.0,
            HorizontalAnchor::Right => self.x - elem_w,
        };
        let y = match self.anchor.vertical {
            VerticalAnchor::Top => self.y,
            VerticalAnchor::Middle => self.y - elem_h / 2.0,
            VerticalAnchor::Bottom => self.y - elem_h,
        };
        (x, y)
    }
}

/// Resolves positions with configurable margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementResolver {
    pub caption_margin_px: u32,
    pub watermark_margin_px: u32,
}

impl Default for PlacementResolver {
    fn default() -> Self {
        Self {
            caption_margin_px: CAPTION_MARGIN_PX,
            watermark_margin_px: WATERMARK_MARGIN_PX,
        }
    }
}

impl PlacementResolver {
    pub fn new(caption_margin_px: u32, watermark_margin_px: u32) -> Self {
        Self {
            caption_margin_px,
            watermark_margin_px,
        }
    }

    /// Margin in pixels for `kind` after applying the clamped display scale.
    pub fn margin(&self, kind: OverlayKind, display_scale: Option<f64>) -> f64 {
        let base = match kind {
            OverlayKind::Caption { .. } => self.caption_margin_px,
            OverlayKind::Watermark => self.watermark_margin_px,
        } as f64;
        base * clamp_scale(kind, display_scale)
    }

    /// Resolve `position` inside a `container_w` x `container_h` frame.
    pub fn resolve(
        &self,
        position: Position,
        container_w: u32,
        container_h: u32,
        kind: OverlayKind,
        display_scale: Option<f64>,
    ) -> Placement {
        let w = container_w as f64;
        let h = container_h as f64;
        let full_width = matches!(kind, OverlayKind::Caption { full_width: true });

        if let Position::Custom { x, y } = position {
            let px = w * clamp_percent(x) / 100.0;
            let py = h * clamp_percent(y) / 100.0;
            return if full_width {
                Placement {
                    x: 0.0,
                    y: py,
                    anchor: Anchor::new(HorizontalAnchor::Span, VerticalAnchor::Middle),
                }
            } else {
                Placement {
                    x: px,
                    y: py,
                    anchor: Anchor::CENTER,
                }
            };
        }

        let margin = self.margin(kind, display_scale);

        let (y, vertical) = match position.vertical_zone() {
            VerticalZone::Top => (margin, VerticalAnchor::Top),
            VerticalZone::Middle => (h / 2.0, VerticalAnchor::Middle),
            VerticalZone::Bottom => (h - margin, VerticalAnchor::Bottom),
        };

        if full_width {
            return Placement {
                x: 0.0,
                y,
                anchor: Anchor::new(HorizontalAnchor::Span, vertical),
            };
        }

        let (x, horizontal) = match position {
            Position::TopLeft | Position::BottomLeft => (margin, HorizontalAnchor::Left),
            Position::TopRight | Position::BottomRight => (w - margin, HorizontalAnchor::Right),
            _ => (w / 2.0, HorizontalAnchor::Center),
        };

        Placement {
            x,
            y,
            anchor: Anchor::new(horizontal, vertical),
        }
    }
}

/// Display scale for an output of the given height, relative to 1080p.
pub fn display_scale_for(output_height: u32) -> f64 {
    output_height as f64 / REFERENCE_HEIGHT_PX as f64
}

/// Caption font size after applying the clamped display scale.
pub fn scaled_font_size(font_size: f64, display_scale: Option<f64>) -> f64 {
    font_size * clamp_scale(OverlayKind::Caption { full_width: false }, display_scale)
}

fn clamp_scale(kind: OverlayKind, display_scale: Option<f64>) -> f64 {
    let (lo, hi) = kind.scale_range();
    match display_scale {
        Some(s) if s.is_finite() => s.clamp(lo, hi),
        _ => 1.0,
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 50.0;
    }
    value.clamp(0.0, 100.0)
}
