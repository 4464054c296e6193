//! Overlaycut Project Model
//!
//! Defines the core data contracts for an export:
//! - **Media:** the base clip and still-image asset handles
//! - **Overlays:** captions, watermarks, and trailer slides
//! - **Geometry:** resolving overlay positions to pixel placements
//! - **Timeline:** segmenting the composite base-clip + slides timeline
//! - **Quality:** presets and backend-specific encoder profiles
//! - **Manifest:** the JSON document the CLI exports from
//!
//! Times are in seconds; custom positions are percentages of the container.

pub mod geometry;
pub mod manifest;
pub mod media;
pub mod overlay;
pub mod quality;
pub mod timeline;

pub use geometry::*;
pub use manifest::*;
pub use media::*;
pub use overlay::*;
pub use quality::*;
pub use timeline::*;
