//! Cutroom Project Model
//!
//! Defines the data contracts the render engine consumes:
//! - **Media:** Imported source files and their probed properties
//! - **Tracks and clips:** Timeline placement, trims, speed, reverse, framing
//! - **Project:** Top-level container, JSON load/save, validation
//! - **Settings:** Output dimensions, container, bitrate, engine choice
//! - **Timing:** Pure functions mapping clip edits to timeline and source time
//!
//! Field names serialize in camelCase so a project file round-trips with the
//! editor front end and the native render service.

pub mod clip;
pub mod geometry;
pub mod media;
pub mod project;
pub mod settings;
pub mod timing;
pub mod track;
pub mod transition;

pub use clip::*;
pub use geometry::*;
pub use media::*;
pub use project::*;
pub use settings::*;
pub use track::*;
pub use transition::*;
