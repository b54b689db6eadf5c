//! # MARC Slice Library
//!
//! Streaming decoder for `.marc` slice files, the build-style parameter
//! library, and the converter that turns per-layer vector geometry into
//! scanner command blocks.
//!
//! # Module Structure
//!
//! - [`geometry`] - On-disk geometry model (points, hatches, polylines, layers)
//! - [`reader`] - Sequential one-layer-at-a-time slice file reader
//! - [`style`] - Build-style records and the JSON parameter library
//! - [`block`] - Scanner command blocks with parameter segments
//! - [`builder`] - Layer → command block conversion and mm→bits calibration
//!
//! # Data Flow
//!
//! ```text
//! .marc file ──SliceReader──► Layer ──BlockBuilder──► RtcCommandBlock
//!                                          │
//!                         BuildStyleLibrary┘ (config.json)
//! ```

#![deny(missing_docs)]

pub mod block;
pub mod builder;
pub mod geometry;
pub mod reader;
pub mod style;

pub use block::{Command, ParameterSegment, RtcCommandBlock};
pub use builder::{BlockBuilder, BuildError, Calibration, DEFAULT_STYLE_ID};
pub use geometry::{Circle, GeometryTag, Hatch, Layer, Line, Point, Polygon, Polyline};
pub use reader::{SliceError, SliceHeader, SliceReader, HEADER_LEN};
pub use style::{BuildStyle, BuildStyleLibrary, StyleError};
