//! Streaming slice file reader.
//!
//! Reads a `.marc` file layer-by-layer without loading the whole file into
//! memory. The file handle stays open for the duration of the build; layers
//! are decoded strictly sequentially and never seeked.
//!
//! # Usage
//!
//! ```rust,no_run
//! use marc_slice::reader::SliceReader;
//!
//! let mut reader = SliceReader::open("part.marc").unwrap();
//! while reader.has_next() {
//!     let layer = reader.read_next().unwrap();
//!     // convert and execute
//! }
//! ```

use crate::geometry::{Circle, GeometryTag, Hatch, Layer, Line, Point, Polygon, Polyline};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// The 4-byte file magic.
pub const MAGIC: [u8; 4] = *b"MARC";

/// On-disk header block length. The header fields occupy the first 60 bytes;
/// the remainder is reserved and the layer stream begins at this offset.
pub const HEADER_LEN: usize = 148;

/// Upper bound on any serialized count; a tag or counter above this is
/// treated as corruption rather than attempting a matching allocation.
const MAX_REASONABLE_COUNT: u32 = 50_000_000;

/// Slice file decode errors.
#[derive(Debug, Error)]
pub enum SliceError {
    /// Header or geometry tag malformed.
    #[error("invalid slice file format: {0}")]
    InvalidFormat(String),

    /// File ended mid-structure.
    #[error("unexpected end of slice file")]
    UnexpectedEof,

    /// A specific layer failed to decode.
    #[error("layer {layer} corrupt: {reason}")]
    LayerCorrupt {
        /// 1-based index of the failing layer in read order.
        layer: u32,
        /// Underlying decode failure.
        reason: String,
    },

    /// Underlying file I/O failure.
    #[error("slice file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded slice file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    /// Format version.
    pub version: u32,
    /// Total number of layers in the stream.
    pub total_layers: u32,
    /// Offset of the (unused) index table.
    pub index_table_offset: u64,
    /// File creation timestamp (seconds since epoch).
    pub timestamp: u64,
    /// Printer identification, NUL-padded.
    pub printer_id: [u8; 32],
}

impl SliceHeader {
    /// Printer id as a string, trailing NULs stripped.
    pub fn printer_id_str(&self) -> String {
        let end = self
            .printer_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.printer_id.len());
        String::from_utf8_lossy(&self.printer_id[..end]).into_owned()
    }
}

/// Sequential, one-layer-at-a-time slice file reader.
///
/// Meant to be driven from a single producer thread; the type is `Send` but
/// deliberately offers no shared-access API.
#[derive(Debug)]
pub struct SliceReader {
    input: BufReader<File>,
    header: SliceHeader,
    layers_read: u32,
}

impl SliceReader {
    /// Open a slice file and eagerly validate its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SliceError> {
        let file = File::open(path.as_ref())?;
        let mut input = BufReader::new(file);
        let header = read_header(&mut input)?;
        tracing::debug!(
            "slice file opened: {} layers, printer '{}'",
            header.total_layers,
            header.printer_id_str()
        );
        Ok(Self {
            input,
            header,
            layers_read: 0,
        })
    }

    /// The decoded header.
    #[inline]
    pub fn header(&self) -> &SliceHeader {
        &self.header
    }

    /// Total layers announced by the header.
    #[inline]
    pub fn total_layers(&self) -> u32 {
        self.header.total_layers
    }

    /// Number of layers already read.
    #[inline]
    pub fn layers_read(&self) -> u32 {
        self.layers_read
    }

    /// Whether another layer remains in the stream.
    #[inline]
    pub fn has_next(&self) -> bool {
        self.layers_read < self.header.total_layers
    }

    /// Read the next layer.
    ///
    /// Layers are decoded strictly in on-disk order. Any decode failure is
    /// reported as `LayerCorrupt` with the 1-based index of the failing
    /// layer; reading past the end is an `InvalidFormat` error.
    pub fn read_next(&mut self) -> Result<Layer, SliceError> {
        if !self.has_next() {
            return Err(SliceError::InvalidFormat(
                "no more layers to read".to_string(),
            ));
        }
        let index = self.layers_read + 1;
        let layer = self.read_layer().map_err(|e| SliceError::LayerCorrupt {
            layer: index,
            reason: e.to_string(),
        })?;
        self.layers_read = index;
        Ok(layer)
    }

    // ── Layer decoding ──

    fn read_layer(&mut self) -> Result<Layer, SliceError> {
        let number = self.read_u32()?;
        let height_mm = self.read_f32()?;

        let hatch_count = self.read_count("hatch count")?;
        let mut hatches = Vec::with_capacity(hatch_count as usize);
        for _ in 0..hatch_count {
            hatches.push(self.read_hatch()?);
        }

        let polyline_count = self.read_count("polyline count")?;
        let mut polylines = Vec::with_capacity(polyline_count as usize);
        for _ in 0..polyline_count {
            polylines.push(self.read_polyline()?);
        }

        let polygon_count = self.read_count("polygon count")?;
        let mut polygons = Vec::with_capacity(polygon_count as usize);
        for _ in 0..polygon_count {
            polygons.push(self.read_polygon()?);
        }

        Ok(Layer {
            number,
            height_mm,
            // Not serialized; the producer derives it from height deltas.
            thickness_mm: 0.0,
            hatches,
            polylines,
            polygons,
            support_circles: Vec::new(),
        })
    }

    fn read_geometry_tag(&mut self) -> Result<GeometryTag, SliceError> {
        let type_id = self.read_u32()?;
        let category = self.read_u32()?;
        let point_count = self.read_u32()?;
        if point_count > MAX_REASONABLE_COUNT {
            return Err(SliceError::InvalidFormat(format!(
                "geometry tag announces {point_count} points"
            )));
        }
        Ok(GeometryTag {
            type_id,
            category,
            point_count,
        })
    }

    fn read_hatch(&mut self) -> Result<Hatch, SliceError> {
        let tag = self.read_geometry_tag()?;
        let vertices = tag.point_count;
        let line_count = vertices / 2;
        let mut lines = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            let a = self.read_point()?;
            let b = self.read_point()?;
            lines.push(Line { a, b });
        }
        if vertices % 2 == 1 {
            // Odd trailing vertex carries no line; consume and discard.
            let _ = self.read_point()?;
        }
        Ok(Hatch { tag, lines })
    }

    fn read_polyline(&mut self) -> Result<Polyline, SliceError> {
        let tag = self.read_geometry_tag()?;
        let points = self.read_points(tag.point_count)?;
        Ok(Polyline { tag, points })
    }

    fn read_polygon(&mut self) -> Result<Polygon, SliceError> {
        let tag = self.read_geometry_tag()?;
        let points = self.read_points(tag.point_count)?;
        Ok(Polygon { tag, points })
    }

    #[allow(dead_code)]
    fn read_circle(&mut self) -> Result<Circle, SliceError> {
        let tag = self.read_geometry_tag()?;
        let center = self.read_point()?;
        let radius = self.read_f32()?;
        Ok(Circle {
            tag,
            center,
            radius,
        })
    }

    // ── Primitive reads (little-endian) ──

    fn read_points(&mut self, count: u32) -> Result<Vec<Point>, SliceError> {
        let mut points = Vec::with_capacity(count as usize);
        for _ in 0..count {
            points.push(self.read_point()?);
        }
        Ok(points)
    }

    fn read_point(&mut self) -> Result<Point, SliceError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Point { x, y })
    }

    fn read_count(&mut self, what: &str) -> Result<u32, SliceError> {
        let count = self.read_u32()?;
        if count > MAX_REASONABLE_COUNT {
            return Err(SliceError::InvalidFormat(format!(
                "{what} of {count} is not plausible"
            )));
        }
        Ok(count)
    }

    fn read_u32(&mut self) -> Result<u32, SliceError> {
        let mut buf = [0u8; 4];
        read_exact(&mut self.input, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32, SliceError> {
        let mut buf = [0u8; 4];
        read_exact(&mut self.input, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

fn read_exact(input: &mut impl Read, buf: &mut [u8]) -> Result<(), SliceError> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SliceError::UnexpectedEof
        } else {
            SliceError::Io(e)
        }
    })
}

fn read_header(input: &mut impl Read) -> Result<SliceHeader, SliceError> {
    let mut block = [0u8; HEADER_LEN];
    read_exact(input, &mut block)?;

    if block[0..4] != MAGIC {
        return Err(SliceError::InvalidFormat(format!(
            "bad magic {:02x?} (expected \"MARC\")",
            &block[0..4]
        )));
    }

    let version = u32::from_le_bytes(block[4..8].try_into().unwrap_or_default());
    let total_layers = u32::from_le_bytes(block[8..12].try_into().unwrap_or_default());
    let index_table_offset = u64::from_le_bytes(block[12..20].try_into().unwrap_or_default());
    let timestamp = u64::from_le_bytes(block[20..28].try_into().unwrap_or_default());
    let mut printer_id = [0u8; 32];
    printer_id.copy_from_slice(&block[28..60]);

    if total_layers > MAX_REASONABLE_COUNT {
        return Err(SliceError::InvalidFormat(format!(
            "header announces {total_layers} layers"
        )));
    }

    Ok(SliceHeader {
        version,
        total_layers,
        index_table_offset,
        timestamp,
        printer_id,
    })
}
