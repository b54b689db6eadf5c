//! Layer → command block conversion and coordinate calibration.
//!
//! The builder walks a layer's geometry in on-disk order, emits jump/mark
//! commands in device bits, and attaches one parameter segment per geometry
//! whose build style resolves. Geometry types without a style fall back to
//! the default style id; if that is missing too, the commands are emitted
//! without a segment and run on whatever parameters the device already has.

use crate::block::{Command, ParameterSegment, RtcCommandBlock};
use crate::geometry::{Hatch, Layer, Point, Polygon, Polyline};
use crate::style::{BuildStyle, BuildStyleLibrary};
use thiserror::Error;

/// Fallback build-style id for geometry types without their own style.
pub const DEFAULT_STYLE_ID: u32 = 8;

/// Conversion errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The layer contained values the calibration cannot convert.
    #[error("conversion failed for layer {layer}: {reason}")]
    ConversionFailed {
        /// Layer number.
        layer: u32,
        /// What was wrong with the input.
        reason: String,
    },
}

/// mm → device-bits calibration.
///
/// `bits_per_mm = 2 * max_bits / field_size_mm * scale_correction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Full f-theta field size [mm].
    pub field_size_mm: f64,
    /// Coordinate magnitude limit [bits] (20-bit signed card).
    pub max_bits: i64,
    /// User calibration factor.
    pub scale_correction: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            field_size_mm: 163.4,
            max_bits: 524_287,
            scale_correction: 1.0,
        }
    }
}

impl Calibration {
    /// Device bits per millimeter.
    #[inline]
    pub fn bits_per_mm(&self) -> f64 {
        (2.0 * self.max_bits as f64) / self.field_size_mm * self.scale_correction
    }

    /// Convert millimeters to device bits, saturating at `±max_bits` and
    /// rounding to the nearest integer.
    #[inline]
    pub fn mm_to_bits(&self, mm: f64) -> i32 {
        let limit = self.max_bits as f64;
        let bits = (mm * self.bits_per_mm()).clamp(-limit, limit);
        bits.round() as i32
    }
}

/// Converts layers into command blocks against a parameter library.
#[derive(Debug)]
pub struct BlockBuilder<'a> {
    calibration: Calibration,
    styles: &'a BuildStyleLibrary,
}

impl<'a> BlockBuilder<'a> {
    /// Build a converter from a calibration and the parameter library.
    pub fn new(calibration: Calibration, styles: &'a BuildStyleLibrary) -> Self {
        Self {
            calibration,
            styles,
        }
    }

    /// The active calibration.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Convert one layer into a command block.
    ///
    /// Geometry is emitted in on-disk order (hatches, polylines, polygons).
    /// Support circles are not serialized by current slicers and carry no
    /// commands.
    pub fn build(&self, layer: &Layer) -> Result<RtcCommandBlock, BuildError> {
        let mut block = RtcCommandBlock {
            layer_number: layer.number,
            layer_height_mm: layer.height_mm,
            layer_thickness_mm: layer.thickness_mm,
            hatch_count: layer.hatches.len(),
            polyline_count: layer.polylines.len(),
            polygon_count: layer.polygons.len(),
            ..Default::default()
        };

        for hatch in &layer.hatches {
            self.convert_hatch(layer, hatch, &mut block)?;
        }
        for polyline in &layer.polylines {
            self.convert_polyline(layer, polyline, &mut block)?;
        }
        for polygon in &layer.polygons {
            self.convert_polygon(layer, polygon, &mut block)?;
        }

        Ok(block)
    }

    fn convert_hatch(
        &self,
        layer: &Layer,
        hatch: &Hatch,
        block: &mut RtcCommandBlock,
    ) -> Result<(), BuildError> {
        let start = block.commands.len();
        for line in &hatch.lines {
            let a = self.to_bits(layer, line.a)?;
            let b = self.to_bits(layer, line.b)?;
            block.commands.push(Command::Jump { x: a.0, y: a.1 });
            block.commands.push(Command::Mark { x: b.0, y: b.1 });
        }
        self.attach_style(hatch.tag.type_id, start, block);
        Ok(())
    }

    fn convert_polyline(
        &self,
        layer: &Layer,
        polyline: &Polyline,
        block: &mut RtcCommandBlock,
    ) -> Result<(), BuildError> {
        if polyline.points.is_empty() {
            return Ok(());
        }
        let start = block.commands.len();
        let first = self.to_bits(layer, polyline.points[0])?;
        block.commands.push(Command::Jump {
            x: first.0,
            y: first.1,
        });
        for point in &polyline.points[1..] {
            let p = self.to_bits(layer, *point)?;
            block.commands.push(Command::Mark { x: p.0, y: p.1 });
        }
        self.attach_style(polyline.tag.type_id, start, block);
        Ok(())
    }

    fn convert_polygon(
        &self,
        layer: &Layer,
        polygon: &Polygon,
        block: &mut RtcCommandBlock,
    ) -> Result<(), BuildError> {
        if polygon.points.is_empty() {
            return Ok(());
        }
        let start = block.commands.len();
        let first = self.to_bits(layer, polygon.points[0])?;
        block.commands.push(Command::Jump {
            x: first.0,
            y: first.1,
        });
        for point in &polygon.points[1..] {
            let p = self.to_bits(layer, *point)?;
            block.commands.push(Command::Mark { x: p.0, y: p.1 });
        }
        // Close the loop back to the first vertex.
        block.commands.push(Command::Mark {
            x: first.0,
            y: first.1,
        });
        self.attach_style(polygon.tag.type_id, start, block);
        Ok(())
    }

    /// Resolve the style for a geometry type, falling back to the default
    /// style id.
    fn resolve_style(&self, type_id: u32) -> Option<&BuildStyle> {
        self.styles
            .get_for_geometry_type(type_id)
            .or_else(|| self.styles.get_by_id(DEFAULT_STYLE_ID))
    }

    fn attach_style(&self, type_id: u32, start: usize, block: &mut RtcCommandBlock) {
        if block.commands.len() == start {
            // Empty geometry: no commands, no segment.
            return;
        }
        if let Some(style) = self.resolve_style(type_id) {
            let end = block.commands.len() - 1;
            let pushed = block.push_segment(ParameterSegment::from_style(style, start, end));
            debug_assert!(pushed, "builder emitted an out-of-order segment");
        }
    }

    fn to_bits(&self, layer: &Layer, point: Point) -> Result<(i32, i32), BuildError> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(BuildError::ConversionFailed {
                layer: layer.number,
                reason: format!("non-finite coordinate ({}, {})", point.x, point.y),
            });
        }
        Ok((
            self.calibration.mm_to_bits(point.x as f64),
            self.calibration.mm_to_bits(point.y as f64),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometryTag, Line};
    use crate::style::BuildStyleLibrary;

    fn style(id: u32, power: f64, mark: f64, jump: f64) -> BuildStyle {
        BuildStyle {
            id,
            name: format!("style-{id}"),
            description: String::new(),
            laser_id: 1,
            laser_mode: 1,
            laser_power_w: power,
            laser_focus_mm: 0.0,
            mark_speed_mm_s: mark,
            jump_speed_mm_s: jump,
            hatch_spacing_mm: 0.1,
            layer_thickness_mm: 0.03,
            point_distance_mm: 0.05,
            point_delay: 1,
            point_exposure_time: 100,
            jump_delay_ms: 1.0,
        }
    }

    fn hatch(type_id: u32, lines: Vec<Line>) -> Hatch {
        Hatch {
            tag: GeometryTag {
                type_id,
                category: crate::geometry::category::HATCH,
                point_count: (lines.len() * 2) as u32,
            },
            lines,
        }
    }

    fn line(ax: f32, ay: f32, bx: f32, by: f32) -> Line {
        Line {
            a: Point::new(ax, ay),
            b: Point::new(bx, by),
        }
    }

    #[test]
    fn bits_per_mm_from_defaults() {
        let calib = Calibration::default();
        let expected = 2.0 * 524_287.0 / 163.4;
        assert!((calib.bits_per_mm() - expected).abs() < 1e-9);
    }

    #[test]
    fn mm_to_bits_is_monotonic_and_saturates() {
        let calib = Calibration::default();
        let samples = [-1000.0, -100.0, -1.0, -0.001, 0.0, 0.001, 1.0, 100.0, 1000.0];
        let mut previous = i32::MIN;
        for mm in samples {
            let bits = calib.mm_to_bits(mm);
            assert!(bits >= previous, "not monotonic at {mm}");
            previous = bits;
        }
        assert_eq!(calib.mm_to_bits(1e9), calib.max_bits as i32);
        assert_eq!(calib.mm_to_bits(-1e9), -(calib.max_bits as i32));
        assert_eq!(calib.mm_to_bits(0.0), 0);
    }

    #[test]
    fn hatch_with_m_lines_yields_2m_alternating_commands() {
        let library = BuildStyleLibrary::from_styles([style(1, 100.0, 250.0, 1000.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 1,
            hatches: vec![hatch(
                1,
                vec![
                    line(0.0, 0.0, 10.0, 0.0),
                    line(0.0, 1.0, 10.0, 1.0),
                    line(0.0, 2.0, 10.0, 2.0),
                ],
            )],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        assert_eq!(block.commands.len(), 6);
        for (i, command) in block.commands.iter().enumerate() {
            match command {
                Command::Jump { .. } => assert_eq!(i % 2, 0, "jump at odd index {i}"),
                Command::Mark { .. } => assert_eq!(i % 2, 1, "mark at even index {i}"),
                Command::Delay { .. } => panic!("unexpected delay"),
            }
        }

        let expected_bits = builder.calibration().mm_to_bits(10.0);
        assert_eq!(
            block.commands[1],
            Command::Mark {
                x: expected_bits,
                y: 0
            }
        );
        assert_eq!(block.parameter_segments.len(), 1);
        let segment = &block.parameter_segments[0];
        assert_eq!((segment.start_cmd, segment.end_cmd), (0, 5));
        assert_eq!(segment.build_style_id, 1);
    }

    #[test]
    fn polygon_closes_back_to_first_vertex() {
        let library = BuildStyleLibrary::from_styles([style(3, 90.0, 300.0, 1200.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 2,
            polygons: vec![Polygon {
                tag: GeometryTag {
                    type_id: 3,
                    category: crate::geometry::category::POLYGON,
                    point_count: 3,
                },
                points: vec![
                    Point::new(0.0, 0.0),
                    Point::new(5.0, 0.0),
                    Point::new(5.0, 5.0),
                ],
            }],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        // Jump + 2 marks + closing mark.
        assert_eq!(block.commands.len(), 4);
        assert_eq!(block.commands[0], block_jump(&builder, 0.0, 0.0));
        assert_eq!(block.commands[3], block_mark(&builder, 0.0, 0.0));
    }

    fn block_jump(builder: &BlockBuilder<'_>, x: f64, y: f64) -> Command {
        Command::Jump {
            x: builder.calibration().mm_to_bits(x),
            y: builder.calibration().mm_to_bits(y),
        }
    }

    fn block_mark(builder: &BlockBuilder<'_>, x: f64, y: f64) -> Command {
        Command::Mark {
            x: builder.calibration().mm_to_bits(x),
            y: builder.calibration().mm_to_bits(y),
        }
    }

    #[test]
    fn missing_style_falls_back_to_default_id() {
        let library = BuildStyleLibrary::from_styles([
            style(1, 100.0, 250.0, 1000.0),
            style(DEFAULT_STYLE_ID, 80.0, 200.0, 900.0),
        ]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 3,
            hatches: vec![hatch(99, vec![line(0.0, 0.0, 1.0, 0.0)])],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        assert_eq!(block.parameter_segments.len(), 1);
        assert_eq!(block.parameter_segments[0].build_style_id, DEFAULT_STYLE_ID);
        assert_eq!(block.parameter_segments[0].laser_power_w, 80.0);
    }

    #[test]
    fn no_style_at_all_emits_commands_without_segment() {
        let library = BuildStyleLibrary::from_styles([style(1, 100.0, 250.0, 1000.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 4,
            hatches: vec![hatch(99, vec![line(0.0, 0.0, 1.0, 0.0)])],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        assert_eq!(block.commands.len(), 2);
        assert!(block.parameter_segments.is_empty());
    }

    #[test]
    fn empty_layer_yields_empty_block() {
        let library = BuildStyleLibrary::from_styles([style(8, 80.0, 200.0, 900.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let block = builder.build(&Layer::default()).unwrap();
        assert!(block.commands.is_empty());
        assert!(block.parameter_segments.is_empty());
    }

    #[test]
    fn empty_geometry_between_real_ones_emits_no_segment() {
        let library = BuildStyleLibrary::from_styles([style(8, 80.0, 200.0, 900.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 5,
            hatches: vec![hatch(1, vec![])],
            polylines: vec![Polyline::default()],
            polygons: vec![Polygon {
                tag: GeometryTag {
                    type_id: 3,
                    category: crate::geometry::category::POLYGON,
                    point_count: 2,
                },
                points: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            }],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        assert_eq!(block.parameter_segments.len(), 1);
        assert_eq!(block.parameter_segments[0].start_cmd, 0);
    }

    #[test]
    fn non_finite_coordinate_fails_conversion() {
        let library = BuildStyleLibrary::from_styles([style(1, 100.0, 250.0, 1000.0)]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 6,
            hatches: vec![hatch(1, vec![line(f32::NAN, 0.0, 1.0, 0.0)])],
            ..Default::default()
        };

        match builder.build(&layer) {
            Err(BuildError::ConversionFailed { layer, .. }) => assert_eq!(layer, 6),
            other => panic!("expected ConversionFailed, got {other:?}"),
        }
    }

    #[test]
    fn segments_cover_exactly_the_command_range() {
        let library = BuildStyleLibrary::from_styles([
            style(1, 100.0, 250.0, 1000.0),
            style(2, 60.0, 400.0, 1500.0),
        ]);
        let builder = BlockBuilder::new(Calibration::default(), &library);

        let layer = Layer {
            number: 7,
            hatches: vec![
                hatch(1, vec![line(0.0, 0.0, 1.0, 0.0)]),
                hatch(2, vec![line(0.0, 1.0, 1.0, 1.0), line(0.0, 2.0, 1.0, 2.0)]),
            ],
            ..Default::default()
        };

        let block = builder.build(&layer).unwrap();
        let segments = &block.parameter_segments;
        assert_eq!(segments.len(), 2);

        // Union of ranges == 0..commands.len(), ordered and disjoint.
        assert_eq!(segments[0].start_cmd, 0);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start_cmd, pair[0].end_cmd + 1);
        }
        assert_eq!(
            segments.last().map(|s| s.end_cmd),
            Some(block.commands.len() - 1)
        );
    }
}
