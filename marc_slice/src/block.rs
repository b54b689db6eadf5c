//! Scanner command blocks with per-segment laser parameters.
//!
//! One block holds one layer's worth of device commands, already converted
//! to device bits, plus the parameter segments that tell the consumer which
//! laser settings apply to which command range.

use crate::style::BuildStyle;

/// One queued scanner command. Coordinates are signed device bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move with the laser off.
    Jump {
        /// X target [bits].
        x: i32,
        /// Y target [bits].
        y: i32,
    },
    /// Move with the laser on.
    Mark {
        /// X target [bits].
        x: i32,
        /// Y target [bits].
        y: i32,
    },
    /// In-list dwell.
    Delay {
        /// Dwell time [ms].
        ms: u32,
    },
}

/// A contiguous command range sharing one set of laser parameters.
///
/// `start_cmd..=end_cmd` is inclusive. Segments never overlap and appear in
/// ascending `start_cmd` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSegment {
    /// First command index covered.
    pub start_cmd: usize,
    /// Last command index covered (inclusive).
    pub end_cmd: usize,
    /// Originating build-style id.
    pub build_style_id: u32,
    /// Laser power [W].
    pub laser_power_w: f64,
    /// Mark speed [mm/s].
    pub mark_speed_mm_s: f64,
    /// Jump speed [mm/s].
    pub jump_speed_mm_s: f64,
    /// Laser mode.
    pub laser_mode: u32,
    /// Focus offset [mm].
    pub laser_focus_mm: f64,
}

impl ParameterSegment {
    /// Build a segment over `[start_cmd, end_cmd]` from a style.
    pub fn from_style(style: &BuildStyle, start_cmd: usize, end_cmd: usize) -> Self {
        Self {
            start_cmd,
            end_cmd,
            build_style_id: style.id,
            laser_power_w: style.laser_power_w,
            mark_speed_mm_s: style.mark_speed_mm_s,
            jump_speed_mm_s: style.jump_speed_mm_s,
            laser_mode: style.laser_mode,
            laser_focus_mm: style.laser_focus_mm,
        }
    }

    /// Whether the segment covers a command index.
    #[inline]
    pub fn covers(&self, index: usize) -> bool {
        self.start_cmd <= index && index <= self.end_cmd
    }
}

/// One layer's worth of scanner commands plus parameter segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtcCommandBlock {
    /// Layer number.
    pub layer_number: u32,
    /// Layer height (Z) [mm].
    pub layer_height_mm: f32,
    /// Layer thickness [mm]; drives the PLC recoat step.
    pub layer_thickness_mm: f32,
    /// Hatch geometries converted into this block.
    pub hatch_count: usize,
    /// Polyline geometries converted into this block.
    pub polyline_count: usize,
    /// Polygon geometries converted into this block.
    pub polygon_count: usize,
    /// The commands, in execution order.
    pub commands: Vec<Command>,
    /// Parameter segments, ascending and non-overlapping.
    pub parameter_segments: Vec<ParameterSegment>,
}

impl RtcCommandBlock {
    /// The segment covering a command index, if any.
    pub fn segment_covering(&self, index: usize) -> Option<&ParameterSegment> {
        // Segments are sorted by start; stop as soon as one starts past the
        // index.
        for segment in &self.parameter_segments {
            if segment.start_cmd > index {
                return None;
            }
            if segment.covers(index) {
                return Some(segment);
            }
        }
        None
    }

    /// Append a segment, keeping the ordering/non-overlap invariants.
    ///
    /// Returns `false` (and appends nothing) if the segment would overlap the
    /// previous one, start after its end, or point past the command list.
    pub fn push_segment(&mut self, segment: ParameterSegment) -> bool {
        if segment.start_cmd > segment.end_cmd || segment.end_cmd >= self.commands.len() {
            return false;
        }
        if let Some(last) = self.parameter_segments.last() {
            if segment.start_cmd <= last.end_cmd {
                return false;
            }
        }
        self.parameter_segments.push(segment);
        true
    }

    /// Whether the block holds no commands.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: usize, end: usize) -> ParameterSegment {
        ParameterSegment {
            start_cmd: start,
            end_cmd: end,
            build_style_id: 1,
            laser_power_w: 100.0,
            mark_speed_mm_s: 250.0,
            jump_speed_mm_s: 1000.0,
            laser_mode: 1,
            laser_focus_mm: 0.0,
        }
    }

    fn block_with_commands(n: usize) -> RtcCommandBlock {
        RtcCommandBlock {
            commands: vec![Command::Jump { x: 0, y: 0 }; n],
            ..Default::default()
        }
    }

    #[test]
    fn segment_lookup_by_index() {
        let mut block = block_with_commands(6);
        assert!(block.push_segment(segment(0, 1)));
        assert!(block.push_segment(segment(2, 5)));

        assert_eq!(block.segment_covering(0).unwrap().start_cmd, 0);
        assert_eq!(block.segment_covering(1).unwrap().end_cmd, 1);
        assert_eq!(block.segment_covering(2).unwrap().start_cmd, 2);
        assert_eq!(block.segment_covering(5).unwrap().end_cmd, 5);
        assert!(block.segment_covering(6).is_none());
    }

    #[test]
    fn overlapping_segment_is_refused() {
        let mut block = block_with_commands(6);
        assert!(block.push_segment(segment(0, 3)));
        assert!(!block.push_segment(segment(3, 5)));
        assert!(!block.push_segment(segment(1, 2)));
        assert_eq!(block.parameter_segments.len(), 1);
    }

    #[test]
    fn segment_past_commands_is_refused() {
        let mut block = block_with_commands(2);
        assert!(!block.push_segment(segment(0, 2)));
        assert!(!block.push_segment(segment(2, 1)));
        assert!(block.parameter_segments.is_empty());
    }

    #[test]
    fn empty_block_has_no_segments() {
        let mut block = RtcCommandBlock::default();
        assert!(block.is_empty());
        assert!(!block.push_segment(segment(0, 0)));
        assert!(block.segment_covering(0).is_none());
    }
}
