//! Build-style records and the JSON parameter library.
//!
//! A build style bundles every laser/scan parameter for one geometry type.
//! The library is loaded once at startup from a JSON document whose top-level
//! `buildStyles` key holds an array of style objects; afterwards it is
//! read-only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Parameter library load/validation errors.
#[derive(Debug, Error)]
pub enum StyleError {
    /// File could not be read.
    #[error("cannot read parameter library: {0}")]
    Io(#[from] std::io::Error),

    /// JSON malformed or schema mismatch.
    #[error("parameter library malformed: {0}")]
    Parse(String),

    /// A style fails its semantic invariants.
    #[error("parameter library invalid: {0}")]
    Invalid(String),
}

/// All laser/scan parameters for one geometry type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildStyle {
    /// Style id; also the geometry-type key.
    pub id: u32,
    /// Style name, e.g. `"CoreContour_Volume"`.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Laser module id.
    #[serde(rename = "laserId", default = "defaults::laser_id")]
    pub laser_id: u32,
    /// Laser mode (0=cw, 1=pulse, 2=point).
    #[serde(rename = "laserMode", default)]
    pub laser_mode: u32,
    /// Laser power [W].
    #[serde(rename = "laserPower", default)]
    pub laser_power_w: f64,
    /// Focus offset [mm].
    #[serde(rename = "laserFocus", default = "defaults::laser_focus")]
    pub laser_focus_mm: f64,
    /// Mark speed [mm/s].
    #[serde(rename = "laserSpeed", default = "defaults::mark_speed")]
    pub mark_speed_mm_s: f64,
    /// Jump speed [mm/s].
    #[serde(rename = "jumpSpeed", default = "defaults::jump_speed")]
    pub jump_speed_mm_s: f64,
    /// Hatch line spacing [mm].
    #[serde(rename = "hatchSpacing", default = "defaults::hatch_spacing")]
    pub hatch_spacing_mm: f64,
    /// Layer thickness this style is tuned for [mm].
    #[serde(rename = "layerThickness", default = "defaults::layer_thickness")]
    pub layer_thickness_mm: f64,
    /// Distance between point exposures [mm].
    #[serde(rename = "pointDistance", default = "defaults::point_distance")]
    pub point_distance_mm: f64,
    /// Delay before a point exposure [ms].
    #[serde(rename = "pointDelay", default = "defaults::point_delay")]
    pub point_delay: u32,
    /// Point dwell time [ms].
    #[serde(rename = "pointExposureTime", default = "defaults::point_exposure")]
    pub point_exposure_time: u32,
    /// Delay after a jump before marking [ms].
    #[serde(rename = "jumpDelay", default = "defaults::jump_delay")]
    pub jump_delay_ms: f64,
}

mod defaults {
    pub fn laser_id() -> u32 {
        1
    }
    pub fn laser_focus() -> f64 {
        0.1
    }
    pub fn mark_speed() -> f64 {
        250.0
    }
    pub fn jump_speed() -> f64 {
        1500.0
    }
    pub fn hatch_spacing() -> f64 {
        0.1
    }
    pub fn layer_thickness() -> f64 {
        0.03
    }
    pub fn point_distance() -> f64 {
        0.05
    }
    pub fn point_delay() -> u32 {
        1
    }
    pub fn point_exposure() -> u32 {
        100
    }
    pub fn jump_delay() -> f64 {
        1.0
    }
}

impl BuildStyle {
    /// Semantic invariants every loaded style must satisfy.
    pub fn is_valid(&self) -> bool {
        self.id > 0
            && !self.name.is_empty()
            && self.laser_power_w > 0.0
            && self.mark_speed_mm_s > 0.0
    }
}

#[derive(Debug, Deserialize)]
struct StyleDocument {
    #[serde(rename = "buildStyles")]
    build_styles: Vec<BuildStyle>,
}

/// Immutable lookup table: geometry-type id → build style.
///
/// Built once at startup, read-only afterwards; safe to share by reference
/// across threads.
#[derive(Debug, Clone, Default)]
pub struct BuildStyleLibrary {
    styles: HashMap<u32, BuildStyle>,
}

impl BuildStyleLibrary {
    /// Load and validate a library from a JSON file.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self, StyleError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate a library from a JSON string.
    pub fn parse(content: &str) -> Result<Self, StyleError> {
        let document: StyleDocument =
            serde_json::from_str(content).map_err(|e| StyleError::Parse(e.to_string()))?;

        let mut styles = HashMap::with_capacity(document.build_styles.len());
        for style in document.build_styles {
            if !style.is_valid() {
                return Err(StyleError::Invalid(format!(
                    "buildStyle id={} ('{}') violates id/name/power/speed invariants",
                    style.id, style.name
                )));
            }
            if styles.insert(style.id, style).is_some() {
                return Err(StyleError::Invalid("duplicate buildStyle id".to_string()));
            }
        }
        Ok(Self { styles })
    }

    /// Build a library directly from styles (used by tests and test mode).
    pub fn from_styles(styles: impl IntoIterator<Item = BuildStyle>) -> Self {
        Self {
            styles: styles.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    /// Style for a geometry-type id.
    pub fn get_for_geometry_type(&self, type_id: u32) -> Option<&BuildStyle> {
        self.styles.get(&type_id)
    }

    /// Style by its own id.
    pub fn get_by_id(&self, style_id: u32) -> Option<&BuildStyle> {
        self.styles.values().find(|s| s.id == style_id)
    }

    /// Number of styles.
    pub fn len(&self) -> usize {
        self.styles.len()
    }

    /// Whether the library holds no styles.
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "buildStyles": [
            {
                "id": 1,
                "name": "CoreHatch_Volume",
                "description": "core hatching",
                "laserId": 1,
                "laserMode": 1,
                "laserPower": 100.0,
                "laserFocus": 0.0,
                "laserSpeed": 250.0,
                "jumpSpeed": 1000.0,
                "hatchSpacing": 0.12,
                "layerThickness": 0.03,
                "pointDistance": 0.05,
                "pointDelay": 1,
                "pointExposureTime": 100,
                "jumpDelay": 1.0
            },
            {
                "id": 8,
                "name": "Default",
                "laserPower": 80.0,
                "laserSpeed": 200.0
            }
        ]
    }"#;

    #[test]
    fn parses_sample_document() {
        let library = BuildStyleLibrary::parse(SAMPLE).unwrap();
        assert_eq!(library.len(), 2);

        let core = library.get_for_geometry_type(1).unwrap();
        assert_eq!(core.name, "CoreHatch_Volume");
        assert_eq!(core.laser_power_w, 100.0);
        assert_eq!(core.mark_speed_mm_s, 250.0);
        assert_eq!(core.jump_speed_mm_s, 1000.0);

        // Omitted fields fall back to production defaults.
        let fallback = library.get_by_id(8).unwrap();
        assert_eq!(fallback.jump_speed_mm_s, 1500.0);
        assert_eq!(fallback.laser_id, 1);
    }

    #[test]
    fn missing_root_key_is_a_parse_error() {
        let result = BuildStyleLibrary::parse(r#"{"styles": []}"#);
        assert!(matches!(result, Err(StyleError::Parse(_))));
    }

    #[test]
    fn zero_power_style_is_rejected() {
        let doc = r#"{"buildStyles": [{"id": 1, "name": "bad", "laserPower": 0.0}]}"#;
        assert!(matches!(
            BuildStyleLibrary::parse(doc),
            Err(StyleError::Invalid(_))
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        let doc = r#"{"buildStyles": [{"id": 1, "name": "", "laserPower": 10.0}]}"#;
        assert!(matches!(
            BuildStyleLibrary::parse(doc),
            Err(StyleError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doc = r#"{"buildStyles": [
            {"id": 2, "name": "a", "laserPower": 10.0},
            {"id": 2, "name": "b", "laserPower": 10.0}
        ]}"#;
        assert!(matches!(
            BuildStyleLibrary::parse(doc),
            Err(StyleError::Invalid(_))
        ));
    }

    #[test]
    fn missing_style_returns_none() {
        let library = BuildStyleLibrary::parse(SAMPLE).unwrap();
        assert!(library.get_for_geometry_type(99).is_none());
        assert!(library.get_by_id(99).is_none());
    }
}
