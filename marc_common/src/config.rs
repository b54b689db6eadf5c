//! Configuration loading traits and the machine configuration.
//!
//! All MARC binaries load a single `machine.toml` with `[scanner]`, `[plc]`
//! and `[process]` tables. Every field has a production default, so an empty
//! file (or a missing one, for tools that treat the config as optional) is a
//! valid configuration.
//!
//! # Usage
//!
//! ```rust,no_run
//! use marc_common::config::{ConfigLoader, MachineConfig};
//! use std::path::Path;
//!
//! let config = MachineConfig::load(Path::new("machine.toml")).unwrap();
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding the OPC UA endpoint URL.
pub const ENV_OPC_UA_URL: &str = "OPC_UA_URL";
/// Environment variable overriding the OPC UA namespace index.
pub const ENV_OPC_UA_NAMESPACE_INDEX: &str = "OPC_UA_NAMESPACE_INDEX";

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Semantic validation is the caller's job (`validate()` methods)
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation so any deserializable struct loads the same way.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Scanner Settings ───────────────────────────────────────────────

/// Galvo scanner card settings (`[scanner]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Card number to select when several cards are installed.
    pub card_number: u32,
    /// Size of the command list memory [commands].
    pub list_memory: u32,
    /// Commands held back from the list limit before a batch flush.
    pub safety_margin: u32,
    /// Full f-theta field size [mm].
    pub field_size_mm: f64,
    /// Maximum coordinate magnitude [device bits] (20-bit signed).
    pub max_bits: i64,
    /// User calibration factor applied to bits-per-mm.
    pub scale_correction: f64,
    /// Default mark speed [mm/s].
    pub mark_speed: f64,
    /// Default jump speed [mm/s].
    pub jump_speed: f64,
    /// Laser mode selector (0=CO2, 1=YAG1, ...).
    pub laser_mode: u32,
    /// Analog pump source value while marking.
    pub analog_out_value: u32,
    /// Analog pump source standby value.
    pub analog_out_standby: u32,
    /// Laser power that maps to full analog scale [W].
    pub laser_power_scale_w: f64,
    /// Settle delay between queueing the last command and list execution [ms].
    pub settle_delay_ms: u64,
    /// Per-batch list completion timeout [ms].
    pub completion_timeout_ms: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            card_number: 1,
            list_memory: 10_000,
            safety_margin: 10,
            field_size_mm: 163.4,
            max_bits: 524_287,
            scale_correction: 1.0,
            mark_speed: 250.0,
            jump_speed: 1000.0,
            laser_mode: 1,
            analog_out_value: 640,
            analog_out_standby: 0,
            laser_power_scale_w: 500.0,
            settle_delay_ms: 2000,
            completion_timeout_ms: 100_000,
        }
    }
}

impl ScannerSettings {
    /// Validate scanner settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.list_memory < 2 {
            return Err(ConfigError::ValidationError(
                "scanner.list_memory must be at least 2".into(),
            ));
        }
        if self.safety_margin >= self.list_memory {
            return Err(ConfigError::ValidationError(
                "scanner.safety_margin must be smaller than list_memory".into(),
            ));
        }
        if self.field_size_mm <= 0.0 {
            return Err(ConfigError::ValidationError(
                "scanner.field_size_mm must be positive".into(),
            ));
        }
        if self.max_bits <= 0 {
            return Err(ConfigError::ValidationError(
                "scanner.max_bits must be positive".into(),
            ));
        }
        if self.laser_power_scale_w <= 0.0 {
            return Err(ConfigError::ValidationError(
                "scanner.laser_power_scale_w must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ─── PLC Settings ───────────────────────────────────────────────────

/// OPC UA client settings (`[plc]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcSettings {
    /// Server endpoint URL.
    pub endpoint_url: String,
    /// Namespace index the tag identifiers live in.
    pub namespace_index: u16,
    /// Namespace URI (registered by the simulator, informational for clients).
    pub namespace_uri: String,
    /// Connect timeout [ms].
    pub connect_timeout_ms: u64,
    /// Initial readiness timeout before a production run may start [ms].
    pub ready_timeout_ms: u64,
}

impl Default for PlcSettings {
    fn default() -> Self {
        Self {
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
            namespace_index: 2,
            namespace_uri: "urn:codesys:dlms:simulation".to_string(),
            connect_timeout_ms: 10_000,
            ready_timeout_ms: 5_000,
        }
    }
}

impl PlcSettings {
    /// Apply `OPC_UA_URL` / `OPC_UA_NAMESPACE_INDEX` environment overrides.
    ///
    /// Unparsable index values are ignored with a warning, matching the
    /// lenient handling of misconfigured environments elsewhere.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_OPC_UA_URL) {
            if !url.is_empty() {
                tracing::info!("OPC UA URL from {ENV_OPC_UA_URL}: {url}");
                self.endpoint_url = url;
            }
        }
        if let Ok(ns) = std::env::var(ENV_OPC_UA_NAMESPACE_INDEX) {
            match ns.parse::<u16>() {
                Ok(index) => {
                    tracing::info!("OPC UA namespace index from {ENV_OPC_UA_NAMESPACE_INDEX}: {index}");
                    self.namespace_index = index;
                }
                Err(e) => {
                    tracing::warn!("ignoring {ENV_OPC_UA_NAMESPACE_INDEX}={ns}: {e}");
                }
            }
        }
    }

    /// Validate PLC settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint_url.starts_with("opc.tcp://") {
            return Err(ConfigError::ValidationError(format!(
                "plc.endpoint_url must start with opc.tcp:// (got '{}')",
                self.endpoint_url
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "plc.connect_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// ─── Process Settings ───────────────────────────────────────────────

/// Which value is written to `Lay_Stacks` per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LayerStacksPolicy {
    /// Always write 1 — one layer at a time, the per-layer handshake.
    #[default]
    One,
    /// Write the actual layer number.
    LayerNumber,
}

/// Scheduler settings (`[process]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    /// Bounded block-queue capacity (1 = strict single-piece flow).
    pub queue_capacity: usize,
    /// PLC snapshot polling interval [ms].
    pub polling_interval_ms: u64,
    /// `Lay_Stacks` write policy for the per-layer handshake.
    pub layer_stacks_policy: LayerStacksPolicy,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            polling_interval_ms: 500,
            layer_stacks_policy: LayerStacksPolicy::One,
        }
    }
}

// ─── Machine Configuration ──────────────────────────────────────────

/// Complete machine configuration (`machine.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Galvo scanner card settings.
    pub scanner: ScannerSettings,
    /// OPC UA client settings.
    pub plc: PlcSettings,
    /// Scheduler settings.
    pub process: ProcessSettings,
}

impl MachineConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scanner.validate()?;
        self.plc.validate()?;
        Ok(())
    }
}
