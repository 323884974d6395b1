use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::settings::{Calibration, SweepTuning, Timings};

/// Config file picked up from the working directory when `--config` is
/// not given.
pub const DEFAULT_CONFIG_FILE: &str = "powerqa.toml";

/// Root configuration structure
///
/// Every field is optional in the file; missing ones take the bench
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Serial port; falls back to the last used one
    pub port: Option<String>,
    pub baud_rate: u32,
    /// JSON Lines file receiving finished sessions
    pub archive: PathBuf,
    pub calibration: Calibration,
    pub timings: Timings,
    pub sweep: SweepTuning,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            archive: PathBuf::from("log").join("sessions.jsonl"),
            calibration: Calibration::default(),
            timings: Timings::default(),
            sweep: SweepTuning::default(),
        }
    }
}

impl BenchConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Read configuration from a file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    /// Convert to a TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
