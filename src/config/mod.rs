#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Module-wide settings, fixed once the module is entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Sampling length in seconds.
    pub measurement_duration: f64,
    pub quiet_threshold: f64,
    pub moderate_threshold: f64,
    pub enable_ar_mode: bool,
    pub enable_export: bool,
    pub enable_history: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            measurement_duration: 7.0,
            quiet_threshold: 40.0,
            moderate_threshold: 70.0,
            enable_ar_mode: false,
            enable_export: true,
            enable_history: true,
        }
    }
}

impl Configuration {
    pub fn sampling_duration(&self) -> Result<Duration> {
        validation::validate_duration_secs("measurement_duration", self.measurement_duration)
    }
}

impl Validate for Configuration {
    fn validate(&self) -> Result<()> {
        self.sampling_duration()?;
        validation::validate_strictly_ordered(
            "quiet_threshold",
            self.quiet_threshold,
            "moderate_threshold",
            self.moderate_threshold,
        )
    }
}
