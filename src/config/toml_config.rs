use crate::config::Configuration;
use crate::domain::model::Coordinate;
use crate::utils::error::{Result, SurveyError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LOCATION_TIMEOUT_SECS: f64 = 15.0;
pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";
pub const DEFAULT_USER_AGENT: &str = "noise-survey/0.1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyFileConfig {
    pub measurement: MeasurementSection,
    pub features: FeatureSection,
    pub location: LocationSection,
    pub geocoding: GeocodingSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementSection {
    pub duration_secs: Option<f64>,
    pub quiet_threshold: Option<f64>,
    pub moderate_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSection {
    pub enable_ar_mode: Option<bool>,
    pub enable_export: Option<bool>,
    pub enable_history: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSection {
    pub timeout_secs: Option<f64>,
    /// Fix reported by the simulated provider used by the CLI.
    pub simulated_latitude: Option<f64>,
    pub simulated_longitude: Option<f64>,
    pub simulated_delay_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingSection {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub path: Option<String>,
}

impl SurveyFileConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SurveyError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SurveyError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SURVEY_DB})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| SurveyError::ConfigError {
            message: format!("env substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        self.to_configuration().validate()?;

        if let Some(timeout) = self.location.timeout_secs {
            validation::validate_duration_secs("location.timeout_secs", timeout)?;
        }
        if let Some(delay) = self.location.simulated_delay_secs {
            validation::validate_duration_secs("location.simulated_delay_secs", delay)?;
        }

        if let Some(fix) = self.simulated_fix()? {
            validation::validate_range("location.simulated_latitude", fix.latitude, -90.0, 90.0)?;
            validation::validate_range(
                "location.simulated_longitude",
                fix.longitude,
                -180.0,
                180.0,
            )?;
        }

        if let Some(endpoint) = &self.geocoding.endpoint {
            validation::validate_url("geocoding.endpoint", endpoint)?;
        }
        if let Some(agent) = &self.geocoding.user_agent {
            validation::validate_non_empty_string("geocoding.user_agent", agent)?;
        }
        if let Some(path) = &self.storage.path {
            validation::validate_path("storage.path", path)?;
        }

        Ok(())
    }

    pub fn to_configuration(&self) -> Configuration {
        let defaults = Configuration::default();
        Configuration {
            measurement_duration: self
                .measurement
                .duration_secs
                .unwrap_or(defaults.measurement_duration),
            quiet_threshold: self
                .measurement
                .quiet_threshold
                .unwrap_or(defaults.quiet_threshold),
            moderate_threshold: self
                .measurement
                .moderate_threshold
                .unwrap_or(defaults.moderate_threshold),
            enable_ar_mode: self.features.enable_ar_mode.unwrap_or(defaults.enable_ar_mode),
            enable_export: self.features.enable_export.unwrap_or(defaults.enable_export),
            enable_history: self.features.enable_history.unwrap_or(defaults.enable_history),
        }
    }

    /// 超出 `Duration` 範圍的值視為無限等待
    pub fn location_timeout(&self) -> Duration {
        let secs = self
            .location
            .timeout_secs
            .unwrap_or(DEFAULT_LOCATION_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Both coordinates or neither.
    pub fn simulated_fix(&self) -> Result<Option<Coordinate>> {
        match (
            self.location.simulated_latitude,
            self.location.simulated_longitude,
        ) {
            (None, None) => Ok(None),
            (latitude, longitude) => {
                let latitude =
                    validation::validate_required_field("location.simulated_latitude", &latitude)?;
                let longitude = validation::validate_required_field(
                    "location.simulated_longitude",
                    &longitude,
                )?;
                Ok(Some(Coordinate::new(*latitude, *longitude)))
            }
        }
    }

    pub fn simulated_delay(&self) -> Duration {
        let secs = self.location.simulated_delay_secs.unwrap_or(1.0).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn geocoding_enabled(&self) -> bool {
        self.geocoding.enabled.unwrap_or(true)
    }

    pub fn geocoder_endpoint(&self) -> &str {
        self.geocoding
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GEOCODER_ENDPOINT)
    }

    pub fn geocoder_user_agent(&self) -> &str {
        self.geocoding
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn geocoder_timeout(&self) -> Duration {
        Duration::from_secs(self.geocoding.timeout_secs.unwrap_or(10))
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage.path.as_deref()
    }
}

impl Validate for SurveyFileConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
