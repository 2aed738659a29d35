use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Location fix timed out after {seconds:.1}s")]
    LocationTimeout { seconds: f64 },

    #[error("Location unavailable: {reason}")]
    LocationUnavailable { reason: String },

    #[error("Geocoding failed: {reason}")]
    GeocodingFailed { reason: String },

    #[error("Persisting measurement failed: {reason}")]
    PersistenceFailed { reason: String },

    #[error("A location request is already pending")]
    LocationBusy,

    #[error("A measurement is already in progress")]
    MeasurementInProgress,

    #[error("Audio sampling failed: {reason}")]
    SamplingFailed { reason: String },

    #[error("Measurement cancelled: {reason}")]
    MeasurementCancelled { reason: String },

    #[error("Measurement orchestrator is no longer running")]
    OrchestratorStopped,

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Permission,
    Location,
    Geocoding,
    Storage,
    Measurement,
    Configuration,
    System,
}

impl SurveyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SurveyError::PermissionDenied { .. } => ErrorCategory::Permission,
            SurveyError::LocationTimeout { .. }
            | SurveyError::LocationUnavailable { .. }
            | SurveyError::LocationBusy => ErrorCategory::Location,
            SurveyError::GeocodingFailed { .. } | SurveyError::ApiError(_) => {
                ErrorCategory::Geocoding
            }
            SurveyError::PersistenceFailed { .. }
            | SurveyError::CsvError(_)
            | SurveyError::SerializationError(_) => ErrorCategory::Storage,
            SurveyError::MeasurementInProgress
            | SurveyError::MeasurementCancelled { .. }
            | SurveyError::SamplingFailed { .. }
            | SurveyError::OrchestratorStopped => ErrorCategory::Measurement,
            SurveyError::ConfigError { .. }
            | SurveyError::InvalidConfigValueError { .. }
            | SurveyError::MissingConfigError { .. }
            | SurveyError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            SurveyError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SurveyError::LocationTimeout { .. }
            | SurveyError::LocationUnavailable { .. }
            | SurveyError::GeocodingFailed { .. } => ErrorSeverity::Low,
            SurveyError::PermissionDenied { .. }
            | SurveyError::LocationBusy
            | SurveyError::MeasurementInProgress
            | SurveyError::MeasurementCancelled { .. }
            | SurveyError::ApiError(_) => ErrorSeverity::Medium,
            SurveyError::PersistenceFailed { .. }
            | SurveyError::SamplingFailed { .. }
            | SurveyError::CsvError(_)
            | SurveyError::SerializationError(_)
            | SurveyError::ConfigError { .. }
            | SurveyError::InvalidConfigValueError { .. }
            | SurveyError::MissingConfigError { .. }
            | SurveyError::ConfigValidationError { .. } => ErrorSeverity::High,
            SurveyError::OrchestratorStopped | SurveyError::IoError(_) => {
                ErrorSeverity::Critical
            }
        }
    }

    /// Whether the measurement flow absorbs this error without aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SurveyError::PermissionDenied { .. }
                | SurveyError::LocationTimeout { .. }
                | SurveyError::LocationUnavailable { .. }
                | SurveyError::GeocodingFailed { .. }
                | SurveyError::PersistenceFailed { .. }
                | SurveyError::LocationBusy
                | SurveyError::MeasurementInProgress
                | SurveyError::MeasurementCancelled { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Permission => "Grant microphone access in system settings and try again",
            ErrorCategory::Location => {
                "Move somewhere with a clearer sky view or enable location services"
            }
            ErrorCategory::Geocoding => "Check network connectivity; the address can be resolved later",
            ErrorCategory::Storage => "Check free disk space and permissions of the history file",
            ErrorCategory::Measurement => "Wait for the current measurement to finish and retry",
            ErrorCategory::Configuration => "Review the configuration file and command-line flags",
            ErrorCategory::System => "Check file paths and permissions",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            SurveyError::PermissionDenied { message } => message.clone(),
            SurveyError::PersistenceFailed { .. } => {
                "The measurement was taken but could not be saved".to_string()
            }
            SurveyError::MeasurementInProgress => "A measurement is already running".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;
