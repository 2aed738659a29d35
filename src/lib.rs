pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::{CliArgs, SurveyCommand};
pub use config::{toml_config::SurveyFileConfig, Configuration};

pub use adapters::{
    LocalStore, NominatimGeocoder, OfflineGeocoder, SimulatedAudio, SimulatedLocationProvider,
};
pub use core::{LocationAcquirer, MeasurementOrchestrator, OrchestratorOptions, Services};
pub use domain::model::{
    AuthorizationStatus, Coordinate, LocationData, MapRegion, NoiseCategory, NoiseMeasurement,
    OrchestratorState, Screen,
};
pub use utils::error::{Result, SurveyError};
