pub mod location;
pub mod orchestrator;

pub use crate::domain::model::{NoiseMeasurement, OrchestratorState, Screen};
pub use crate::domain::ports::{AudioService, GeocodingService, MeasurementStore};
pub use crate::utils::error::Result;
pub use location::LocationAcquirer;
pub use orchestrator::{MeasurementOrchestrator, OrchestratorOptions, Services};
