use crate::domain::model::{AuthorizationStatus, Coordinate, NoiseMeasurement};
use crate::utils::error::{Result, SurveyError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Decibel metering engine.
#[async_trait]
pub trait AudioService: Send + Sync {
    async fn request_microphone_permission(&self) -> bool;

    /// Instantaneous level in dB; must not block.
    fn current_level(&self) -> f64;

    /// Samples for `duration` and resolves once with the average level.
    async fn sample(&self, duration: Duration) -> Result<f64>;

    /// Aborts a running sample. No-op when idle.
    fn stop_sampling(&self);
}

/// Reverse geocoder. Failures are absorbed and reported as `None`.
#[async_trait]
pub trait GeocodingService: Send + Sync {
    async fn resolve_address(&self, coordinate: Coordinate) -> Option<String>;
}

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn save(&self, measurement: &NoiseMeasurement) -> Result<()>;
    /// Returns whether a record with `id` existed.
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Newest first.
    async fn list(&self) -> Vec<NoiseMeasurement>;
    async fn export_csv(&self) -> Result<String>;
    /// Today's quiet index, `None` when nothing was measured today.
    async fn today_aggregate(&self) -> Option<f64>;
}

/// Receiver of push events from a location stream.
pub trait LocationDelegate: Send + Sync {
    fn did_update(&self, coordinate: Coordinate);
    fn did_fail(&self, error: SurveyError);
    fn did_change_authorization(&self, status: AuthorizationStatus);
}

/// Continuous location source that reports through a [`LocationDelegate`].
pub trait LocationStreamProvider: Send + Sync {
    fn set_delegate(&self, delegate: Arc<dyn LocationDelegate>);
    fn request_permission(&self);
    fn start_tracking(&self);
    fn stop_tracking(&self);
}
