use crate::config::Configuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Stands in for "no fix obtained".
    pub const SENTINEL: Coordinate = Coordinate {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Denied,
    Restricted,
    Authorized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl LocationData {
    /// Builds the record location, falling back to the sentinel when no fix was obtained.
    pub fn from_fix(fix: Option<Coordinate>, address: Option<String>) -> Self {
        let coordinate = fix.unwrap_or(Coordinate::SENTINEL);
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            address,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseCategory {
    Quiet,
    Moderate,
    Loud,
}

impl NoiseCategory {
    pub fn classify(decibel_level: f64, config: &Configuration) -> Self {
        if decibel_level < config.quiet_threshold {
            NoiseCategory::Quiet
        } else if decibel_level < config.moderate_threshold {
            NoiseCategory::Moderate
        } else {
            NoiseCategory::Loud
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NoiseCategory::Quiet => "quiet",
            NoiseCategory::Moderate => "moderate",
            NoiseCategory::Loud => "loud",
        }
    }
}

impl std::fmt::Display for NoiseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One completed measurement. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseMeasurement {
    id: String,
    location: LocationData,
    decibel_level: f64,
    duration: f64,
    timestamp: DateTime<Utc>,
}

impl NoiseMeasurement {
    pub fn new(location: LocationData, decibel_level: f64, duration: f64) -> Self {
        Self::recorded_at(location, decibel_level, duration, Utc::now())
    }

    pub fn recorded_at(
        location: LocationData,
        decibel_level: f64,
        duration: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            location,
            decibel_level,
            duration,
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &LocationData {
        &self.location
    }

    pub fn decibel_level(&self) -> f64 {
        self.decibel_level
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn category(&self, config: &Configuration) -> NoiseCategory {
        NoiseCategory::classify(self.decibel_level, config)
    }

    pub fn has_fix(&self) -> bool {
        !self.location.coordinate().is_sentinel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Home,
    Measuring,
    Result,
    Map,
    History,
}

/// Snapshot published to observers of the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorState {
    pub screen: Screen,
    pub is_measuring: bool,
    pub current_decibels: f64,
    pub measurement_progress: f64,
    pub latest_measurement: Option<NoiseMeasurement>,
    pub pending_alert: Option<String>,
}

/// Visible map area enclosing a set of measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRegion {
    pub center: Coordinate,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl MapRegion {
    const MIN_SPAN: f64 = 0.01;
    const PADDING: f64 = 1.5;

    /// Region around every measurement that has a real fix; `None` if there is none.
    pub fn fitting(measurements: &[NoiseMeasurement]) -> Option<Self> {
        let coordinates: Vec<Coordinate> = measurements
            .iter()
            .filter(|m| m.has_fix())
            .map(|m| m.location().coordinate())
            .collect();

        let first = coordinates.first()?;
        let (mut min_lat, mut max_lat) = (first.latitude, first.latitude);
        let (mut min_lon, mut max_lon) = (first.longitude, first.longitude);
        for c in &coordinates[1..] {
            min_lat = min_lat.min(c.latitude);
            max_lat = max_lat.max(c.latitude);
            min_lon = min_lon.min(c.longitude);
            max_lon = max_lon.max(c.longitude);
        }

        Some(Self {
            center: Coordinate::new((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0),
            latitude_delta: ((max_lat - min_lat) * Self::PADDING).max(Self::MIN_SPAN),
            longitude_delta: ((max_lon - min_lon) * Self::PADDING).max(Self::MIN_SPAN),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Configuration {
        Configuration {
            quiet_threshold: 35.0,
            moderate_threshold: 65.0,
            ..Configuration::default()
        }
    }

    #[test]
    fn test_noise_category_boundaries() {
        let config = thresholds();
        assert_eq!(NoiseCategory::classify(20.0, &config), NoiseCategory::Quiet);
        assert_eq!(NoiseCategory::classify(50.0, &config), NoiseCategory::Moderate);
        assert_eq!(NoiseCategory::classify(80.0, &config), NoiseCategory::Loud);
        assert_eq!(NoiseCategory::classify(35.0, &config), NoiseCategory::Moderate);
        assert_eq!(NoiseCategory::classify(65.0, &config), NoiseCategory::Loud);
    }

    #[test]
    fn test_location_data_falls_back_to_sentinel() {
        let location = LocationData::from_fix(None, None);
        assert_eq!(location.latitude, 0.0);
        assert_eq!(location.longitude, 0.0);
        assert!(location.address.is_none());
        assert!(location.coordinate().is_sentinel());
    }

    #[test]
    fn test_measurements_get_unique_ids() {
        let location = LocationData::from_fix(Some(Coordinate::new(1.0, 2.0)), None);
        let a = NoiseMeasurement::new(location.clone(), 40.0, 7.0);
        let b = NoiseMeasurement::new(location, 40.0, 7.0);
        assert_ne!(a.id(), b.id());
        assert!(a.has_fix());
    }

    #[test]
    fn test_map_region_skips_sentinel_entries() {
        let measurements = vec![
            NoiseMeasurement::new(
                LocationData::from_fix(Some(Coordinate::new(55.0, 37.0)), None),
                50.0,
                7.0,
            ),
            NoiseMeasurement::new(
                LocationData::from_fix(Some(Coordinate::new(56.0, 38.0)), None),
                60.0,
                7.0,
            ),
            NoiseMeasurement::new(LocationData::from_fix(None, None), 70.0, 7.0),
        ];

        let region = MapRegion::fitting(&measurements).unwrap();
        assert_eq!(region.center, Coordinate::new(55.5, 37.5));
        assert!((region.latitude_delta - 1.5).abs() < 1e-9);
        assert!((region.longitude_delta - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_map_region_single_point_has_minimum_span() {
        let measurements = vec![NoiseMeasurement::new(
            LocationData::from_fix(Some(Coordinate::new(10.0, 20.0)), None),
            50.0,
            7.0,
        )];
        let region = MapRegion::fitting(&measurements).unwrap();
        assert_eq!(region.latitude_delta, 0.01);
        assert!(MapRegion::fitting(&[]).is_none());
    }
}
