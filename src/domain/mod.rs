// Domain layer: core models and ports (interfaces) to the sensor, geocoding and storage collaborators.

pub mod model;
pub mod ports;
