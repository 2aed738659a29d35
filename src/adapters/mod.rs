// Adapters layer: concrete implementations of the domain ports (storage, geocoding, simulated sensors).

pub mod geocoding;
pub mod simulated;
pub mod storage;

pub use geocoding::{NominatimGeocoder, OfflineGeocoder};
pub use simulated::{SimulatedAudio, SimulatedLocationProvider};
pub use storage::LocalStore;
