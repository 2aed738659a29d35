use crate::domain::model::Coordinate;
use crate::domain::ports::GeocodingService;
use crate::utils::error::{Result, SurveyError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const UNKNOWN_PLACE: &str = "Unknown place";

/// Reverse geocoding against a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<AddressParts>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressParts {
    road: Option<String>,
    pedestrian: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl AddressParts {
    /// "street, city", or a placeholder when neither part is known.
    fn format(&self) -> String {
        let street = self.road.as_ref().or(self.pedestrian.as_ref());
        let locality = self
            .city
            .as_ref()
            .or(self.town.as_ref())
            .or(self.village.as_ref());

        let components: Vec<&str> = [street, locality]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();

        if components.is_empty() {
            UNKNOWN_PLACE.to_string()
        } else {
            components.join(", ")
        }
    }
}

impl NominatimGeocoder {
    pub fn new(endpoint: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn request_url(&self, coordinate: Coordinate) -> Result<Url> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("format", "jsonv2".to_string()),
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
            ],
        )
        .map_err(|e| SurveyError::InvalidConfigValueError {
            field: "geocoding.endpoint".to_string(),
            value: self.endpoint.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn lookup(&self, coordinate: Coordinate) -> Result<String> {
        let url = self.request_url(coordinate)?;
        tracing::debug!("Reverse geocoding request: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SurveyError::GeocodingFailed {
                reason: format!("geocoder responded with HTTP {}", status),
            });
        }

        let body: ReverseResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(SurveyError::GeocodingFailed { reason: error });
        }

        body.address
            .map(|parts| parts.format())
            .ok_or_else(|| SurveyError::GeocodingFailed {
                reason: "response carried no address".to_string(),
            })
    }
}

#[async_trait]
impl GeocodingService for NominatimGeocoder {
    async fn resolve_address(&self, coordinate: Coordinate) -> Option<String> {
        match self.lookup(coordinate).await {
            Ok(address) => Some(address),
            Err(e) => {
                let failure = match e {
                    SurveyError::GeocodingFailed { .. } => e,
                    other => SurveyError::GeocodingFailed {
                        reason: other.to_string(),
                    },
                };
                tracing::warn!(
                    "Address lookup for ({:.5}, {:.5}) skipped: {}",
                    coordinate.latitude,
                    coordinate.longitude,
                    failure
                );
                None
            }
        }
    }
}

/// Used when reverse geocoding is switched off. Records keep an empty address.
pub struct OfflineGeocoder;

#[async_trait]
impl GeocodingService for OfflineGeocoder {
    async fn resolve_address(&self, _coordinate: Coordinate) -> Option<String> {
        None
    }
}
