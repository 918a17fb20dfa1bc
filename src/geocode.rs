//! Nominatim HTTP adapter for address geocoding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeocodeError;
use crate::geo::GeoPoint;
use crate::traits::Geocoder;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub base_url: String,
    /// Nominatim rejects requests without an identifying user agent.
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Appended to every query, e.g. the city the service operates in.
    pub region_hint: Option<String>,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "duty-planner/0.1".to_string(),
            timeout_secs: 10,
            region_hint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
}

impl NominatimGeocoder {
    pub fn new(config: NominatimConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| GeocodeError::Transport(err.to_string()))?;

        Ok(Self { config, client })
    }

    fn query_for(&self, address: &str) -> String {
        match &self.config.region_hint {
            Some(region) => format!("{}, {}", address, region),
            None => address.to_string(),
        }
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, address: &str) -> Result<GeoPoint, GeocodeError> {
        let query = self.query_for(address);
        let url = format!("{}/search", self.config.base_url);

        let places = self
            .client
            .get(url)
            .query(&[("q", query.as_str()), ("format", "json"), ("limit", "1")])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<Vec<NominatimPlace>>())
            .map_err(|err| GeocodeError::Transport(err.to_string()))?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))?;
        debug!(address, place = %place.display_name, "geocoded");
        place.into_point()
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

impl NominatimPlace {
    fn into_point(self) -> Result<GeoPoint, GeocodeError> {
        let parse = |raw: &str| {
            raw.parse::<f64>()
                .map_err(|_| GeocodeError::InvalidPoint(format!("{},{}", self.lat, self.lon)))
        };
        let (lat, lng) = (parse(&self.lat)?, parse(&self.lon)?);
        let point = GeoPoint::new(lat, lng).map_err(|err| GeocodeError::InvalidPoint(err.to_string()))?;
        Ok(if self.display_name.is_empty() {
            point
        } else {
            point.with_label(self.display_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_parses_into_point() {
        let body = r#"[{"lat":"41.3111","lon":"69.2797","display_name":"Amir Temur Square"}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(body).unwrap();
        let point = places.into_iter().next().unwrap().into_point().unwrap();
        assert!((point.lat() - 41.3111).abs() < 1e-9);
        assert!((point.lng() - 69.2797).abs() < 1e-9);
        assert_eq!(point.label(), Some("Amir Temur Square"));
    }

    #[test]
    fn test_place_with_garbage_coordinates_is_rejected() {
        let place = NominatimPlace {
            lat: "north".to_string(),
            lon: "69.2".to_string(),
            display_name: String::new(),
        };
        assert!(matches!(place.into_point(), Err(GeocodeError::InvalidPoint(_))));

        let out_of_range = NominatimPlace {
            lat: "95.0".to_string(),
            lon: "69.2".to_string(),
            display_name: String::new(),
        };
        assert!(matches!(out_of_range.into_point(), Err(GeocodeError::InvalidPoint(_))));
    }

    #[test]
    fn test_region_hint_is_appended() {
        let geocoder = NominatimGeocoder::new(NominatimConfig {
            region_hint: Some("Tashkent".to_string()),
            ..NominatimConfig::default()
        })
        .unwrap();
        assert_eq!(geocoder.query_for("Navoi 12"), "Navoi 12, Tashkent");
    }
}
