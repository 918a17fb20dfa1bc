//! Great-circle geometry and route construction over service points.
//!
//! Distances use the haversine formula, so they ignore roads. Travel time is
//! estimated from an assumed average speed.

use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GeocodeError, PlannerError};
use crate::model::{RequestId, ServiceRequest, Urgency};
use crate::traits::Geocoder;

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Routes longer than this get a "split the route" suggestion.
const LONG_ROUTE_KM: f64 = 100.0;

const LOW_EFFICIENCY: f64 = 0.6;
const HIGH_EFFICIENCY: f64 = 0.8;

/// Default on-site duration for a request without an estimate.
const DEFAULT_SERVICE_MINUTES: u32 = 30;

/// A validated WGS84 coordinate with an optional address label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
    label: Option<String>,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lng: f64,
    #[serde(default)]
    label: Option<String>,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = PlannerError;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        let point = GeoPoint::new(raw.lat, raw.lng)?;
        Ok(match raw.label {
            Some(label) => point.with_label(label),
            None => point,
        })
    }
}

impl GeoPoint {
    /// Creates a point, rejecting coordinates outside the valid ranges.
    pub fn new(lat: f64, lng: f64) -> Result<Self, PlannerError> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        if !valid {
            return Err(PlannerError::InvalidCoordinate { lat, lng });
        }
        Ok(Self {
            lat,
            lng,
            label: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Calculate haversine distance between two coordinates in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// A stop on a route: a location tied to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub point: GeoPoint,
    pub request_id: RequestId,
    pub priority: Urgency,
    /// Estimated on-site duration in minutes.
    pub estimated_minutes: u32,
    pub time_window: Option<(NaiveTime, NaiveTime)>,
}

impl RoutePoint {
    pub fn new(request_id: impl Into<RequestId>, point: GeoPoint) -> Self {
        Self {
            point,
            request_id: request_id.into(),
            priority: Urgency::Ordinary,
            estimated_minutes: DEFAULT_SERVICE_MINUTES,
            time_window: None,
        }
    }

    pub fn priority(mut self, priority: Urgency) -> Self {
        self.priority = priority;
        self
    }

    pub fn duration(mut self, minutes: u32) -> Self {
        self.estimated_minutes = minutes;
        self
    }

    pub fn window(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.time_window = Some((start, end));
        self
    }

    pub fn is_urgent(&self) -> bool {
        self.priority.is_urgent()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Assumed average driving speed in km/h.
    pub average_speed_kmh: f64,
    /// Longest acceptable working day for one route.
    pub max_shift_hours: f64,
    pub max_points_per_route: usize,
    pub fuel_liters_per_100km: f64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: DEFAULT_SPEED_KMH,
            max_shift_hours: 8.0,
            max_points_per_route: 15,
            fuel_liters_per_100km: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteMetrics {
    pub total_distance_km: f64,
    pub travel_minutes: f64,
    pub work_minutes: f64,
    pub fuel_liters: f64,
    pub point_count: usize,
    /// Lower-bound tour estimate divided by the actual tour length, at most 1.0.
    pub efficiency_score: f64,
}

impl RouteMetrics {
    pub fn total_minutes(&self) -> f64 {
        self.travel_minutes + self.work_minutes
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeoEngine {
    config: GeoConfig,
}

impl GeoEngine {
    pub fn new(config: GeoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeoConfig {
        &self.config
    }

    /// Great-circle distance between two points in kilometers.
    pub fn distance(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        haversine_km(a.coords(), b.coords())
    }

    /// Orders points: urgent stops first in input order, then a nearest-neighbor
    /// tour over the rest starting at the first non-urgent stop.
    pub fn build_route(&self, points: &[RoutePoint]) -> Vec<RoutePoint> {
        if points.len() <= 2 {
            return points.to_vec();
        }

        let (mut route, mut remaining): (Vec<RoutePoint>, Vec<RoutePoint>) =
            points.iter().cloned().partition(RoutePoint::is_urgent);

        if remaining.is_empty() {
            return route;
        }

        let mut current = remaining.remove(0);
        while !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_distance = f64::INFINITY;
            for (idx, candidate) in remaining.iter().enumerate() {
                let distance = self.distance(&current.point, &candidate.point);
                // Strict comparison keeps the earliest candidate on ties.
                if distance < best_distance {
                    best_distance = distance;
                    best_idx = idx;
                }
            }
            let next = remaining.remove(best_idx);
            route.push(std::mem::replace(&mut current, next));
        }
        route.push(current);

        debug!(points = route.len(), "built nearest-neighbor route");
        route
    }

    pub fn route_metrics(&self, points: &[RoutePoint]) -> RouteMetrics {
        if points.is_empty() {
            return RouteMetrics::default();
        }

        let total_distance_km: f64 = points
            .windows(2)
            .map(|pair| self.distance(&pair[0].point, &pair[1].point))
            .sum();
        let travel_minutes = total_distance_km / self.config.average_speed_kmh * 60.0;
        let work_minutes: f64 = points.iter().map(|p| p.estimated_minutes as f64).sum();
        let fuel_liters = total_distance_km * self.config.fuel_liters_per_100km / 100.0;

        RouteMetrics {
            total_distance_km,
            travel_minutes,
            work_minutes,
            fuel_liters,
            point_count: points.len(),
            efficiency_score: efficiency(points, total_distance_km),
        }
    }

    /// Rule-based advice for an already ordered route.
    pub fn suggest_improvements(&self, points: &[RoutePoint]) -> Vec<String> {
        let mut suggestions = Vec::new();
        if points.is_empty() {
            return suggestions;
        }

        let metrics = self.route_metrics(points);

        if metrics.total_distance_km > LONG_ROUTE_KM {
            suggestions.push(format!(
                "Route is {:.1} km long; consider splitting it between several executors",
                metrics.total_distance_km
            ));
        }

        let hours = metrics.total_minutes() / 60.0;
        if hours > self.config.max_shift_hours {
            suggestions.push(format!(
                "Route takes {:.1} h, more than the {:.1} h shift limit",
                hours, self.config.max_shift_hours
            ));
        }

        if metrics.point_count > self.config.max_points_per_route {
            suggestions.push(format!(
                "Route has {} stops; the recommended maximum is {}",
                metrics.point_count, self.config.max_points_per_route
            ));
        }

        if metrics.point_count >= 2 {
            if metrics.efficiency_score < LOW_EFFICIENCY {
                suggestions.push(format!(
                    "Route efficiency is low ({:.0}%); reorder stops to cut travel",
                    metrics.efficiency_score * 100.0
                ));
            } else if metrics.efficiency_score > HIGH_EFFICIENCY {
                suggestions.push("Route is already well optimized".to_string());
            }
        }

        if let Some(late) = points.iter().skip(2).find(|p| p.is_urgent()) {
            suggestions.push(format!(
                "Urgent request {} is not among the first two stops",
                late.request_id
            ));
        }

        suggestions
    }

    /// Resolves route points for requests, geocoding addresses when a request
    /// has no coordinates. Unresolvable requests are left out.
    pub fn route_points_for(
        &self,
        requests: &[ServiceRequest],
        geocoder: &dyn Geocoder,
    ) -> Vec<RoutePoint> {
        let mut points = Vec::with_capacity(requests.len());
        for request in requests {
            let resolved = match (&request.location, &request.address) {
                (Some(point), _) => Ok(point.clone()),
                (None, Some(address)) => geocoder.geocode(address),
                (None, None) => Err(GeocodeError::NotFound("request has no address".to_string())),
            };

            match resolved {
                Ok(point) => points.push(
                    RoutePoint::new(request.id.clone(), point).priority(request.urgency),
                ),
                Err(err) => {
                    warn!(request = %request.id, error = %err, "excluding request from route");
                }
            }
        }
        points
    }
}

/// Ratio of a centroid round-trip estimate to the actual tour length.
fn efficiency(points: &[RoutePoint], total_distance_km: f64) -> f64 {
    if points.len() < 2 {
        return 1.0;
    }

    let n = points.len() as f64;
    let centroid = (
        points.iter().map(|p| p.point.lat()).sum::<f64>() / n,
        points.iter().map(|p| p.point.lng()).sum::<f64>() / n,
    );
    let radius = points
        .iter()
        .map(|p| haversine_km(centroid, p.point.coords()))
        .fold(0.0, f64::max);
    let estimate = 2.0 * radius;

    if total_distance_km <= f64::EPSILON {
        return 1.0;
    }
    (estimate / total_distance_km).min(1.0)
}
