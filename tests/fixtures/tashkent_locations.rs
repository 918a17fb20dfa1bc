//! Tashkent locations for realistic test fixtures.
//!
//! Coordinates rounded from OpenStreetMap.

use duty_planner::geo::GeoPoint;

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
            .expect("fixture coordinates are valid")
            .with_label(self.name)
    }
}

// ============================================================================
// City Center
// ============================================================================

pub const CITY_CENTER: &[Location] = &[
    Location::new("Amir Temur Square", 41.311158, 69.279737),
    Location::new("Independence Square", 41.3043, 69.2695),
    Location::new("Alisher Navoi Theatre", 41.3094, 69.2716),
];

// ============================================================================
// Outer Districts
// ============================================================================

pub const DISTRICTS: &[Location] = &[
    Location::new("Chorsu Bazaar", 41.326, 69.228),
    Location::new("TV Tower", 41.3456, 69.2850),
    Location::new("Yunusabad", 41.3640, 69.2870),
    Location::new("Chilanzar", 41.2740, 69.2040),
    Location::new("Sergeli", 41.2260, 69.2190),
];

pub fn amir_temur() -> GeoPoint {
    CITY_CENTER[0].point()
}

pub fn chorsu() -> GeoPoint {
    DISTRICTS[0].point()
}
