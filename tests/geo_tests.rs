//! Geo engine tests over Tashkent locations.

mod fixtures;

use duty_planner::geo::{GeoConfig, GeoEngine, RoutePoint};
use duty_planner::memory::StaticGeocoder;
use duty_planner::model::Urgency;

use fixtures::*;

fn engine() -> GeoEngine {
    GeoEngine::new(GeoConfig::default())
}

#[test]
fn test_center_to_chorsu_distance() {
    let km = engine().distance(&amir_temur(), &chorsu());
    assert!((4.0..5.5).contains(&km), "got {:.2} km", km);
}

#[test]
fn test_two_point_route_metrics() {
    let stops = vec![
        RoutePoint::new("center", amir_temur()),
        RoutePoint::new("bazaar", chorsu()),
    ];

    let metrics = engine().route_metrics(&stops);

    assert_eq!(metrics.point_count, 2);
    assert!(metrics.total_distance_km > 0.0 && metrics.total_distance_km < 10.0);
    assert_eq!(engine().build_route(&stops), stops);
}

#[test]
fn test_route_points_geocode_missing_locations() {
    let geocoder = StaticGeocoder::new().with("Chorsu 1", chorsu());
    let requests = vec![
        electric_request("located", 10).with_location(amir_temur()),
        electric_request("by-address", 10).with_address("Chorsu 1"),
        electric_request("unknown-address", 10).with_address("Nowhere 99"),
        electric_request("no-address", 10),
    ];

    let points = engine().route_points_for(&requests, &geocoder);

    let ids: Vec<_> = points.iter().map(|p| p.request_id.as_str()).collect();
    assert_eq!(ids, vec!["located", "by-address"]);
    assert_eq!(points[1].point.coords(), chorsu().coords());
}

#[test]
fn test_city_route_urgent_first_then_nearest() {
    let mut stops: Vec<RoutePoint> = DISTRICTS
        .iter()
        .map(|loc| RoutePoint::new(loc.name, loc.point()))
        .collect();
    stops.push(RoutePoint::new("Amir Temur Square", amir_temur()).priority(Urgency::Critical));

    let route = engine().build_route(&stops);

    assert_eq!(route.len(), stops.len());
    assert_eq!(route[0].request_id, "Amir Temur Square");
    // Tour over the rest starts at the first non-urgent stop.
    assert_eq!(route[1].request_id, "Chorsu Bazaar");

    let metrics = engine().route_metrics(&route);
    assert_eq!(metrics.point_count, 6);
    assert!(metrics.total_distance_km > 0.0);
    assert!(metrics.efficiency_score > 0.0 && metrics.efficiency_score <= 1.0);
}

#[test]
fn test_sprawling_route_gets_split_advice() {
    let stops: Vec<RoutePoint> = DISTRICTS
        .iter()
        .chain(CITY_CENTER)
        .cycle()
        .take(20)
        .enumerate()
        .map(|(i, loc)| RoutePoint::new(format!("{}-{}", loc.name, i), loc.point()).duration(45))
        .collect();

    let advice = engine().suggest_improvements(&stops);

    assert!(advice.iter().any(|s| s.contains("recommended maximum is 15")));
    assert!(advice.iter().any(|s| s.contains("shift limit")));
}
