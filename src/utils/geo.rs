// src/utils/geo.rs
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// A coordinate is usable when both parts are finite and inside their ranges.
    pub fn is_valid(&self) -> bool {
        is_latitude(self.lat) && is_longitude(self.lng)
    }

    pub fn distance_to(&self, other: &LatLng) -> Option<f64> {
        distance_km(self.lat, self.lng, other.lat, other.lng)
    }
}

fn is_latitude(value: f64) -> bool {
    value.is_finite() && value.abs() <= 90.0
}

fn is_longitude(value: f64) -> bool {
    value.is_finite() && value.abs() <= 180.0
}

/// Resolve an ambiguous `[a, b]` pair into a coordinate.
///
/// Producers upstream send both `[lat, lng]` and `[lng, lat]`. The pair is
/// taken as-is when it reads as `[lat, lng]`, swapped when only the reverse
/// reading is valid, and otherwise the value that fits a latitude wins with
/// the other one wrapped back into the longitude range.
pub fn normalize_coords(first: f64, second: f64) -> Option<LatLng> {
    if !first.is_finite() || !second.is_finite() {
        return None;
    }

    if is_latitude(first) && is_longitude(second) {
        return Some(LatLng::new(first, second));
    }

    if is_latitude(second) && is_longitude(first) {
        return Some(LatLng::new(second, first));
    }

    if is_latitude(first) {
        return Some(LatLng::new(first, wrap_longitude(second)));
    }

    if is_latitude(second) {
        return Some(LatLng::new(second, wrap_longitude(first)));
    }

    None
}

fn wrap_longitude(lng: f64) -> f64 {
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid maps +180 onto -180; keep the original sign for that edge
    if wrapped == -180.0 && lng > 0.0 { 180.0 } else { wrapped }
}

/// Haversine great-circle distance in kilometers.
///
/// Returns `None` when any input is not a usable coordinate, so callers can
/// tell "unknown" apart from "same spot".
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Option<f64> {
    if !is_latitude(lat1) || !is_longitude(lng1) || !is_latitude(lat2) || !is_longitude(lng2) {
        return None;
    }

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Some(EARTH_RADIUS_KM * c)
}
