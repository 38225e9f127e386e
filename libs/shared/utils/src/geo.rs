//! Radius checks against the facility location.

use shared_config::AppConfig;

/// Mean Earth radius used by the Haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two WGS84 coordinates.
pub fn haversine_distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Whether `(lat, lon)` lies within `radius_meters` of the centre, boundary included.
pub fn is_within_radius(
    lat: f64,
    lon: f64,
    center_lat: f64,
    center_lon: f64,
    radius_meters: f64,
) -> bool {
    let inputs = [lat, lon, center_lat, center_lon, radius_meters];
    if inputs.iter().any(|v| !v.is_finite()) || radius_meters < 0.0 {
        return false;
    }

    haversine_distance_meters(lat, lon, center_lat, center_lon) <= radius_meters
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
}

impl GeoFence {
    pub fn new(latitude: f64, longitude: f64, radius_meters: f64) -> Self {
        Self { latitude, longitude, radius_meters }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.facility_latitude,
            config.facility_longitude,
            config.checkin_radius_meters,
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        is_within_radius(lat, lon, self.latitude, self.longitude, self.radius_meters)
    }

    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        haversine_distance_meters(lat, lon, self.latitude, self.longitude)
    }
}
