pub mod geo;
pub mod test_utils;

pub use geo::{GeoFence, haversine_distance_meters, is_within_radius};
