use geo::Point;
#[allow(deprecated)]
use geo::HaversineDistance;

use crate::elements::to_degrees;

/// Great-circle distance in metres between two fixed-point coordinates
#[allow(deprecated)]
pub fn haversine_distance(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> f64 {
    let p1 = Point::new(to_degrees(lon1), to_degrees(lat1));
    let p2 = Point::new(to_degrees(lon2), to_degrees(lat2));
    p1.haversine_distance(&p2)
}
