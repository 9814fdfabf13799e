//! Geographic utilities: distances, orientation, intersection and midpoints.
//!
//! All functions are pure. Distances are in meters, coordinates in degrees.
//!
//! - [`distance`] picks a flat-earth approximation for nearby points and the
//!   great-circle formula for points more than 0.2° apart on either axis.
//! - [`haversine_distance`] is the great-circle distance on a sphere of
//!   radius [`EARTH_RADIUS`].
//! - [`segments_intersect`] uses the robust orientation predicate from `geo`.
//! - [`midpoint`] averages two points in 3-D cartesian space, treating
//!   elevation as an offset from the earth's radius.

use geo::kernels::{Kernel, Orientation as GeoOrientation, RobustKernel};
use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::Point;

/// Earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Meters per degree used by the flat-earth approximation.
pub const ONE_DEGREE: f64 = 1000.0 * 10000.8 / 90.0;

/// Beyond this angular separation (degrees, either axis) the flat
/// approximation is replaced by the haversine formula.
const FLAT_LIMIT_DEGREES: f64 = 0.2;

/// Distance between two points.
///
/// With `three_d`, the planar distance is combined with the elevation delta
/// when both elevations are known and differ.
pub fn distance(p1: &Point, p2: &Point, three_d: bool) -> f64 {
    let d_lat = p2.latitude - p1.latitude;
    let d_lon = p2.longitude - p1.longitude;

    let planar = if d_lat.abs() > FLAT_LIMIT_DEGREES || d_lon.abs() > FLAT_LIMIT_DEGREES {
        haversine_distance(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
    } else {
        let x = d_lat;
        let y = d_lon * p1.latitude.to_radians().cos();
        (x * x + y * y).sqrt() * ONE_DEGREE
    };

    if !three_d {
        return planar;
    }

    match (p1.elevation, p2.elevation) {
        (Some(e1), Some(e2)) if e1 != e2 => {
            let d_ele = e2 - e1;
            (planar * planar + d_ele * d_ele).sqrt()
        }
        _ => planar,
    }
}

/// Planar distance between two points.
#[inline]
pub fn distance_2d(p1: &Point, p2: &Point) -> f64 {
    distance(p1, p2, false)
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS * c
}

/// Great-circle distance between two points.
#[inline]
pub fn haversine_points(p1: &Point, p2: &Point) -> f64 {
    haversine_distance(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Turn direction of the path p -> q -> r.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

fn coord(p: &Point) -> Coord<f64> {
    Coord {
        x: p.longitude,
        y: p.latitude,
    }
}

/// Orientation of the triple (p, q, r), longitude as x and latitude as y.
pub fn orientation(p: &Point, q: &Point, r: &Point) -> Orientation {
    match RobustKernel::orient2d(coord(p), coord(q), coord(r)) {
        GeoOrientation::CounterClockwise => Orientation::CounterClockwise,
        GeoOrientation::Clockwise => Orientation::Clockwise,
        GeoOrientation::Collinear => Orientation::Collinear,
    }
}

/// True when segment p1-q1 properly crosses segment p2-q2.
///
/// Any collinear triple counts as non-intersecting, so touching endpoints
/// and overlapping collinear segments are never reported.
pub fn segments_intersect(p1: &Point, q1: &Point, p2: &Point, q2: &Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if [o1, o2, o3, o4].contains(&Orientation::Collinear) {
        return false;
    }

    o1 != o2 && o3 != o4
}

fn to_cartesian(p: &Point) -> (f64, f64, f64) {
    let lat = p.latitude.to_radians();
    let lon = p.longitude.to_radians();
    let r = EARTH_RADIUS + p.elevation.unwrap_or(0.0);
    (
        r * lat.cos() * lon.cos(),
        r * lat.cos() * lon.sin(),
        r * lat.sin(),
    )
}

/// Midpoint of two points through 3-D cartesian space.
///
/// The result has a known elevation only when both inputs do. Its
/// timestamp is left empty; callers decide which time to keep.
pub fn midpoint(p1: &Point, p2: &Point) -> Point {
    let (x1, y1, z1) = to_cartesian(p1);
    let (x2, y2, z2) = to_cartesian(p2);
    let (x, y, z) = ((x1 + x2) / 2.0, (y1 + y2) / 2.0, (z1 + z2) / 2.0);

    let r = (x * x + y * y + z * z).sqrt();
    let latitude = (z / r).asin().to_degrees();
    let longitude = y.atan2(x).to_degrees();

    let elevation = match (p1.elevation, p2.elevation) {
        (Some(_), Some(_)) => Some(r - EARTH_RADIUS),
        _ => None,
    };

    Point {
        latitude,
        longitude,
        elevation,
        time: None,
    }
}

/// Signed elevation change from `p1` to `p2`; unknown elevations give 0.
pub fn elevation_delta(p1: &Point, p2: &Point) -> f64 {
    match (p1.elevation, p2.elevation) {
        (Some(e1), Some(e2)) => e2 - e1,
        _ => 0.0,
    }
}

/// Absolute seconds between two timestamps; 0 when either is missing.
pub fn time_diff(p1: &Point, p2: &Point) -> f64 {
    match (p1.time, p2.time) {
        (Some(t1), Some(t2)) => ((t2 - t1).num_milliseconds() as f64 / 1000.0).abs(),
        _ => 0.0,
    }
}

/// Metrics of the edge between two consecutive points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Distance in meters
    pub length: f64,
    /// Elapsed seconds (0 when either time is missing)
    pub duration: f64,
    /// Speed in m/s (0 when the duration is 0)
    pub speed: f64,
    /// Signed elevation change per second (0 when the duration is 0)
    pub vertical_speed: f64,
    /// Signed elevation change in meters
    pub elevation: f64,
}

impl Edge {
    /// Measure the edge from `from` to `to`.
    pub fn between(from: &Point, to: &Point, three_d: bool) -> Self {
        let length = distance(from, to, three_d);
        let duration = time_diff(from, to);
        let elevation = elevation_delta(from, to);
        let (speed, vertical_speed) = if duration > 0.0 {
            (length / duration, elevation / duration)
        } else {
            (0.0, 0.0)
        };
        Self {
            length,
            duration,
            speed,
            vertical_speed,
            elevation,
        }
    }
}

/// Total planar length of a point sequence.
pub fn path_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| distance_2d(&w[0], &w[1])).sum()
}
