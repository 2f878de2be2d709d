//! Geographic primitives shared by the simulation and the wire protocol.
//!
//! Positions are latitude/longitude pairs in degrees. Distances are computed on a
//! sphere of mean earth radius, which is accurate to well under a metre over the
//! few kilometres a race course spans.

use serde::{Deserialize, Serialize};

/// Mean earth radius used for great-circle calculations
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
pub const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;
pub const MILLIS_PER_HOUR: f64 = 3_600_000.0;
/// One knot expressed in metres per second
pub const KNOTS_TO_METERS_PER_SECOND: f64 = METERS_PER_NAUTICAL_MILE / 3600.0;

/// A compass bearing in degrees, always normalised to [0, 360)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Bearing(f64);

impl Bearing {
    pub fn from_degrees(degrees: f64) -> Self {
        let normalised = degrees.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        if normalised >= 360.0 {
            Bearing(0.0)
        } else {
            Bearing(normalised)
        }
    }

    pub fn degrees(self) -> f64 {
        self.0
    }

    pub fn radians(self) -> f64 {
        self.0.to_radians()
    }

    /// Returns this bearing rotated clockwise by `delta` degrees
    pub fn offset(self, delta: f64) -> Self {
        Bearing::from_degrees(self.0 + delta)
    }

    /// Signed angle in (-180, 180] from `reference` to this bearing.
    ///
    /// Positive values are clockwise of the reference.
    pub fn relative_to(self, reference: Bearing) -> f64 {
        let diff = (self.0 - reference.0).rem_euclid(360.0);
        if diff > 180.0 {
            diff - 360.0
        } else {
            diff
        }
    }
}

/// A latitude/longitude position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in metres (haversine)
    pub fn distance_to(&self, other: &GpsCoordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }

    pub fn distance_to_nautical_miles(&self, other: &GpsCoordinate) -> f64 {
        self.distance_to(other) / METERS_PER_NAUTICAL_MILE
    }

    /// Initial great-circle bearing from this position towards `other`
    pub fn bearing_to(&self, other: &GpsCoordinate) -> Bearing {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let y = d_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
        Bearing::from_degrees(y.atan2(x).to_degrees())
    }

    /// Position reached after travelling `distance_meters` along `bearing`
    pub fn destination(&self, distance_meters: f64, bearing: Bearing) -> GpsCoordinate {
        let angular = distance_meters / EARTH_RADIUS_METERS;
        let theta = bearing.radians();
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * theta.cos()).asin();
        let lon2 = lon1
            + (theta.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

        GpsCoordinate::new(lat2.to_degrees(), normalise_longitude(lon2.to_degrees()))
    }

    /// Point halfway along the great circle between the two positions
    pub fn midpoint(&self, other: &GpsCoordinate) -> GpsCoordinate {
        let distance = self.distance_to(other);
        if distance == 0.0 {
            return *self;
        }
        self.destination(distance / 2.0, self.bearing_to(other))
    }
}

fn normalise_longitude(longitude: f64) -> f64 {
    (longitude + 540.0).rem_euclid(360.0) - 180.0
}

/// Even-odd ray test for whether `point` lies inside the polygon `boundary`
pub fn is_inside_boundary(point: &GpsCoordinate, boundary: &[GpsCoordinate]) -> bool {
    if boundary.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = boundary.len() - 1;
    for i in 0..boundary.len() {
        if ray_crosses_edge(&boundary[i], &boundary[j], point) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Whether an eastward ray from `point` crosses the edge `a`-`b`
fn ray_crosses_edge(a: &GpsCoordinate, b: &GpsCoordinate, point: &GpsCoordinate) -> bool {
    let (low, high) = if a.latitude > b.latitude { (b, a) } else { (a, b) };

    let mut latitude = point.latitude;
    if latitude == low.latitude || latitude == high.latitude {
        latitude += 1e-9;
    }
    let longitude = point.longitude;

    if latitude > high.latitude
        || latitude < low.latitude
        || longitude > low.longitude.max(high.longitude)
    {
        return false;
    }
    if longitude < low.longitude.min(high.longitude) {
        return true;
    }

    let low_ratio = (latitude - low.latitude) / (longitude - low.longitude);
    let high_ratio = (latitude - high.latitude) / (longitude - high.longitude);
    low_ratio >= high_ratio
}

/// Positive on one side of the line `a`-`b`, negative on the other, zero on it
fn line_side(a: &GpsCoordinate, b: &GpsCoordinate, point: &GpsCoordinate) -> f64 {
    (point.latitude - a.latitude) * (b.longitude - a.longitude)
        - (point.longitude - a.longitude) * (b.latitude - a.latitude)
}

/// Whether `point` lies on the side of line `a`-`b` that `direction` points to.
///
/// The correct side is identified by a reference point 250 m from `a` along
/// `direction`. Points exactly on the line count as having passed it.
pub fn passes_line(
    a: &GpsCoordinate,
    b: &GpsCoordinate,
    point: &GpsCoordinate,
    direction: Bearing,
) -> bool {
    let side = line_side(a, b, point);
    let reference = a.destination(250.0, direction);
    let reference_side = line_side(a, b, &reference);

    (side > 0.0 && reference_side > 0.0) || (side < 0.0 && reference_side < 0.0) || side == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn square() -> Vec<GpsCoordinate> {
        vec![
            GpsCoordinate::new(-36.80, 174.70),
            GpsCoordinate::new(-36.80, 174.80),
            GpsCoordinate::new(-36.90, 174.80),
            GpsCoordinate::new(-36.90, 174.70),
        ]
    }

    #[test]
    fn test_bearing_normalisation() {
        assert_approx_eq!(Bearing::from_degrees(370.0).degrees(), 10.0);
        assert_approx_eq!(Bearing::from_degrees(-90.0).degrees(), 270.0);
        assert_eq!(Bearing::from_degrees(-1e-17).degrees(), 0.0);
        assert_approx_eq!(Bearing::from_degrees(350.0).offset(20.0).degrees(), 10.0);
    }

    #[test]
    fn test_relative_bearing() {
        let north = Bearing::from_degrees(0.0);
        assert_approx_eq!(Bearing::from_degrees(10.0).relative_to(north), 10.0);
        assert_approx_eq!(Bearing::from_degrees(350.0).relative_to(north), -10.0);
        assert_approx_eq!(Bearing::from_degrees(180.0).relative_to(north), 180.0);
    }

    #[test]
    fn test_destination_round_trip() {
        let start = GpsCoordinate::new(32.29, -64.85);
        let bearing = Bearing::from_degrees(47.0);
        let end = start.destination(1000.0, bearing);

        assert_approx_eq!(start.distance_to(&end), 1000.0, 1e-6);
        assert_approx_eq!(start.bearing_to(&end).degrees(), 47.0, 1e-6);
    }

    #[test]
    fn test_cardinal_bearings() {
        let origin = GpsCoordinate::new(0.0, 0.0);
        assert_approx_eq!(origin.bearing_to(&GpsCoordinate::new(1.0, 0.0)).degrees(), 0.0);
        assert_approx_eq!(origin.bearing_to(&GpsCoordinate::new(0.0, 1.0)).degrees(), 90.0);
        assert_approx_eq!(origin.bearing_to(&GpsCoordinate::new(-1.0, 0.0)).degrees(), 180.0);
        assert_approx_eq!(origin.bearing_to(&GpsCoordinate::new(0.0, -1.0)).degrees(), 270.0);
    }

    #[test]
    fn test_midpoint_is_equidistant() {
        let a = GpsCoordinate::new(32.30, -64.85);
        let b = GpsCoordinate::new(32.31, -64.83);
        let mid = a.midpoint(&b);

        assert_approx_eq!(a.distance_to(&mid), b.distance_to(&mid), 1e-6);
        assert_eq!(a.midpoint(&a), a);
    }

    #[test]
    fn test_point_in_boundary() {
        let boundary = square();
        assert!(is_inside_boundary(&GpsCoordinate::new(-36.85, 174.75), &boundary));
        assert!(!is_inside_boundary(&GpsCoordinate::new(-36.95, 174.75), &boundary));
        assert!(!is_inside_boundary(&GpsCoordinate::new(-36.85, 174.65), &boundary));
        assert!(!is_inside_boundary(&GpsCoordinate::new(-36.85, 174.75), &boundary[..2]));
    }

    #[test]
    fn test_passes_line() {
        let a = GpsCoordinate::new(0.0, 0.0);
        let b = GpsCoordinate::new(0.0, 0.01);
        let north = Bearing::from_degrees(0.0);

        assert!(passes_line(&a, &b, &GpsCoordinate::new(0.001, 0.005), north));
        assert!(!passes_line(&a, &b, &GpsCoordinate::new(-0.001, 0.005), north));
        assert!(passes_line(&a, &b, &GpsCoordinate::new(0.0, 0.005), north));
        assert!(passes_line(
            &a,
            &b,
            &GpsCoordinate::new(-0.001, 0.005),
            Bearing::from_degrees(180.0)
        ));
    }
}
