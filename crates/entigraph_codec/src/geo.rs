//! Geographic points.

use crate::error::{CodecError, CodecResult};

/// Mean earth radius in kilometers.
pub const EARTH_MEAN_RADIUS_KM: f64 = 6371.0;
/// Mean earth radius in miles.
pub const EARTH_MEAN_RADIUS_MILES: f64 = 3958.8;

/// A latitude/longitude pair in degrees.
///
/// Latitude lies in `[-90, 90]` and longitude in `[-180, 180]`; the
/// constructor rejects anything else, including NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Creates a geo-point.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidGeoPoint`] if either coordinate is out
    /// of range.
    pub fn new(latitude: f64, longitude: f64) -> CodecResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(CodecError::InvalidGeoPoint {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Returns the latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Returns the longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to `other` in radians (haversine formula).
    pub fn distance_in_radians_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let half_lat = (lat2 - lat1) / 2.0;
        let half_lon = (other.longitude - self.longitude).to_radians() / 2.0;

        let a = half_lat.sin().powi(2) + lat1.cos() * lat2.cos() * half_lon.sin().powi(2);
        2.0 * a.min(1.0).sqrt().asin()
    }

    /// Great-circle distance to `other` in kilometers.
    pub fn distance_in_kilometers_to(&self, other: &GeoPoint) -> f64 {
        self.distance_in_radians_to(other) * EARTH_MEAN_RADIUS_KM
    }

    /// Great-circle distance to `other` in miles.
    pub fn distance_in_miles_to(&self, other: &GeoPoint) -> f64 {
        self.distance_in_radians_to(other) * EARTH_MEAN_RADIUS_MILES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_extremes() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(GeoPoint::new(90.5, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.1).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(52.5, 13.4).unwrap();
        assert_eq!(p.distance_in_radians_to(&p), 0.0);
    }

    #[test]
    fn distance_berlin_paris() {
        let berlin = GeoPoint::new(52.52, 13.405).unwrap();
        let paris = GeoPoint::new(48.8566, 2.3522).unwrap();
        let km = berlin.distance_in_kilometers_to(&paris);
        assert!((km - 878.0).abs() < 5.0, "got {km}");
        let miles = berlin.distance_in_miles_to(&paris);
        assert!((miles - 545.5).abs() < 5.0, "got {miles}");
    }

    #[test]
    fn antipodes_are_pi_apart() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(0.0, 180.0).unwrap();
        assert!((a.distance_in_radians_to(&b) - std::f64::consts::PI).abs() < 1e-9);
    }
}
