use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

use crate::error::{invalid_input_error, Error};

/// Rough width of one degree of latitude in kilometres, used to size
/// bounding boxes for the cheap pre-filter before exact distance checks.
const KM_PER_DEGREE: f64 = 111.32;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(invalid_input_error());
        }

        if self.lat < -90.0 || self.lat > 90.0 || self.lng < -180.0 || self.lng > 180.0 {
            return Err(invalid_input_error());
        }

        Ok(())
    }

    /// PostGIS point for parameter binding; note the lng-first axis order.
    pub fn to_geometry(&self) -> Geometry<f64> {
        Point::new(self.lng, self.lat).into()
    }
}

pub fn radius_degrees(radius_km: f64) -> f64 {
    radius_km / KM_PER_DEGREE
}

pub fn radius_meters(radius_km: f64) -> f64 {
    radius_km * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_coordinates_within_bounds() {
        Coordinates::new(12.9, 77.6).validate().unwrap();
        Coordinates::new(-90.0, 180.0).validate().unwrap();
        Coordinates::new(90.0, -180.0).validate().unwrap();
    }

    #[test]
    fn rejects_coordinates_out_of_bounds() {
        assert_eq!(Coordinates::new(90.1, 0.0).validate().unwrap_err().code, 101);
        assert_eq!(Coordinates::new(0.0, -180.5).validate().unwrap_err().code, 101);
        assert_eq!(Coordinates::new(f64::NAN, 0.0).validate().unwrap_err().code, 101);
    }

    #[test]
    fn radius_conversions() {
        assert_eq!(radius_meters(5.0), 5000.0);
        assert!((radius_degrees(111.32) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn geometry_uses_lng_lat_order() {
        let point = Coordinates::new(12.9, 77.6).to_geometry();
        match point {
            Geometry::Point(p) => {
                assert_eq!(p.x(), 77.6);
                assert_eq!(p.y(), 12.9);
            }
            _ => panic!("expected a point"),
        }
    }
}
