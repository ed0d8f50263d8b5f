/// Geographic primitives and the buffer-to-envelope calculation
///
/// Turns a clicked point into the region of interest that is clipped out of
/// the historical imagery mosaic:
/// - `GeoPoint` (latitude/longitude in degrees)
/// - `BoundingBox` (axis-aligned envelope in degrees)
/// - `box_around` (geodesic buffer → envelope)
///
/// Poles and antimeridian crossings are not handled.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters (IUGG)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Buffer radius used for every click
pub const CLICK_RADIUS_M: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    #[error("buffer radius {0} must be a positive distance in meters")]
    Radius(f64),
}

/// A point captured from a map click
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check that both coordinates are finite and in range
    pub fn validate(&self) -> Result<(), GeometryError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(GeometryError::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GeometryError::Longitude(self.longitude));
        }
        Ok(())
    }
}

/// Axis-aligned rectangle in degrees
///
/// Invariant (away from poles/antimeridian): `north > south` and `east > west`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Corner order used by rectangle constructors: `[west, south, east, north]`
    pub fn to_wsen(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }
}

/// Envelope of a geodesic circle of `radius_m` meters around `point`
///
/// The circle's latitude extent is the angular radius itself. Its longitude
/// extent is reached at the tangent points of the meridians, where
/// `sin(Δλ) = sin(δ) / cos(φ)`; past the pole that ratio exceeds one and the
/// envelope is clamped to a half-turn.
pub fn box_around(point: GeoPoint, radius_m: f64) -> Result<BoundingBox, GeometryError> {
    point.validate()?;
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(GeometryError::Radius(radius_m));
    }

    let angular = radius_m / EARTH_RADIUS_M;
    let lat = point.latitude.to_radians();

    let ratio = angular.sin() / lat.cos();
    let delta_lng = if ratio.is_finite() && ratio < 1.0 {
        ratio.asin()
    } else {
        std::f64::consts::PI
    };

    let delta_lat_deg = angular.to_degrees();
    let delta_lng_deg = delta_lng.to_degrees();

    Ok(BoundingBox {
        north: (point.latitude + delta_lat_deg).min(90.0),
        south: (point.latitude - delta_lat_deg).max(-90.0),
        east: point.longitude + delta_lng_deg,
        west: point.longitude - delta_lng_deg,
    })
}
