use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Geo Utility - great-circle distance and service region bounds
// ============================================================================

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Haversine distance in kilometers. NaN inputs propagate to a NaN result.
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Rectangle of accepted coordinates, inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegion {
    pub min_latitude: f64,
    pub min_longitude: f64,
    pub max_latitude: f64,
    pub max_longitude: f64,
}

impl ServiceRegion {
    pub fn new(min_latitude: f64, min_longitude: f64, max_latitude: f64, max_longitude: f64) -> Self {
        Self {
            min_latitude,
            min_longitude,
            max_latitude,
            max_longitude,
        }
    }

    /// The whole globe. Only rejects out-of-range and non-finite values.
    pub fn global() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    pub fn contains(&self, point: Coordinates) -> bool {
        // NaN fails every comparison, so it is rejected here too
        point.latitude >= self.min_latitude
            && point.latitude <= self.max_latitude
            && point.longitude >= self.min_longitude
            && point.longitude <= self.max_longitude
    }
}

impl Default for ServiceRegion {
    fn default() -> Self {
        Self::global()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegionParseError {
    #[error("expected 4 comma-separated values (min_lat,min_lng,max_lat,max_lng), got {0}")]
    WrongArity(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("minimum bound exceeds maximum bound")]
    InvertedBounds,
}

impl FromStr for ServiceRegion {
    type Err = RegionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(RegionParseError::WrongArity(parts.len()));
        }

        let mut values = [0.0f64; 4];
        for (slot, raw) in values.iter_mut().zip(&parts) {
            *slot = raw
                .parse::<f64>()
                .map_err(|_| RegionParseError::InvalidNumber(raw.to_string()))?;
        }

        let region = Self::new(values[0], values[1], values[2], values[3]);
        if region.min_latitude > region.max_latitude || region.min_longitude > region.max_longitude {
            return Err(RegionParseError::InvertedBounds);
        }

        Ok(region)
    }
}
