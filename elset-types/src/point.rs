use serde::{Deserialize, Serialize};

/// Geodetic position of an object at one instant
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PropagatedPoint {
    /// Unix seconds, UTC
    #[serde(rename = "t")]
    pub timestamp: i64,

    /// Latitude [deg]
    pub lat: f64,

    /// Longitude [deg], (-180, 180]
    pub lon: f64,

    /// Altitude above the WGS-84 ellipsoid [km]
    pub alt: f64,
}
