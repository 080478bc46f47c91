/// Where a gauge sits. Longitude in degrees east, latitude in degrees
/// north, elevation in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
}

impl Location {
    /// Longitude folded into `[0, 360)`.
    pub fn normalized_longitude(&self) -> f64 {
        let lon = self.longitude.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs.
        if lon >= 360.0 {
            0.0
        } else {
            lon
        }
    }
}

/// Static metadata for one gauge site, joined onto observations by site id.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteMetadata {
    pub site_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
}

impl SiteMetadata {
    pub fn location(&self) -> Location {
        Location {
            longitude: self.longitude,
            latitude: self.latitude,
            elevation: self.elevation,
        }
    }
}
